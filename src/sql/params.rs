//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value bound to a PostgreSQL query. Every parameter goes over the wire
/// as TEXT and the statement casts it (`$n::numeric`, `$n::uuid`), so the
/// declared parameter types of a cached statement never depend on the
/// values bound to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PgBindValue {
    Null,
    Text(String),
}

impl PgBindValue {
    /// Strings bind raw, other scalars by their JSON text, arrays and
    /// objects as serialized JSON.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::String(s) => PgBindValue::Text(s.clone()),
            other => PgBindValue::Text(other.to_string()),
        }
    }
}

impl From<&Value> for PgBindValue {
    fn from(v: &Value) -> Self {
        PgBindValue::from_json(v)
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Text(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(<String as Type<Postgres>>::type_info())
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_and_decimals_share_a_wire_type() {
        let whole = PgBindValue::from_json(&json!(10));
        let fraction = PgBindValue::from_json(&json!(10.5));
        assert_eq!(whole, PgBindValue::Text("10".into()));
        assert_eq!(fraction, PgBindValue::Text("10.5".into()));
        assert_eq!(whole.produces(), fraction.produces());
    }

    #[test]
    fn uuid_like_strings_stay_text() {
        let id = "8F14E45F-CEEA-4671-9F5B-2B2C1C0E9F11";
        assert_eq!(PgBindValue::from_json(&json!(id)), PgBindValue::Text(id.into()));
        assert_eq!(
            PgBindValue::from_json(&json!(id)).produces(),
            PgBindValue::from_json(&json!("plain")).produces()
        );
    }

    #[test]
    fn structured_values_bind_as_json_text() {
        assert_eq!(
            PgBindValue::from_json(&json!(["*"])),
            PgBindValue::Text("[\"*\"]".into())
        );
        assert_eq!(PgBindValue::from_json(&json!(true)), PgBindValue::Text("true".into()));
        assert_eq!(PgBindValue::from_json(&Value::Null), PgBindValue::Null);
    }
}
