//! Static table descriptors consumed by the SQL builder and repositories.

use serde_json::Value;

/// Primary key type for parsing path ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Uuid,
    BigInt,
    Text,
}

impl KeyType {
    /// Parses a path segment into a key value; `None` when it cannot be a key.
    pub fn parse(&self, raw: &str) -> Option<Value> {
        match self {
            KeyType::Uuid => uuid::Uuid::parse_str(raw)
                .ok()
                .map(|u| Value::String(u.to_string())),
            KeyType::BigInt => raw.parse::<i64>().ok().map(|n| Value::Number(n.into())),
            KeyType::Text => Some(Value::String(raw.to_string())),
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            KeyType::Uuid => "uuid",
            KeyType::BigInt => "bigint",
            KeyType::Text => "text",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ColumnDef {
    pub name: &'static str,
    /// PostgreSQL type used to cast bound parameters (e.g. "timestamptz").
    pub sql_type: &'static str,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        ColumnDef { name, sql_type }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum RelationKind {
    /// This table holds `foreign_key` pointing at the related `owner_key`.
    BelongsTo {
        foreign_key: &'static str,
        owner_key: &'static str,
    },
    /// The related table holds `foreign_key` pointing at our `local_key`.
    HasMany {
        foreign_key: &'static str,
        local_key: &'static str,
    },
    /// Joined through `pivot_table`.
    BelongsToMany {
        pivot_table: &'static str,
        foreign_pivot_key: &'static str,
        related_pivot_key: &'static str,
        pivot_columns: &'static [ColumnDef],
    },
}

#[derive(Clone, Copy, Debug)]
pub struct RelationDef {
    pub name: &'static str,
    pub related: &'static ModelDef,
    pub kind: RelationKind,
}

/// One translated input: `{input}_{lang}` request keys land in
/// `translated_column` of the translations table; the primary-language value
/// is also copied into `main_column` when set.
#[derive(Clone, Copy, Debug)]
pub struct TranslatedColumn {
    pub input: &'static str,
    pub main_column: Option<&'static str>,
    pub translated_column: &'static str,
}

/// Side table holding one row per (record, language).
#[derive(Clone, Copy, Debug)]
pub struct TranslationsDef {
    pub table: &'static str,
    pub foreign_key: &'static str,
    pub lang_column: &'static str,
    pub columns: &'static [TranslatedColumn],
}

pub const TIMESTAMP_COLUMNS: [&str; 3] = ["created_at", "updated_at", "deleted_at"];

#[derive(Debug)]
pub struct ModelDef {
    pub schema: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    pub key_type: KeyType,
    pub columns: &'static [ColumnDef],
    pub fillable: &'static [&'static str],
    /// Never selected or returned.
    pub hidden: &'static [&'static str],
    pub soft_deletes: bool,
    pub timestamps: bool,
    pub relations: &'static [RelationDef],
    pub translations: Option<TranslationsDef>,
}

impl ModelDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn cast_for(&self, name: &str) -> Option<&'static str> {
        self.column(name).map(|c| c.sql_type)
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden.contains(&name)
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !self.is_hidden(c.name))
    }

    /// Visible fillable columns plus the timestamp columns.
    pub fn sortable_columns(&self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = self
            .fillable
            .iter()
            .copied()
            .filter(|c| !self.is_hidden(c))
            .collect();
        for ts in TIMESTAMP_COLUMNS {
            if self.has_column(ts) && !cols.contains(&ts) {
                cols.push(ts);
            }
        }
        cols
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn key_cast(&self) -> &'static str {
        self.key_type.sql_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static THINGS: ModelDef = ModelDef {
        schema: "public",
        table: "things",
        primary_key: "id",
        key_type: KeyType::BigInt,
        columns: &[
            ColumnDef::new("id", "bigint"),
            ColumnDef::new("label", "text"),
            ColumnDef::new("secret", "text"),
            ColumnDef::new("created_at", "timestamptz"),
            ColumnDef::new("updated_at", "timestamptz"),
        ],
        fillable: &["label", "secret"],
        hidden: &["secret"],
        soft_deletes: false,
        timestamps: true,
        relations: &[],
        translations: None,
    };

    #[test]
    fn parses_keys_by_type() {
        assert_eq!(KeyType::BigInt.parse("12"), Some(json!(12)));
        assert_eq!(KeyType::BigInt.parse("x"), None);
        assert_eq!(KeyType::Uuid.parse("nope"), None);
        assert_eq!(
            KeyType::Uuid.parse("8F14E45F-CEEA-4671-9F5B-2B2C1C0E9F11"),
            Some(json!("8f14e45f-ceea-4671-9f5b-2b2c1c0e9f11"))
        );
    }

    #[test]
    fn sortable_columns_add_existing_timestamps_only() {
        assert_eq!(
            THINGS.sortable_columns(),
            vec!["label", "created_at", "updated_at"]
        );
    }

    #[test]
    fn hidden_columns_are_not_visible() {
        let visible: Vec<_> = THINGS.visible_columns().map(|c| c.name).collect();
        assert_eq!(visible, vec!["id", "label", "created_at", "updated_at"]);
    }
}
