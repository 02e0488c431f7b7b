//! Small helpers over JSON objects and arrays.

use crate::error::AppError;
use crate::repository::Record;
use serde_json::Value;

/// Builds an object whose keys are `values`, each mapped through `attach`.
pub fn values_as_keys_with<F>(values: &[String], attach: F) -> Record
where
    F: Fn(&str) -> Value,
{
    values
        .iter()
        .map(|v| (v.clone(), attach(v)))
        .collect()
}

pub fn omit_keys(data: &Record, keys: &[&str]) -> Record {
    data.iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn preserve_keys(data: &Record, keys: &[&str]) -> Record {
    data.iter()
        .filter(|(k, _)| keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn omit_values(values: &[Value], omit: &[Value]) -> Vec<Value> {
    values
        .iter()
        .filter(|v| !omit.contains(v))
        .cloned()
        .collect()
}

/// Key text of a scalar id: strings as-is, numbers in decimal.
pub fn id_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turns `[{pivot_key: id, ..attrs}]` into `(id, attrs)` pairs, merging
/// `extra` into every attribute set. Later duplicates replace earlier ones.
pub fn format_pivot_data(
    items: &[Value],
    pivot_key: &str,
    extra: Option<&Record>,
) -> Result<Vec<(String, Record)>, AppError> {
    let mut out: Vec<(String, Record)> = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(obj) = item else {
            return Err(AppError::Internal(format!(
                "pivot item must be an object with '{}'",
                pivot_key
            )));
        };
        let id = obj.get(pivot_key).and_then(id_text).ok_or_else(|| {
            AppError::Internal(format!("pivot item is missing '{}'", pivot_key))
        })?;
        let mut attrs = omit_keys(obj, &[pivot_key]);
        if let Some(extra) = extra {
            attrs.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        match out.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = attrs,
            None => out.push((id, attrs)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn keys_are_omitted_or_preserved() {
        let data = record(json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(omit_keys(&data, &["a", "z"]), record(json!({"b": 2, "c": 3})));
        assert_eq!(preserve_keys(&data, &["a", "c"]), record(json!({"a": 1, "c": 3})));
    }

    #[test]
    fn values_are_omitted() {
        let values = vec![json!(1), json!("x"), json!(2)];
        assert_eq!(omit_values(&values, &[json!("x")]), vec![json!(1), json!(2)]);
    }

    #[test]
    fn values_become_keys() {
        let out = values_as_keys_with(&["en".into(), "es".into()], |lang| json!({"lang_id": lang}));
        assert_eq!(out["es"], json!({"lang_id": "es"}));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn pivot_data_is_keyed_by_pivot_key_with_extra() {
        let items = vec![
            json!({"id": 4, "position": 1}),
            json!({"id": "9", "position": 2}),
        ];
        let extra = record(json!({"source": "api"}));
        let out = format_pivot_data(&items, "id", Some(&extra)).unwrap();
        assert_eq!(out[0].0, "4");
        assert_eq!(out[0].1, record(json!({"position": 1, "source": "api"})));
        assert_eq!(out[1].0, "9");
    }

    #[test]
    fn pivot_data_requires_objects_with_key() {
        assert!(format_pivot_data(&[json!(3)], "id", None).is_err());
        assert!(format_pivot_data(&[json!({"tag": 3})], "id", None).is_err());
    }
}
