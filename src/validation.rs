//! Request validation from per-field rules.
//!
//! Rules are written the way they read in route definitions, e.g.
//! `"required|email|unique:users,email"`. Pure rules run first; `unique`
//! lookups only hit the database when every pure rule passed.

use crate::error::AppError;
use crate::repository::Record;
use crate::sql::{qualified_name, quoted, PgBindValue};
use regex::Regex;
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Messages per field, sorted by field name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: String) {
        self.0.entry(field.to_string()).or_default().push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_value(self) -> Value {
        Value::Object(
            self.0
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
        )
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rule {
    Required,
    Nullable,
    String,
    Email,
    Uuid,
    Min(f64),
    Max(f64),
    Pattern(String),
    In(Vec<String>),
    Confirmed,
    Unique {
        table: String,
        column: String,
        ignore: Option<(String, String)>,
    },
}

impl FromStr for Rule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (s, None),
        };
        let bad = || AppError::Internal(format!("invalid validation rule '{}'", s));
        let number = |a: Option<&str>| -> Result<f64, AppError> {
            a.and_then(|a| a.trim().parse().ok()).ok_or_else(bad)
        };
        Ok(match name.trim() {
            "required" => Rule::Required,
            "nullable" => Rule::Nullable,
            "string" => Rule::String,
            "email" => Rule::Email,
            "uuid" => Rule::Uuid,
            "confirmed" => Rule::Confirmed,
            "min" => Rule::Min(number(arg)?),
            "max" => Rule::Max(number(arg)?),
            "regex" => Rule::Pattern(arg.ok_or_else(bad)?.to_string()),
            "in" => Rule::In(
                arg.ok_or_else(bad)?
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .collect(),
            ),
            "unique" => {
                let parts: Vec<&str> = arg.ok_or_else(bad)?.split(',').map(str::trim).collect();
                let table = parts.first().filter(|t| !t.is_empty()).ok_or_else(bad)?;
                let column = parts.get(1).copied().unwrap_or("id");
                let ignore = match (parts.get(2), parts.get(3)) {
                    (Some(value), col) if !value.is_empty() => {
                        Some((col.copied().unwrap_or("id").to_string(), value.to_string()))
                    }
                    _ => None,
                };
                Rule::Unique {
                    table: table.to_string(),
                    column: column.to_string(),
                    ignore,
                }
            }
            _ => return Err(bad()),
        })
    }
}

/// Ordered rule set keyed by input name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rules(Vec<(String, Vec<Rule>)>);

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds rules for `field`, replacing any previous ones.
    pub fn set(&mut self, field: &str, rules: Vec<Rule>) {
        if let Some(entry) = self.0.iter_mut().find(|(f, _)| f == field) {
            entry.1 = rules;
        } else {
            self.0.push((field.to_string(), rules));
        }
    }

    /// Builder form of [`Rules::set`] taking a pipe-separated rule string.
    pub fn field(mut self, field: &str, spec: &str) -> Result<Self, AppError> {
        self.set(field, parse_rules(spec)?);
        Ok(self)
    }

    pub fn get(&self, field: &str) -> Option<&[Rule]> {
        self.0
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, r)| r.as_slice())
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Vec<Rule>> {
        self.0.iter_mut().find(|(f, _)| f == field).map(|(_, r)| r)
    }

    pub fn extend(&mut self, other: Rules) {
        for (field, rules) in other.0 {
            self.set(&field, rules);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Rule])> {
        self.0.iter().map(|(f, r)| (f.as_str(), r.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn parse_rules(spec: &str) -> Result<Vec<Rule>, AppError> {
    spec.split('|')
        .filter(|s| !s.trim().is_empty())
        .map(Rule::from_str)
        .collect()
}

pub struct RequestValidator;

impl RequestValidator {
    /// Pure checks only; `unique` rules are skipped.
    pub fn check(body: &Record, rules: &Rules) -> FieldErrors {
        let mut errors = FieldErrors::default();
        for (field, field_rules) in rules.iter() {
            check_field(body, field, field_rules, &mut errors);
        }
        errors
    }

    /// Full validation: pure checks, then uniqueness lookups.
    pub async fn validate(
        conn: &mut PgConnection,
        body: &Record,
        rules: &Rules,
    ) -> Result<(), AppError> {
        let errors = Self::check(body, rules);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        let mut errors = FieldErrors::default();
        for (field, field_rules) in rules.iter() {
            let Some(value) = present(body, field) else { continue };
            for rule in field_rules {
                if let Rule::Unique { table, column, ignore } = rule {
                    if is_taken(conn, table, column, ignore.as_ref(), value).await? {
                        errors.add(field, format!("The {} has already been taken.", label(field)));
                    }
                }
            }
        }
        errors.into_result()
    }
}

fn label(field: &str) -> String {
    field.replace('_', " ")
}

/// A value counts as present when set, non-null and not an empty string.
fn present<'a>(body: &'a Record, field: &str) -> Option<&'a Value> {
    match body.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(v),
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else { return false };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn check_field(body: &Record, field: &str, rules: &[Rule], errors: &mut FieldErrors) {
    let name = label(field);
    let Some(value) = present(body, field) else {
        if rules.contains(&Rule::Required) {
            errors.add(field, format!("The {} field is required.", name));
        }
        return;
    };
    let numeric = !rules.contains(&Rule::String) && value.is_number();
    for rule in rules {
        match rule {
            Rule::Required | Rule::Nullable | Rule::Unique { .. } => {}
            Rule::String => {
                if !value.is_string() {
                    errors.add(field, format!("The {} must be a string.", name));
                }
            }
            Rule::Email => {
                if !value.as_str().is_some_and(is_email) {
                    errors.add(field, format!("The {} must be a valid email address.", name));
                }
            }
            Rule::Uuid => {
                if !value.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()) {
                    errors.add(field, format!("The {} must be a valid UUID.", name));
                }
            }
            Rule::Min(min) => {
                if numeric {
                    if value.as_f64().is_some_and(|n| n < *min) {
                        errors.add(field, format!("The {} must be at least {}.", name, min));
                    }
                } else if let Some(s) = value.as_str() {
                    if (s.chars().count() as f64) < *min {
                        errors.add(
                            field,
                            format!("The {} must be at least {} characters.", name, min),
                        );
                    }
                }
            }
            Rule::Max(max) => {
                if numeric {
                    if value.as_f64().is_some_and(|n| n > *max) {
                        errors.add(field, format!("The {} must not be greater than {}.", name, max));
                    }
                } else if let Some(s) = value.as_str() {
                    if (s.chars().count() as f64) > *max {
                        errors.add(
                            field,
                            format!("The {} must not be greater than {} characters.", name, max),
                        );
                    }
                }
            }
            Rule::Pattern(pattern) => match Regex::new(pattern) {
                Ok(re) => {
                    if !value.as_str().is_some_and(|s| re.is_match(s)) {
                        errors.add(field, format!("The {} format is invalid.", name));
                    }
                }
                Err(_) => errors.add(field, format!("invalid pattern for {}", name)),
            },
            Rule::In(allowed) => {
                let as_text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !allowed.iter().any(|a| *a == as_text) {
                    errors.add(field, format!("The selected {} is invalid.", name));
                }
            }
            Rule::Confirmed => {
                let confirmation = body.get(&format!("{}_confirmation", field));
                if confirmation != Some(value) {
                    errors.add(field, format!("The {} confirmation does not match.", name));
                }
            }
        }
    }
}

async fn is_taken(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
    ignore: Option<&(String, String)>,
    value: &Value,
) -> Result<bool, AppError> {
    let mut sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {}::text = $1::text",
        qualified_name(table),
        quoted(column)
    );
    if let Some((ignore_column, _)) = ignore {
        sql.push_str(&format!(" AND {}::text <> $2::text", quoted(ignore_column)));
    }
    sql.push(')');
    tracing::debug!(sql = %sql, "unique check");
    let mut query = sqlx::query_scalar::<_, bool>(&sql).bind(PgBindValue::from_json(value));
    if let Some((_, ignored)) = ignore {
        query = query.bind(PgBindValue::Text(ignored.clone()));
    }
    Ok(query.fetch_one(&mut *conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn parses_pipe_separated_rules() {
        let rules = parse_rules("required|email|max:255|unique:users,email,42,id").unwrap();
        assert_eq!(rules[0], Rule::Required);
        assert_eq!(rules[1], Rule::Email);
        assert_eq!(rules[2], Rule::Max(255.0));
        assert_eq!(
            rules[3],
            Rule::Unique {
                table: "users".into(),
                column: "email".into(),
                ignore: Some(("id".into(), "42".into())),
            }
        );
        assert!(parse_rules("bogus").is_err());
        assert!(parse_rules("min:abc").is_err());
    }

    #[test]
    fn error_keys_come_out_sorted_by_name() {
        let mut errors = FieldErrors::default();
        errors.add("password", "short".into());
        errors.add("email", "taken".into());
        errors.add("password", "weak".into());
        let value = errors.into_value();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["email", "password"]);
        assert_eq!(value["password"], json!(["short", "weak"]));
    }

    #[test]
    fn missing_required_fields_are_reported() {
        let rules = Rules::new()
            .field("name", "required")
            .unwrap()
            .field("email", "required|email")
            .unwrap();
        let errors = RequestValidator::check(&body(json!({"name": ""})), &rules);
        assert_eq!(errors.get("name").unwrap(), ["The name field is required."]);
        assert_eq!(errors.get("email").unwrap(), ["The email field is required."]);
    }

    #[test]
    fn optional_fields_are_only_checked_when_present() {
        let rules = Rules::new().field("password", "nullable|min:8").unwrap();
        assert!(RequestValidator::check(&body(json!({})), &rules).is_empty());
        assert!(RequestValidator::check(&body(json!({"password": null})), &rules).is_empty());
        let errors = RequestValidator::check(&body(json!({"password": "short"})), &rules);
        assert_eq!(
            errors.get("password").unwrap(),
            ["The password must be at least 8 characters."]
        );
    }

    #[test]
    fn confirmed_requires_matching_confirmation() {
        let rules = Rules::new().field("password", "required|confirmed").unwrap();
        let ok = body(json!({"password": "secret123", "password_confirmation": "secret123"}));
        assert!(RequestValidator::check(&ok, &rules).is_empty());
        let bad = body(json!({"password": "secret123", "password_confirmation": "nope"}));
        assert_eq!(
            RequestValidator::check(&bad, &rules).get("password").unwrap(),
            ["The password confirmation does not match."]
        );
    }

    #[test]
    fn numeric_bounds_apply_to_numbers() {
        let rules = Rules::new().field("age", "min:18|max:99").unwrap();
        assert!(RequestValidator::check(&body(json!({"age": 30})), &rules).is_empty());
        assert!(!RequestValidator::check(&body(json!({"age": 12})), &rules).is_empty());
        assert!(!RequestValidator::check(&body(json!({"age": 120})), &rules).is_empty());
    }

    #[test]
    fn email_and_in_rules() {
        let rules = Rules::new()
            .field("email", "email")
            .unwrap()
            .field("role", "in:admin,editor")
            .unwrap();
        let errors =
            RequestValidator::check(&body(json!({"email": "nobody", "role": "root"})), &rules);
        assert!(errors.get("email").is_some());
        assert!(errors.get("role").is_some());
        let fine = RequestValidator::check(
            &body(json!({"email": "a@example.com", "role": "editor"})),
            &rules,
        );
        assert!(fine.is_empty());
    }

    #[test]
    fn field_errors_serialize_as_object_of_lists() {
        let mut errors = FieldErrors::default();
        errors.add("email", "taken".into());
        assert_eq!(errors.into_value(), json!({"email": ["taken"]}));
    }
}
