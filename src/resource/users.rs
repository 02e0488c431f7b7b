use super::{pick, Formatter, ResourceOptions};
use crate::repository::Record;
use serde_json::Value;

const USER_FIELDS: [&str; 6] = ["id", "name", "email", "created_at", "updated_at", "deleted_at"];

#[derive(Clone, Copy, Debug, Default)]
pub struct UserResource;

impl Formatter for UserResource {
    fn format(&self, row: &Record, options: &ResourceOptions) -> Record {
        if options.select {
            return pick(row, &["id", "name"]);
        }
        pick(row, &USER_FIELDS)
    }
}

/// The signed-in user, as returned by `/auth/me`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthUserResource;

impl Formatter for AuthUserResource {
    fn format(&self, row: &Record, _options: &ResourceOptions) -> Record {
        let mut out = pick(row, &USER_FIELDS);
        out.insert("access".into(), Value::String("admin".into()));
        out
    }
}
