use super::utils::{handle_date_input, handle_search_input};
use super::{DefaultOrder, Method, QueryOptions, Record, RepoContext, Repository};
use crate::auth::hash_password;
use crate::error::AppError;
use crate::model::{ModelDef, USERS};
use crate::sql::Select;
use crate::validation::Rules;
use serde_json::Value;

pub struct UsersRepository {
    ctx: RepoContext,
}

impl UsersRepository {
    pub fn new(ctx: RepoContext) -> Self {
        UsersRepository { ctx }
    }
}

impl Repository for UsersRepository {
    fn model(&self) -> &'static ModelDef {
        &USERS
    }

    fn context(&self) -> &RepoContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut RepoContext {
        &mut self.ctx
    }

    fn order_by(&self) -> Option<DefaultOrder> {
        Some(DefaultOrder::asc("name"))
    }

    fn available_input_keys(&self, _data: &Record, _method: Method) -> Vec<&'static str> {
        vec!["name", "email", "password"]
    }

    fn input_rules(&self, method: Method, id: Option<&str>) -> Result<Rules, AppError> {
        let rules = Rules::new().field("name", "required")?;
        match method {
            Method::Create => rules
                .field("email", "required|email|unique:users,email")?
                .field("password", "required|confirmed|min:8"),
            Method::Update => {
                let unique = match id {
                    Some(id) => format!("required|email|unique:users,email,{},id", id),
                    None => "required|email|unique:users,email".to_string(),
                };
                rules
                    .field("email", &unique)?
                    .field("password", "nullable|confirmed|min:8")
            }
        }
    }

    /// Hashes the password; an empty password on update leaves it unchanged.
    fn prepare_data(&self, mut data: Record, method: Method) -> Result<Record, AppError> {
        match data.get("password").cloned() {
            Some(Value::String(plain)) if !plain.is_empty() => {
                let hashed = hash_password(&plain)?;
                data.insert("password".into(), Value::String(hashed));
            }
            Some(_) if method == Method::Update => {
                data.remove("password");
            }
            Some(_) => {
                return Err(AppError::BadRequest("The password must be a string.".into()));
            }
            None => {}
        }
        Ok(data)
    }

    fn handle_options(&self, query: &mut Select, opts: &QueryOptions) -> Result<(), AppError> {
        if opts.params.is_none() {
            return Ok(());
        }
        let tz = self.ctx.timezone;
        handle_search_input(query, opts.param("name"), &["name"]);
        handle_date_input(query, "created_at", opts.param("created_at"), true, tz);
        handle_date_input(query, "updated_at", opts.param("updated_at"), true, tz);
        Ok(())
    }
}
