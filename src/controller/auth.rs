//! Register, login, me and logout.

use super::json_body;
use crate::auth::{find_credentials, issue_token, revoke_tokens, verify_password, CurrentUser, TOKEN_NAME};
use crate::error::AppError;
use crate::repository::{RepoContext, Repository, UsersRepository};
use crate::resource::{AuthUserResource, JsonResource, ResourceOptions};
use crate::response;
use crate::state::AppState;
use crate::validation::{RequestValidator, Rules};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

fn register_rules() -> Result<Rules, AppError> {
    Rules::new()
        .field("name", "required|string|max:255")?
        .field("email", "required|string|email|unique:users,email")?
        .field("password", "required|string|min:6|confirmed")
}

fn login_rules() -> Result<Rules, AppError> {
    Rules::new()
        .field("email", "required|string|email")?
        .field("password", "required|string|min:6")
}

fn token_body(token: String) -> Map<String, Value> {
    Map::from_iter([("data".to_string(), json!({ "token": token }))])
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(body)?;
    let rules = register_rules()?;
    RequestValidator::check(&body, &rules).into_result()?;

    let mut tx = state.pool.begin().await?;
    RequestValidator::validate(&mut tx, &body, &rules).await?;
    let repo = UsersRepository::new(RepoContext::default());
    let user = repo.create(&mut tx, body).await?;
    let user_id = user
        .get("id")
        .cloned()
        .ok_or_else(|| AppError::Internal("created user without id".into()))?;
    let token = issue_token(&mut tx, &user_id, TOKEN_NAME).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, "user registered");
    Ok(response::response200(token_body(token), None))
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(body)?;
    RequestValidator::check(&body, &login_rules()?).into_result()?;
    let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();

    let mut conn = state.pool.acquire().await?;
    let user_id = match find_credentials(&mut conn, email).await? {
        Some((id, hash)) if verify_password(password, &hash) => id,
        _ => {
            tracing::warn!("login rejected");
            return Ok(response::response401(Map::new(), Some("Credentials not match")));
        }
    };
    let token = issue_token(&mut conn, &user_id, TOKEN_NAME).await?;
    Ok(response::response200(token_body(token), None))
}

pub async fn me(user: CurrentUser) -> Response {
    JsonResource::one(&AuthUserResource, &user.user, &ResourceOptions::default()).into_response()
}

pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> Result<Response, AppError> {
    let mut conn = state.pool.acquire().await?;
    revoke_tokens(&mut conn, user.id()).await?;
    Ok(response::response200(Map::new(), Some("Token removed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Record;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn register_requires_confirmed_password() {
        let rules = register_rules().unwrap();
        let errors = RequestValidator::check(
            &record(json!({"name": "Ann", "email": "ann@example.com", "password": "secret1"})),
            &rules,
        );
        assert!(errors.get("password").is_some());
        assert!(errors.get("email").is_none());
    }

    #[test]
    fn login_checks_email_format_and_password_length() {
        let errors = RequestValidator::check(
            &record(json!({"email": "nope", "password": "123"})),
            &login_rules().unwrap(),
        );
        assert!(errors.get("email").is_some());
        assert!(errors.get("password").is_some());
    }

    #[test]
    fn token_is_nested_under_data() {
        assert_eq!(
            Value::Object(token_body("1|abc".into())),
            json!({"data": {"token": "1|abc"}})
        );
    }
}
