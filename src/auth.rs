//! Password hashing and personal access tokens.
//!
//! Clients receive `{token id}|{40 alphanumerics}`; only the sha256 of the
//! secret part is stored. [`CurrentUser`] resolves a bearer token to its user.

use crate::error::AppError;
use crate::model::{PERSONAL_ACCESS_TOKENS, USERS};
use crate::repository::Record;
use crate::sql::{self, exec, qualified_table, quoted, QueryBuf, Select};
use crate::state::AppState;
use crate::strings::random_string;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use uuid::Uuid;

pub const TOKEN_NAME: &str = "API Token";
const SECRET_LENGTH: usize = 40;

pub fn hash_password(plain: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hash: {}", e)))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Hex sha256 of a token secret, as stored in `personal_access_tokens.token`.
pub fn hash_token(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn generate_secret() -> String {
    random_string(SECRET_LENGTH)
}

/// Splits a plain-text token into its id and secret.
pub fn parse_token(raw: &str) -> Option<(Uuid, &str)> {
    let (id, secret) = raw.trim().split_once('|')?;
    let id = Uuid::parse_str(id).ok()?;
    let valid = secret.len() == SECRET_LENGTH && secret.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some((id, secret))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Creates a token for `user_id` and returns its plain-text form.
pub async fn issue_token(conn: &mut PgConnection, user_id: &Value, name: &str) -> Result<String, AppError> {
    let id = Uuid::new_v4();
    let secret = generate_secret();
    let mut data = Record::new();
    data.insert("id".into(), Value::String(id.to_string()));
    data.insert("tokenable_id".into(), user_id.clone());
    data.insert("name".into(), Value::String(name.to_string()));
    data.insert("token".into(), Value::String(hash_token(&secret)));
    data.insert("abilities".into(), json!(["*"]));
    exec::execute(conn, &sql::insert(&PERSONAL_ACCESS_TOKENS, &data)).await?;
    tracing::info!(token_id = %id, "token issued");
    Ok(format!("{}|{}", id, secret))
}

/// Deletes every token of `user_id`.
pub async fn revoke_tokens(conn: &mut PgConnection, user_id: &Value) -> Result<u64, AppError> {
    let q = QueryBuf {
        sql: format!(
            "DELETE FROM {} WHERE {} = $1::uuid",
            qualified_table(&PERSONAL_ACCESS_TOKENS),
            quoted("tokenable_id")
        ),
        params: vec![user_id.clone()],
    };
    let removed = exec::execute(conn, &q).await?;
    tracing::info!(user_id = %user_id, removed, "tokens revoked");
    Ok(removed)
}

/// Id and password hash of the active user with `email`.
pub async fn find_credentials(
    conn: &mut PgConnection,
    email: &str,
) -> Result<Option<(Value, String)>, AppError> {
    let q = QueryBuf {
        sql: format!(
            "SELECT {}, {} FROM {} WHERE {} = $1::text AND {} IS NULL LIMIT 1",
            quoted("id"),
            quoted("password"),
            qualified_table(&USERS),
            quoted("email"),
            quoted("deleted_at")
        ),
        params: vec![Value::String(email.to_string())],
    };
    Ok(exec::fetch_optional(conn, &q).await?.and_then(|row| {
        let id = row.get("id").cloned()?;
        let hash = row.get("password").and_then(Value::as_str)?.to_string();
        Some((id, hash))
    }))
}

/// The user behind the request's bearer token.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub user: Record,
    pub token_id: Uuid,
}

impl CurrentUser {
    pub fn id(&self) -> &Value {
        self.user.get(USERS.primary_key).unwrap_or(&Value::Null)
    }

    /// Resolves a plain-text token; `None` when it matches no active user.
    pub async fn authenticate(conn: &mut PgConnection, raw: &str) -> Result<Option<Self>, AppError> {
        let Some((token_id, secret)) = parse_token(raw) else {
            return Ok(None);
        };
        let lookup = QueryBuf {
            sql: format!(
                "SELECT {}, {} FROM {} WHERE {} = $1::uuid",
                quoted("token"),
                quoted("tokenable_id"),
                qualified_table(&PERSONAL_ACCESS_TOKENS),
                quoted("id")
            ),
            params: vec![Value::String(token_id.to_string())],
        };
        let Some(token) = exec::fetch_optional(conn, &lookup).await? else {
            return Ok(None);
        };
        let stored = token.get("token").and_then(Value::as_str).unwrap_or_default();
        if !constant_time_eq(stored.as_bytes(), hash_token(secret).as_bytes()) {
            return Ok(None);
        }
        let Some(owner) = token.get("tokenable_id").cloned() else {
            return Ok(None);
        };
        let mut q = Select::new(&USERS);
        q.where_eq(USERS.primary_key, owner).where_null("deleted_at").limit(1);
        let Some(user) = exec::fetch_optional(conn, &q.build()).await? else {
            return Ok(None);
        };
        let touch = QueryBuf {
            sql: format!(
                "UPDATE {} SET {} = NOW() WHERE {} = $1::uuid",
                qualified_table(&PERSONAL_ACCESS_TOKENS),
                quoted("last_used_at"),
                quoted("id")
            ),
            params: vec![Value::String(token_id.to_string())],
        };
        exec::execute(conn, &touch).await?;
        Ok(Some(CurrentUser { user, token_id }))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }
        let Some(raw) = bearer_token(&parts.headers).filter(|t| parse_token(t).is_some()) else {
            tracing::warn!(path = %parts.uri.path(), "missing or malformed bearer token");
            return Err(AppError::unauthenticated());
        };
        let mut conn = state.pool.acquire().await?;
        let Some(user) = CurrentUser::authenticate(&mut conn, raw).await? else {
            tracing::warn!(path = %parts.uri.path(), "rejected bearer token");
            return Err(AppError::unauthenticated());
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
