//! Canonical response envelope.
//!
//! Successful responses carry `success: true` and a `message`; failures carry
//! `success: false`, `errorMessage` and `errorCode`. Extra keys are merged into
//! the top level of the body.

use crate::repository::{Page, Record};
use crate::resource::{Formatter, ResourceOptions};
use crate::validation::FieldErrors;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

/// Builds the envelope body for `status`. Keys in `extra` win over the envelope keys.
pub fn envelope(status: StatusCode, message: &str, extra: Map<String, Value>) -> Value {
    let mut body = Map::new();
    if status.as_u16() >= 400 {
        body.insert("errorMessage".into(), Value::String(message.to_string()));
        body.insert("errorCode".into(), Value::from(status.as_u16()));
        body.insert("success".into(), Value::Bool(false));
    } else {
        body.insert("success".into(), Value::Bool(true));
        body.insert("message".into(), Value::String(message.to_string()));
    }
    body.extend(extra);
    Value::Object(body)
}

pub fn respond(status: StatusCode, message: &str, extra: Map<String, Value>) -> Response {
    (status, Json(envelope(status, message, extra))).into_response()
}

pub fn response200(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(StatusCode::OK, message.unwrap_or("Success"), extra)
}

pub fn response201(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(StatusCode::CREATED, message.unwrap_or("Created"), extra)
}

pub fn response400(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(StatusCode::BAD_REQUEST, message.unwrap_or("Bad Request"), extra)
}

pub fn response401(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(StatusCode::UNAUTHORIZED, message.unwrap_or("Unauthenticated"), extra)
}

pub fn response403(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(StatusCode::FORBIDDEN, message.unwrap_or("Forbidden"), extra)
}

pub fn response404(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(StatusCode::NOT_FOUND, message.unwrap_or("Not Found"), extra)
}

pub fn response422(errors: FieldErrors) -> Response {
    let mut extra = Map::new();
    extra.insert("errors".into(), errors.into_value());
    respond(StatusCode::UNPROCESSABLE_ENTITY, "Invalid Input", extra)
}

pub fn response500(extra: Map<String, Value>, message: Option<&str>) -> Response {
    respond(
        StatusCode::INTERNAL_SERVER_ERROR,
        message.unwrap_or("Internal Server Error"),
        extra,
    )
}

/// Router fallback: every unmatched route answers with the 404 envelope.
pub async fn fallback() -> Response {
    response404(Map::new(), None)
}

/// Flat pagination body: page bookkeeping next to the formatted rows, echoing
/// the filters the client sent.
pub fn paginate_body<F: Formatter + ?Sized>(
    page: &Page,
    formatter: &F,
    options: &ResourceOptions,
    filters: Option<Value>,
    extra: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let data: Vec<Value> = page
        .items
        .iter()
        .map(|row: &Record| Value::Object(formatter.format(row, options)))
        .collect();
    let mut body = Map::new();
    body.insert("total".into(), json!(page.total));
    body.insert("data".into(), Value::Array(data));
    body.insert("per_page".into(), json!(page.per_page));
    body.insert("current_page".into(), json!(page.current_page));
    body.insert("from".into(), json!(page.first_item()));
    body.insert("to".into(), json!(page.last_item()));
    body.insert("next_url".into(), json!(page.next_page_url()));
    body.insert("prev_url".into(), json!(page.previous_page_url()));
    body.insert("last_page".into(), json!(page.last_page()));
    body.insert("last_url".into(), json!(page.url(page.last_page())));
    body.insert("first_url".into(), json!(page.url(1)));
    body.insert("filters".into(), filters.unwrap_or(Value::Null));
    if let Some(extra) = extra {
        body.insert("extra".into(), Value::Object(extra));
    }
    body
}

pub fn paginate<F: Formatter + ?Sized>(
    page: &Page,
    formatter: &F,
    options: &ResourceOptions,
    filters: Option<Value>,
    extra: Option<Map<String, Value>>,
) -> Response {
    response200(paginate_body(page, formatter, options, filters, extra), None)
}
