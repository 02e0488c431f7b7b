//! Router tests for the paths that answer before touching the database.
//! The pool connects lazily and is never used.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use crud_scaffold::{api_routes, common_routes_with_ready, AppConfig, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

fn app() -> Router {
    let config = AppConfig::default();
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/crud_scaffold_test")
        .unwrap();
    let state = AppState::new(pool, config);
    Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest("/api/v1", api_routes(state))
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn welcome_message() {
    let (status, body) = send(Request::get("/api/v1").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Welcome to crud-scaffold API V1!");
}

#[tokio::test]
async fn unknown_route_is_a_404_envelope() {
    let (status, body) = send(Request::get("/api/v1/nothing/here").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({"success": false, "errorMessage": "Not Found", "errorCode": 404})
    );
}

#[tokio::test]
async fn health_is_served_outside_the_prefix() {
    let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn me_requires_a_token() {
    let (status, body) = send(post_json("/api/v1/auth/me", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], 401);
    assert_eq!(body["errorMessage"], "Unauthenticated");
}

#[tokio::test]
async fn malformed_token_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/logout")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn users_resource_is_protected() {
    let (status, _) = send(Request::get("/api/v1/users").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        Request::delete("/api/v1/users/7a1f4a9e-2b4c-4f6e-9d5e-1c2b3a4d5e6f")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_reports_every_invalid_field() {
    let (status, body) = send(post_json(
        "/api/v1/auth/register",
        json!({"email": "not-an-email", "password": "123", "password_confirmation": "456"}),
    ))
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errorMessage"], "Invalid Input");
    let errors = body["errors"].as_object().unwrap();
    assert!(errors.contains_key("name"));
    assert!(errors.contains_key("email"));
    assert!(errors.contains_key("password"));
}

#[tokio::test]
async fn login_validates_before_looking_up_credentials() {
    let (status, body) = send(post_json("/api/v1/auth/login", json!({"email": "ann@example.com"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["password"].is_array());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\":"))
        .unwrap();
    let (status, body) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}
