//! The versioned API: welcome, auth and the admin resources.

use crate::auth::CurrentUser;
use crate::controller::{auth, crud_routes, UsersController};
use crate::response;
use crate::state::AppState;
use axum::{
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::Map;

pub const WELCOME_MESSAGE: &str = "Welcome to crud-scaffold API V1!";

async fn welcome() -> Response {
    response::response200(Map::new(), Some(WELCOME_MESSAGE))
}

/// Public auth routes plus everything that needs a bearer token. Unknown
/// paths answer with the 404 envelope.
pub fn api_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", post(auth::me))
        .route("/auth/logout", post(auth::logout))
        .nest("/users", crud_routes(state.clone(), UsersController))
        .route_layer(middleware::from_extractor_with_state::<CurrentUser, _>(
            state.clone(),
        ));

    Router::new()
        .route("/", get(welcome))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .merge(protected)
        .fallback(response::fallback)
        .with_state(state)
}
