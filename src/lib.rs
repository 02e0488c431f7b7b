//! crud-scaffold: generic repository, CRUD controller and resource
//! formatting for JSON APIs over PostgreSQL.

pub mod arrays;
pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod lang;
pub mod model;
pub mod repository;
pub mod resource;
pub mod response;
pub mod routes;
pub mod sql;
pub mod state;
pub mod storage;
pub mod strings;
pub mod validation;

pub use config::AppConfig;
pub use controller::{crud_routes, Action, CrudController};
pub use error::{AppError, AppResult, ConfigError};
pub use repository::{QueryOptions, Record, RepoContext, Repository};
pub use resource::{Formatter, JsonResource, ResourceOptions};
pub use routes::{api_routes, common_routes_with_ready};
pub use state::AppState;
