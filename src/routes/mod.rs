mod api;
mod common;

pub use api::{api_routes, WELCOME_MESSAGE};
pub use common::common_routes_with_ready;
