//! Shared application state for all routes.

use crate::config::AppConfig;
use crate::storage::Storage;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Storage,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        AppState {
            pool,
            storage: config.storage(),
            config: Arc::new(config),
        }
    }
}
