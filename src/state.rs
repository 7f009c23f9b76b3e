use crate::config::Config;
use crate::db::{self, StoreError};
use crate::errors::AppError;
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Every request works on its own connection; nothing is shared between requests.
    pub fn connect(&self) -> Result<Connection, StoreError> {
        db::open(&self.config.db_path)
    }

    /// Runs `work` against a fresh connection on the blocking pool, off the async workers.
    pub async fn with_db<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || -> Result<T, AppError> {
            let mut conn = state.connect()?;
            work(&mut conn)
        })
        .await
        .map_err(AppError::internal)?
    }

    pub fn today(&self) -> NaiveDate {
        self.config
            .fixed_today
            .unwrap_or_else(|| Local::now().date_naive())
    }
}
