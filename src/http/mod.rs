//! JSON HTTP API
//!
//! - `POST /api/clean`: CSV body, cleans it and keeps the result as the active table
//! - `POST /api/query`: question (or explicit plan) against the active table
//! - `POST /api/extract`: free text through the self-correcting extractor
//! - `GET /api/status`

pub mod handler;
pub mod server;

pub use server::{build_router, HttpServer};

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::table::Table;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Latest cleaned table; queries work on a snapshot
    pub table: Arc<RwLock<Option<Table>>>,
    pub client: Option<Arc<dyn LlmClient>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig, client: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            table: Arc::new(RwLock::new(None)),
            client,
            config: Arc::new(config),
        }
    }

    /// Start with a table already loaded
    pub fn with_table(self, table: Table) -> Self {
        Self {
            table: Arc::new(RwLock::new(Some(table))),
            ..self
        }
    }

    /// Copy of the active table, if any
    pub async fn snapshot(&self) -> Option<Table> {
        self.table.read().await.clone()
    }
}
