//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::engine::InsightEngine;
use crate::error::AppResult;
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
pub struct AppState {
    /// Insight engine over the SQLite store.
    pub engine: InsightEngine,
}

impl AppState {
    /// Create new application state with the narrator selected by `config`.
    pub fn new(config: Config, storage: SqliteStorage) -> AppResult<Self> {
        tracing::info!(
            narrative_mode = ?config.narrative.mode,
            top_k = config.analysis.top_k,
            min_segment_volume = config.analysis.min_segment_volume,
            "AppState initializing"
        );

        let engine = InsightEngine::from_config(Arc::new(storage), &config)?;

        Ok(Self { engine })
    }
}

/// Thread-safe shared application state.
pub type SharedState = Arc<AppState>;
