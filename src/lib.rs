//! # Checkout Insights
//!
//! An insight engine for e-commerce checkout sessions, served over the Model
//! Context Protocol (MCP).
//!
//! ## Features
//!
//! - **Segment mining**: finds segments whose abandonment, payment-failure or
//!   conversion rate deviates from the baseline, ranked by `|lift| x volume`
//! - **Driver analysis**: population-wide abandonment drivers per feature
//! - **Narratives**: deterministic templates, or an OpenAI-compatible
//!   chat-completions endpoint with deterministic fallback
//! - **Dashboard reads**: headline rates, daily trends, segment tables and
//!   recent-window anomalies
//! - **Insight detail**: fresh baseline-versus-segment comparison, device
//!   breakdown and funnel counts
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → InsightEngine → analytics (pure)
//!                                         ↓                ↓
//!                                   SQLite (sessions,  Narrative generator
//!                                     insights)        (template | HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use checkout_insights::{AppState, Config, McpServer};
//! use checkout_insights::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage)?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Segment analytics over session snapshots.
pub mod analytics;
/// Configuration management.
pub mod config;
/// Orchestration of mining, narration and persistence.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Narrative generation for insight drafts.
pub mod narrative;
/// System prompts for the remote narrative service.
pub mod prompts;
/// Synthetic demo sessions.
pub mod seed;
/// MCP server implementation and request handling.
pub mod server;
/// Session and insight persistence.
pub mod storage;

pub use config::Config;
pub use engine::InsightEngine;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
