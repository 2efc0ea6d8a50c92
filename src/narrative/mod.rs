//! Narrative generation for mined insight drafts.
//!
//! A [`NarrativeGenerator`] turns a quantitative [`InsightDraft`] into a
//! title, evidence, recommended fixes and an experiment plan. Two generators
//! exist: [`DeterministicNarrator`] (template based) and [`RemoteNarrator`]
//! (chat-completions backed, falling back to the deterministic one on any
//! failure). Generation never fails at this boundary.

mod client;
mod deterministic;
mod types;


pub use client::RemoteNarrator;
pub use deterministic::DeterministicNarrator;
pub use types::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole,
    ResponseFormat, Usage,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analytics::InsightDraft;
use crate::config::{NarrativeConfig, NarrativeMode, RequestConfig};
use crate::error::NarrativeResult;

/// Human-readable rendering of a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub title: String,
    pub evidence: Vec<String>,
    pub recommended_fixes: Vec<String>,
    pub experiment_plan: ExperimentPlan,
}

/// A/B test proposal attached to an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    pub hypothesis: String,
    pub targeting: BTreeMap<String, String>,
    pub variants: Vec<Variant>,
    pub primary_metric: String,
    #[serde(default)]
    pub secondary_metrics: Vec<String>,
    #[serde(default)]
    pub guardrails: Vec<String>,
    pub sample_size_heuristic: String,
    pub runtime_days: u32,
}

/// One experiment arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    #[serde(default)]
    pub changes: Vec<VariantChange>,
}

/// A single checkout configuration change applied by a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantChange {
    pub module: String,
    pub key: String,
    pub value: String,
}

/// Turns drafts into narratives. Implementations must not fail.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, draft: &InsightDraft) -> Narrative;
}

/// Build the generator selected by configuration.
///
/// Remote mode without an API key degrades to the deterministic generator.
pub fn narrator_from_config(
    config: &NarrativeConfig,
    request: RequestConfig,
) -> NarrativeResult<Arc<dyn NarrativeGenerator>> {
    match (config.mode, config.api_key.as_deref()) {
        (NarrativeMode::Remote, Some(api_key)) => {
            let narrator = RemoteNarrator::new(config, api_key, request)?;
            info!(base_url = %narrator.base_url(), model = %config.model, "Remote narrator enabled");
            Ok(Arc::new(narrator))
        }
        (NarrativeMode::Remote, None) => {
            warn!("NARRATIVE_MODE=remote but NARRATIVE_API_KEY is not set; using deterministic narratives");
            Ok(Arc::new(DeterministicNarrator))
        }
        (NarrativeMode::Deterministic, _) => Ok(Arc::new(DeterministicNarrator)),
    }
}
