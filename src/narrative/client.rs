use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use super::{DeterministicNarrator, Narrative, NarrativeGenerator};
use crate::analytics::InsightDraft;
use crate::config::{NarrativeConfig, RequestConfig};
use crate::error::{NarrativeError, NarrativeResult};
use crate::prompts::{narrative_user_prompt, NARRATIVE_SYSTEM_PROMPT};

const TEMPERATURE: f64 = 0.3;

/// Narrator backed by an OpenAI-compatible chat-completions endpoint.
///
/// Any failure (transport, status, timeout, unparseable body) degrades to
/// [`DeterministicNarrator`] output for that draft.
#[derive(Clone)]
pub struct RemoteNarrator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    request_config: RequestConfig,
    fallback: DeterministicNarrator,
}

impl RemoteNarrator {
    pub fn new(
        config: &NarrativeConfig,
        api_key: &str,
        request_config: RequestConfig,
    ) -> NarrativeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(NarrativeError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            request_config,
            fallback: DeterministicNarrator,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Narrate a draft, surfacing failures instead of falling back.
    pub async fn try_generate(&self, draft: &InsightDraft) -> NarrativeResult<Narrative> {
        let finding = serde_json::to_string(draft).map_err(|e| NarrativeError::InvalidResponse {
            message: format!("Failed to serialize draft: {}", e),
        })?;

        let request = ChatCompletionRequest::new(
            &self.model,
            vec![
                ChatMessage::system(NARRATIVE_SYSTEM_PROMPT),
                ChatMessage::user(narrative_user_prompt(&finding)),
            ],
        )
        .with_temperature(TEMPERATURE)
        .with_json_output();

        let response = self.call_with_retry(&request, &draft.segment_label).await?;
        let mut narrative = response.narrative()?;

        // The stored insight targets the mined segment, not whatever the model echoed.
        narrative.experiment_plan.targeting = draft.targeting.clone();
        Ok(narrative)
    }

    async fn call_with_retry(
        &self,
        request: &ChatCompletionRequest,
        segment: &str,
    ) -> NarrativeResult<ChatCompletionResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = backoff_delay(self.request_config.retry_delay_ms, retries);
                warn!(
                    segment = %segment,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying narrative request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, request).await {
                Ok(response) => {
                    info!(
                        segment = %segment,
                        latency_ms = start.elapsed().as_millis(),
                        "Narrative call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        segment = %segment,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Narrative call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(NarrativeError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &ChatCompletionRequest,
    ) -> NarrativeResult<ChatCompletionResponse> {
        debug!(model = %request.model, messages = request.messages.len(), "Calling chat completions");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NarrativeError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    NarrativeError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(NarrativeError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| NarrativeError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

/// Exponential backoff before retry number `retry` (1-based), saturating at
/// `u64::MAX` milliseconds.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2_u64.checked_pow(retry.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[async_trait]
impl NarrativeGenerator for RemoteNarrator {
    async fn generate(&self, draft: &InsightDraft) -> Narrative {
        match self.try_generate(draft).await {
            Ok(narrative) => narrative,
            Err(e) => {
                warn!(
                    segment = %draft.segment_label,
                    error = %e,
                    "Falling back to deterministic narrative"
                );
                self.fallback.render(draft)
            }
        }
    }
}
