//! Orchestration over the session store, the analytics core and narration.
//!
//! [`InsightEngine`] is the single entry point used by the MCP server and the
//! CLI. Reads load a snapshot from the store and run the pure analytics over
//! it; [`InsightEngine::recompute`] mines, ranks, narrates and atomically
//! replaces the persisted insight collection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{
    compare_segment, daily_trends, dashboard_metrics, detect_anomalies, observation_span,
    segment_stats, Anomaly, DailyTrend, DashboardMetrics, DimensionStats, InsightDraft,
    InsightMiner, SegmentComparison,
};
use crate::config::{AnalysisConfig, Config};
use crate::error::AppResult;
use crate::narrative::{narrator_from_config, DeterministicNarrator, Narrative, NarrativeGenerator};
use crate::seed::FixtureGenerator;
use crate::storage::{
    Insight, InsightFilters, InsightStatus, Session, SessionFilter, SessionStore,
};

/// Sessions per page for [`InsightEngine::sessions_page`].
pub const SESSIONS_PER_PAGE: u32 = 100;

/// An insight together with its freshly recomputed comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightDetail {
    pub insight: Insight,
    pub detail: SegmentComparison,
}

/// One page of sessions, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsPage {
    pub sessions: Vec<Session>,
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
}

/// Result of regenerating the demo population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub seeded: usize,
    pub insights: usize,
}

pub struct InsightEngine {
    store: Arc<dyn SessionStore>,
    narrator: Arc<dyn NarrativeGenerator>,
    fallback: DeterministicNarrator,
    analysis: AnalysisConfig,
    narrative_timeout: Duration,
    recompute_lock: Mutex<()>,
}

impl InsightEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        narrator: Arc<dyn NarrativeGenerator>,
        analysis: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            narrator,
            fallback: DeterministicNarrator,
            analysis,
            narrative_timeout: Duration::from_millis(15_000),
            recompute_lock: Mutex::new(()),
        }
    }

    /// Build an engine with the narrator selected by `config`.
    pub fn from_config(store: Arc<dyn SessionStore>, config: &Config) -> AppResult<Self> {
        let narrator = narrator_from_config(&config.narrative, config.request.clone())?;
        Ok(Self::new(store, narrator, config.analysis.clone())
            .with_narrative_timeout(Duration::from_millis(config.narrative.timeout_ms)))
    }

    /// Upper bound on one draft's narration before the fallback is used.
    pub fn with_narrative_timeout(mut self, timeout: Duration) -> Self {
        self.narrative_timeout = timeout;
        self
    }

    /// Mine, rank, narrate and persist a fresh insight batch.
    ///
    /// Returns the number of insights now stored. Concurrent calls are
    /// serialized; a store failure leaves the previous batch in place.
    pub async fn recompute(&self) -> AppResult<usize> {
        let _guard = self.recompute_lock.lock().await;
        self.recompute_locked().await
    }

    /// Caller must hold `recompute_lock`.
    async fn recompute_locked(&self) -> AppResult<usize> {
        let sessions = self.load_all().await?;
        let miner = InsightMiner::new(self.analysis.clone());
        let drafts = miner.select(miner.mine(&sessions));
        debug!(sessions = sessions.len(), drafts = drafts.len(), "Mined insight drafts");

        let (window_start, window_end) = match observation_span(&sessions) {
            Some(span) => span,
            None => {
                let now = Utc::now();
                (now, now)
            }
        };

        let narratives = self.narrate(&drafts).await;
        let created_at = Utc::now();
        let insights: Vec<Insight> = drafts
            .into_iter()
            .zip(narratives)
            .map(|(draft, narrative)| {
                build_insight(draft, narrative, window_start, window_end, created_at)
            })
            .collect();

        self.store.replace_insights(&insights).await?;

        info!(
            sessions = sessions.len(),
            insights = insights.len(),
            "Insights recomputed"
        );
        Ok(insights.len())
    }

    /// Narrate drafts concurrently, preserving input order.
    async fn narrate(&self, drafts: &[InsightDraft]) -> Vec<Narrative> {
        let mut tasks = JoinSet::new();
        for (index, draft) in drafts.iter().cloned().enumerate() {
            let narrator = Arc::clone(&self.narrator);
            let timeout = self.narrative_timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, narrator.generate(&draft)).await;
                (index, result.ok())
            });
        }

        let mut slots: Vec<Option<Narrative>> = vec![None; drafts.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Some(narrative))) => slots[index] = Some(narrative),
                Ok((index, None)) => {
                    warn!(
                        segment = %drafts[index].segment_label,
                        timeout_ms = self.narrative_timeout.as_millis(),
                        "Narrative timed out, using deterministic text"
                    );
                }
                Err(e) => warn!(error = %e, "Narrative task failed, using deterministic text"),
            }
        }

        slots
            .into_iter()
            .zip(drafts)
            .map(|(slot, draft)| slot.unwrap_or_else(|| self.fallback.render(draft)))
            .collect()
    }

    pub async fn dashboard_metrics(&self) -> AppResult<DashboardMetrics> {
        let sessions = self.load_all().await?;
        Ok(dashboard_metrics(&sessions))
    }

    pub async fn daily_trends(&self) -> AppResult<Vec<DailyTrend>> {
        let sessions = self.load_all().await?;
        Ok(daily_trends(&sessions))
    }

    pub async fn segment_stats(&self) -> AppResult<Vec<DimensionStats>> {
        let sessions = self.load_all().await?;
        Ok(segment_stats(&sessions))
    }

    /// Recent-versus-previous window deltas as of now.
    pub async fn anomalies(&self) -> AppResult<Vec<Anomaly>> {
        self.anomalies_at(Utc::now()).await
    }

    pub async fn anomalies_at(&self, now: DateTime<Utc>) -> AppResult<Vec<Anomaly>> {
        let horizon = now - chrono::Duration::days(self.analysis.anomaly_previous_days);
        let sessions = self
            .store
            .list_sessions(&SessionFilter::default().started_after(horizon))
            .await?;
        Ok(detect_anomalies(
            &sessions,
            now,
            self.analysis.anomaly_recent_days,
            self.analysis.anomaly_previous_days,
        ))
    }

    /// Stored insights, highest impact first.
    pub async fn list_insights(&self) -> AppResult<Vec<Insight>> {
        Ok(self.store.list_insights().await?)
    }

    /// `Ok(None)` when no insight has this id.
    pub async fn insight_detail(&self, id: &str) -> AppResult<Option<InsightDetail>> {
        let Some(insight) = self.store.get_insight(id).await? else {
            return Ok(None);
        };
        let sessions = self.load_all().await?;
        let detail = compare_segment(&sessions, &insight.filters.targeting);
        Ok(Some(InsightDetail { insight, detail }))
    }

    /// Page `page` (1-based; 0 is treated as 1) of sessions, newest first.
    pub async fn sessions_page(&self, page: u32) -> AppResult<SessionsPage> {
        let page = page.max(1);
        let total = self.store.count_sessions().await?;
        let sessions = self
            .store
            .list_sessions(&SessionFilter::page(page, SESSIONS_PER_PAGE))
            .await?;
        let total_pages = total.div_ceil(u64::from(SESSIONS_PER_PAGE)) as u32;

        Ok(SessionsPage {
            sessions,
            total,
            page,
            total_pages,
        })
    }

    /// Wipe the store, generate a fresh demo population and recompute.
    pub async fn seed_demo_data(&self, sessions: usize, days: u32) -> AppResult<SeedSummary> {
        let generated = FixtureGenerator::new(sessions, days).generate(Utc::now());
        self.seed_with(generated).await
    }

    /// Replace every session with `sessions` and recompute.
    ///
    /// Runs under the recompute lock; the previous insight batch stays
    /// readable until the new one replaces it.
    pub async fn seed_with(&self, sessions: Vec<Session>) -> AppResult<SeedSummary> {
        let _guard = self.recompute_lock.lock().await;

        self.store.clear_sessions().await?;
        self.store.insert_sessions(&sessions).await?;
        info!(sessions = sessions.len(), "Seeded session store");

        let insights = self.recompute_locked().await?;
        Ok(SeedSummary {
            seeded: sessions.len(),
            insights,
        })
    }

    async fn load_all(&self) -> AppResult<Vec<Session>> {
        Ok(self.store.list_sessions(&SessionFilter::default()).await?)
    }
}

fn build_insight(
    draft: InsightDraft,
    narrative: Narrative,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Insight {
    let impact_score = draft.impact_score();
    Insight {
        id: Uuid::new_v4().to_string(),
        window_start,
        window_end,
        filters: InsightFilters {
            segment: draft.segment_label,
            targeting: draft.targeting,
            drivers: draft.drivers,
            metric_label: draft.metrics.metric_label,
            lift: draft.metrics.lift,
        },
        title: narrative.title,
        evidence: narrative.evidence,
        impact_score,
        recommended_fixes: narrative.recommended_fixes,
        experiment_plan: narrative.experiment_plan,
        status: InsightStatus::New,
        created_at,
    }
}
