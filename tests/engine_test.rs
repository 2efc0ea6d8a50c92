//! Integration tests for the insight engine
//!
//! Runs recompute and the read operations end to end against in-memory
//! SQLite, plus a mocked store for failure propagation and custom narrators
//! for the timeout/panic fallback paths.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use tokio_test::{assert_err, assert_ok};

use checkout_insights::analytics::InsightDraft;
use checkout_insights::config::{AnalysisConfig, DatabaseConfig};
use checkout_insights::engine::InsightEngine;
use checkout_insights::error::{AppError, StorageError, StorageResult};
use checkout_insights::narrative::{DeterministicNarrator, Narrative, NarrativeGenerator};
use checkout_insights::seed::FixtureGenerator;
use checkout_insights::storage::{
    Device, Insight, Outcome, Session, SessionFilter, SessionStore, SqliteStorage,
};

mock! {
    pub Store {}

    #[async_trait]
    impl SessionStore for Store {
        async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<Session>>;
        async fn count_sessions(&self) -> StorageResult<u64>;
        async fn insert_sessions(&self, sessions: &[Session]) -> StorageResult<()>;
        async fn clear_sessions(&self) -> StorageResult<()>;
        async fn replace_insights(&self, insights: &[Insight]) -> StorageResult<()>;
        async fn list_insights(&self) -> StorageResult<Vec<Insight>>;
        async fn get_insight(&self, id: &str) -> StorageResult<Option<Insight>>;
    }
}

/// Never answers within any reasonable timeout.
struct StalledNarrator;

#[async_trait]
impl NarrativeGenerator for StalledNarrator {
    async fn generate(&self, draft: &InsightDraft) -> Narrative {
        tokio::time::sleep(Duration::from_secs(30)).await;
        DeterministicNarrator.render(draft)
    }
}

struct PanickingNarrator;

#[async_trait]
impl NarrativeGenerator for PanickingNarrator {
    async fn generate(&self, _draft: &InsightDraft) -> Narrative {
        panic!("narrator crashed");
    }
}

/// Marks every title so tests can tell it apart from the fallback.
struct TaggingNarrator;

#[async_trait]
impl NarrativeGenerator for TaggingNarrator {
    async fn generate(&self, draft: &InsightDraft) -> Narrative {
        let mut narrative = DeterministicNarrator.render(draft);
        narrative.title = format!("[tagged] {}", narrative.title);
        narrative
    }
}

/// Delegates to SQLite, yielding before every call and logging its name.
struct RecordingStore {
    inner: Arc<SqliteStorage>,
    calls: StdMutex<Vec<String>>,
}

impl RecordingStore {
    fn new(inner: Arc<SqliteStorage>) -> Self {
        Self {
            inner,
            calls: StdMutex::new(Vec::new()),
        }
    }

    async fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
        tokio::task::yield_now().await;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<Session>> {
        self.record("list_sessions".to_string()).await;
        self.inner.list_sessions(filter).await
    }

    async fn count_sessions(&self) -> StorageResult<u64> {
        self.record("count_sessions".to_string()).await;
        self.inner.count_sessions().await
    }

    async fn insert_sessions(&self, sessions: &[Session]) -> StorageResult<()> {
        self.record("insert_sessions".to_string()).await;
        self.inner.insert_sessions(sessions).await
    }

    async fn clear_sessions(&self) -> StorageResult<()> {
        self.record("clear_sessions".to_string()).await;
        self.inner.clear_sessions().await
    }

    async fn replace_insights(&self, insights: &[Insight]) -> StorageResult<()> {
        self.record(format!("replace_insights:{}", insights.len())).await;
        self.inner.replace_insights(insights).await
    }

    async fn list_insights(&self) -> StorageResult<Vec<Insight>> {
        self.inner.list_insights().await
    }

    async fn get_insight(&self, id: &str) -> StorageResult<Option<Insight>> {
        self.inner.get_insight(id).await
    }
}

async fn create_test_storage() -> Arc<SqliteStorage> {
    Arc::new(
        SqliteStorage::new_in_memory()
            .await
            .expect("Failed to create in-memory storage"),
    )
}

fn engine_with(store: Arc<dyn SessionStore>, narrator: Arc<dyn NarrativeGenerator>) -> InsightEngine {
    InsightEngine::new(store, narrator, AnalysisConfig::default())
}

/// 200 android at 75% abandonment and 300 iOS at ~16.7%.
fn android_scenario() -> Vec<Session> {
    let now = Utc::now() - chrono::Duration::hours(2);
    let build = |device: Device, count: usize, abandoned: usize| {
        (0..count).map(move |i| {
            let outcome = if i < abandoned {
                Outcome::Abandoned
            } else {
                Outcome::Converted
            };
            Session::new(now).with_device(device).with_outcome(outcome)
        })
    };
    build(Device::Android, 200, 150)
        .chain(build(Device::Ios, 300, 50))
        .collect()
}

fn insight_keys(insights: &[Insight]) -> BTreeSet<(String, String, u64)> {
    insights
        .iter()
        .map(|i| {
            (
                i.filters.segment.clone(),
                i.filters.metric_label.clone(),
                i.filters.lift.to_bits(),
            )
        })
        .collect()
}

#[cfg(test)]
mod recompute_tests {
    use super::*;

    #[tokio::test]
    async fn test_recompute_persists_ranked_insights() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let created = assert_ok!(engine.recompute().await);
        let insights = engine.list_insights().await.unwrap();

        assert_eq!(created, insights.len());
        assert!(created > 0 && created <= 10);
        for pair in insights.windows(2) {
            assert!(pair[0].impact_score >= pair[1].impact_score);
        }

        let android = insights
            .iter()
            .find(|i| i.filters.segment == "device = android" && i.filters.metric_label == "Abandonment")
            .expect("android abandonment insight");
        assert_eq!(android.filters.lift, 35.0);
        assert_eq!(android.impact_score, 35.0 * 200.0);
        assert_eq!(android.title, "device = android shows Abandonment lift of +35.0 pts");
        assert_eq!(android.experiment_plan.targeting, android.filters.targeting);
        assert!(android.window_start <= android.window_end);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent_and_replaces() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        engine.recompute().await.unwrap();
        let first = engine.list_insights().await.unwrap();
        engine.recompute().await.unwrap();
        let second = engine.list_insights().await.unwrap();

        assert_eq!(insight_keys(&first), insight_keys(&second));
        assert_eq!(first.len(), second.len());
        let first_ids: BTreeSet<String> = first.iter().map(|i| i.id.clone()).collect();
        assert!(second.iter().all(|i| !first_ids.contains(&i.id)));
    }

    #[tokio::test]
    async fn test_concurrent_recomputes_never_mix_batches() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let (a, b) = tokio::join!(engine.recompute(), engine.recompute());
        let expected = assert_ok!(a);
        assert_eq!(assert_ok!(b), expected);

        let insights = engine.list_insights().await.unwrap();
        assert_eq!(insights.len(), expected);
        assert_eq!(insight_keys(&insights).len(), expected);
    }

    #[tokio::test]
    async fn test_seed_and_recompute_do_not_interleave() {
        let recording = Arc::new(RecordingStore::new(create_test_storage().await));
        let engine = engine_with(recording.clone(), Arc::new(DeterministicNarrator));

        let (seeded, recomputed) =
            tokio::join!(engine.seed_with(android_scenario()), engine.recompute());
        let seeded = assert_ok!(seeded);
        assert!(seeded.insights > 0);
        assert_ok!(recomputed);

        let calls = recording.calls();
        let clear = calls.iter().position(|c| c == "clear_sessions").unwrap();
        assert_eq!(calls[clear + 1], "insert_sessions", "calls: {:?}", calls);

        // Nothing mined the store between the wipe and the insert.
        let replaces: Vec<&String> = calls
            .iter()
            .filter(|c| c.starts_with("replace_insights:"))
            .collect();
        assert_eq!(replaces.len(), 2);
        let last = replaces[1];
        assert_ne!(last, "replace_insights:0");
        assert_eq!(engine.list_insights().await.unwrap().len(), seeded.insights);
    }

    #[tokio::test]
    async fn test_reseed_keeps_previous_batch_readable() {
        let storage = create_test_storage().await;
        let recording = Arc::new(RecordingStore::new(storage.clone()));
        let engine = engine_with(recording, Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();
        let before = engine.recompute().await.unwrap();
        assert!(before > 0);

        let reader = async {
            let mut observed = Vec::new();
            for _ in 0..20 {
                observed.push(storage.list_insights().await.unwrap().len());
                tokio::task::yield_now().await;
            }
            observed
        };
        let (seeded, observed) = tokio::join!(engine.seed_with(android_scenario()), reader);

        assert_ok!(seeded);
        assert!(observed.iter().all(|&n| n > 0), "observed: {:?}", observed);
    }

    #[tokio::test]
    async fn test_recompute_on_empty_store_clears_insights() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();
        engine.recompute().await.unwrap();

        storage.clear_sessions().await.unwrap();
        let created = assert_ok!(engine.recompute().await);

        assert_eq!(created, 0);
        assert!(engine.list_insights().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_narrator_text_is_stored() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(TaggingNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        engine.recompute().await.unwrap();
        let insights = engine.list_insights().await.unwrap();
        assert!(insights.iter().all(|i| i.title.starts_with("[tagged] ")));
    }

    #[tokio::test]
    async fn test_stalled_narrator_falls_back_after_timeout() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(StalledNarrator))
            .with_narrative_timeout(Duration::from_millis(50));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let created = tokio::time::timeout(Duration::from_secs(10), engine.recompute())
            .await
            .expect("recompute must not wait for the stalled narrator")
            .unwrap();

        let insights = engine.list_insights().await.unwrap();
        assert_eq!(insights.len(), created);
        assert!(insights.iter().all(|i| i.title.contains(" shows ")));
    }

    #[tokio::test]
    async fn test_panicking_narrator_falls_back() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(PanickingNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let created = assert_ok!(engine.recompute().await);
        assert!(created > 0);
        let insights = engine.list_insights().await.unwrap();
        assert!(insights.iter().all(|i| i.recommended_fixes.len() == 3));
    }
}

#[cfg(test)]
mod read_tests {
    use super::*;

    #[tokio::test]
    async fn test_insight_detail_matches_insight_volume() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();
        engine.recompute().await.unwrap();

        for insight in engine.list_insights().await.unwrap() {
            let detail = engine.insight_detail(&insight.id).await.unwrap().unwrap();
            assert_eq!(detail.insight.id, insight.id);
            assert_eq!(detail.detail.targeting, insight.filters.targeting);
            let volume = detail.detail.comparison.volume as f64;
            assert!((volume * insight.filters.lift.abs() - insight.impact_score).abs() < 1e-6);
            assert_eq!(detail.detail.funnel.len(), 5);
        }
    }

    #[tokio::test]
    async fn test_insight_detail_unknown_id_is_none() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage, Arc::new(DeterministicNarrator));

        let detail = assert_ok!(engine.insight_detail("no-such-insight").await);
        assert!(detail.is_none());
    }

    #[tokio::test]
    async fn test_dashboard_reads() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let metrics = engine.dashboard_metrics().await.unwrap();
        assert_eq!(metrics.checkout_starts, 500);
        assert_eq!(metrics.abandonment_rate, 40.0);
        assert_eq!(metrics.conversion_rate, 60.0);
        assert_eq!(metrics.aov, 799.0);

        let trends = engine.daily_trends().await.unwrap();
        assert!(!trends.is_empty());

        let stats = engine.segment_stats().await.unwrap();
        assert_eq!(stats.len(), 7);

        let anomalies = engine.anomalies().await.unwrap();
        assert_eq!(anomalies.len(), 3);
        assert_eq!(anomalies[0].label, "Conversion");
        assert_eq!(anomalies[0].current, 60.0);
        assert_eq!(anomalies[0].previous, 0.0);
    }

    #[tokio::test]
    async fn test_sessions_page() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        let sessions = FixtureGenerator::new(250, 5).with_seed(11).generate(Utc::now());
        storage.insert_sessions(&sessions).await.unwrap();

        let first = engine.sessions_page(0).await.unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(first.total, 250);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.sessions.len(), 100);
        assert!(first.sessions[0].started_at >= first.sessions[99].started_at);

        let last = engine.sessions_page(3).await.unwrap();
        assert_eq!(last.sessions.len(), 50);

        let beyond = engine.sessions_page(9).await.unwrap();
        assert!(beyond.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_page_huge_page_is_empty() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let page = assert_ok!(engine.sessions_page(u32::MAX).await);
        assert_eq!(page.page, u32::MAX);
        assert_eq!(page.total, 500);
        assert_eq!(page.total_pages, 5);
        assert!(page.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_seed_demo_data_replaces_population() {
        let storage = create_test_storage().await;
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();

        let summary = assert_ok!(engine.seed_demo_data(1500, 14).await);

        assert_eq!(summary.seeded, 1500);
        assert_eq!(storage.count_sessions().await.unwrap(), 1500);
        assert_eq!(engine.list_insights().await.unwrap().len(), summary.insights);
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    fn unavailable() -> StorageError {
        StorageError::Connection {
            message: "database is locked".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_failure_aborts_recompute_without_replace() {
        let mut store = MockStore::new();
        store
            .expect_list_sessions()
            .returning(|_| Err(unavailable()));
        store.expect_replace_insights().times(0);

        let engine = engine_with(Arc::new(store), Arc::new(DeterministicNarrator));
        let err = assert_err!(engine.recompute().await);

        assert!(matches!(err, AppError::Storage(StorageError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_replace_failure_propagates() {
        let mut store = MockStore::new();
        store
            .expect_list_sessions()
            .returning(|_| Ok(android_scenario()));
        store
            .expect_replace_insights()
            .times(1)
            .returning(|_| Err(unavailable()));

        let engine = engine_with(Arc::new(store), Arc::new(DeterministicNarrator));
        assert_err!(engine.recompute().await);
    }

    #[tokio::test]
    async fn test_read_failure_propagates() {
        let mut store = MockStore::new();
        store
            .expect_get_insight()
            .returning(|_| Err(unavailable()));

        let engine = engine_with(Arc::new(store), Arc::new(DeterministicNarrator));
        let err = assert_err!(engine.insight_detail("abc").await);
        assert!(err.to_string().contains("database is locked"));
    }
}

#[cfg(test)]
mod file_backed_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_see_empty_batch_during_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("insights.db"),
            max_connections: 4,
        };
        let storage = Arc::new(SqliteStorage::new(&config).await.unwrap());
        let engine = engine_with(storage.clone(), Arc::new(DeterministicNarrator));
        storage.insert_sessions(&android_scenario()).await.unwrap();
        let expected = engine.recompute().await.unwrap();
        assert!(expected > 0);

        let done = AtomicBool::new(false);
        let writer = async {
            for _ in 0..5 {
                assert_eq!(engine.recompute().await.unwrap(), expected);
            }
            done.store(true, Ordering::SeqCst);
        };
        let reader = async {
            let mut reads = 0;
            while !done.load(Ordering::SeqCst) {
                let batch = storage.list_insights().await.unwrap();
                assert_eq!(batch.len(), expected);
                assert_eq!(insight_keys(&batch).len(), expected);
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        };

        let ((), reads) = tokio::join!(writer, reader);
        assert!(reads > 0);
    }
}
