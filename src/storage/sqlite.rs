use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

use super::{Event, Insight, InsightFilters, Session, SessionFilter, SessionStore, SortOrder};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SESSION_COLUMNS: &str = "id, started_at, user_type, device, payment_method, gateway, \
     coupon_status, city, pincode, cart_value, shipping_eta_shown, prepaid, modules_used, \
     outcome, order_value";

const INSIGHT_COLUMNS: &str = "id, window_start, window_end, filters, title, evidence, \
     impact_score, recommended_fixes, experiment_plan, status, created_at";

/// SQLite-backed session store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database file and run migrations
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database for tests; a single connection keeps one shared database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization {
            column: column.to_string(),
            message: e.to_string(),
        })
}

fn parse_enum<T: FromStr<Err = String>>(column: &str, raw: &str) -> StorageResult<T> {
    raw.parse().map_err(|message| StorageError::Serialization {
        column: column.to_string(),
        message,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization {
        column: column.to_string(),
        message: e.to_string(),
    })
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        column: column.to_string(),
        message: e.to_string(),
    })
}

/// Append the WHERE / ORDER BY / LIMIT part of a session selection.
fn push_session_selection(builder: &mut QueryBuilder<'_, Sqlite>, filter: &SessionFilter) {
    if let Some(after) = &filter.started_after {
        builder.push(" WHERE started_at >= ");
        builder.push_bind(ts(after));
    }

    builder.push(match filter.order {
        SortOrder::Ascending => " ORDER BY started_at ASC, id ASC",
        SortOrder::Descending => " ORDER BY started_at DESC, id DESC",
    });

    match (filter.limit, filter.offset) {
        (Some(limit), offset) => {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
            builder.push(" OFFSET ");
            builder.push_bind(i64::from(offset.unwrap_or(0)));
        }
        (None, Some(offset)) => {
            builder.push(" LIMIT -1 OFFSET ");
            builder.push_bind(i64::from(offset));
        }
        (None, None) => {}
    }
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn list_sessions(&self, filter: &SessionFilter) -> StorageResult<Vec<Session>> {
        let mut sessions_query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM sessions",
            SESSION_COLUMNS
        ));
        push_session_selection(&mut sessions_query, filter);

        let rows: Vec<SessionRow> = sessions_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        // Events for exactly the selected sessions, via the same selection.
        let mut events_query = QueryBuilder::<Sqlite>::new(
            "SELECT e.id, e.session_id, e.event_type, e.ts, e.meta FROM events e \
             JOIN (SELECT id FROM sessions",
        );
        push_session_selection(&mut events_query, filter);
        events_query.push(") s ON e.session_id = s.id ORDER BY e.ts ASC, e.seq ASC");

        let event_rows: Vec<EventRow> = events_query.build_query_as().fetch_all(&self.pool).await?;

        let mut events_by_session: HashMap<String, Vec<Event>> = HashMap::new();
        for row in event_rows {
            let session_id = row.session_id.clone();
            events_by_session
                .entry(session_id)
                .or_default()
                .push(Event::try_from(row)?);
        }

        let sessions = rows
            .into_iter()
            .map(|row| {
                let mut session = Session::try_from(row)?;
                session.events = events_by_session.remove(&session.id).unwrap_or_default();
                Ok(session)
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!(count = sessions.len(), "Loaded sessions");
        Ok(sessions)
    }

    async fn count_sessions(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn insert_sessions(&self, sessions: &[Session]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for session in sessions {
            sqlx::query(
                r#"
                INSERT INTO sessions (id, started_at, user_type, device, payment_method, gateway,
                    coupon_status, city, pincode, cart_value, shipping_eta_shown, prepaid,
                    modules_used, outcome, order_value)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.id)
            .bind(ts(&session.started_at))
            .bind(session.user_type.as_str())
            .bind(session.device.as_str())
            .bind(session.payment_method.as_str())
            .bind(session.gateway.as_str())
            .bind(session.coupon_status.as_str())
            .bind(&session.city)
            .bind(&session.pincode)
            .bind(session.cart_value)
            .bind(session.shipping_eta_shown)
            .bind(session.prepaid)
            .bind(to_json("modules_used", &session.modules_used)?)
            .bind(session.outcome.as_str())
            .bind(session.order_value)
            .execute(&mut *tx)
            .await?;

            for (seq, event) in session.events.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO events (id, session_id, seq, event_type, ts, meta)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&event.id)
                .bind(&session.id)
                .bind(seq as i64)
                .bind(event.event_type.as_str())
                .bind(ts(&event.ts))
                .bind(to_json("meta", &event.meta)?)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        info!(count = sessions.len(), "Inserted sessions");
        Ok(())
    }

    async fn clear_sessions(&self) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM events").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sessions").execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_insights(&self, insights: &[Insight]) -> StorageResult<()> {
        // Serialize up front so nothing can fail between DELETE and COMMIT
        // except the database itself.
        let rows = insights
            .iter()
            .map(|insight| {
                Ok((
                    insight,
                    to_json("filters", &insight.filters)?,
                    to_json("evidence", &insight.evidence)?,
                    to_json("recommended_fixes", &insight.recommended_fixes)?,
                    to_json("experiment_plan", &insight.experiment_plan)?,
                ))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM insights").execute(&mut *tx).await?;

        for (insight, filters, evidence, fixes, plan) in rows {
            sqlx::query(
                r#"
                INSERT INTO insights (id, window_start, window_end, filters, title, evidence,
                    impact_score, recommended_fixes, experiment_plan, status, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&insight.id)
            .bind(ts(&insight.window_start))
            .bind(ts(&insight.window_end))
            .bind(filters)
            .bind(&insight.title)
            .bind(evidence)
            .bind(insight.impact_score)
            .bind(fixes)
            .bind(plan)
            .bind(insight.status.as_str())
            .bind(ts(&insight.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(count = insights.len(), "Replaced insight collection");
        Ok(())
    }

    async fn list_insights(&self) -> StorageResult<Vec<Insight>> {
        let rows: Vec<InsightRow> = sqlx::query_as(&format!(
            "SELECT {} FROM insights ORDER BY impact_score DESC, created_at ASC",
            INSIGHT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Insight::try_from).collect()
    }

    async fn get_insight(&self, id: &str) -> StorageResult<Option<Insight>> {
        let row: Option<InsightRow> = sqlx::query_as(&format!(
            "SELECT {} FROM insights WHERE id = ?",
            INSIGHT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Insight::try_from).transpose()
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    started_at: String,
    user_type: String,
    device: String,
    payment_method: String,
    gateway: String,
    coupon_status: String,
    city: String,
    pincode: String,
    cart_value: f64,
    shipping_eta_shown: bool,
    prepaid: bool,
    modules_used: String,
    outcome: String,
    order_value: f64,
}

impl TryFrom<SessionRow> for Session {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> StorageResult<Self> {
        Ok(Self {
            started_at: parse_ts("started_at", &row.started_at)?,
            user_type: parse_enum("user_type", &row.user_type)?,
            device: parse_enum("device", &row.device)?,
            payment_method: parse_enum("payment_method", &row.payment_method)?,
            gateway: parse_enum("gateway", &row.gateway)?,
            coupon_status: parse_enum("coupon_status", &row.coupon_status)?,
            modules_used: parse_json("modules_used", &row.modules_used)?,
            outcome: parse_enum("outcome", &row.outcome)?,
            id: row.id,
            city: row.city,
            pincode: row.pincode,
            cart_value: row.cart_value,
            shipping_eta_shown: row.shipping_eta_shown,
            prepaid: row.prepaid,
            order_value: row.order_value,
            events: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    session_id: String,
    event_type: String,
    ts: String,
    meta: String,
}

impl TryFrom<EventRow> for Event {
    type Error = StorageError;

    fn try_from(row: EventRow) -> StorageResult<Self> {
        Ok(Self {
            id: row.id,
            event_type: parse_enum("event_type", &row.event_type)?,
            ts: parse_ts("ts", &row.ts)?,
            meta: parse_json("meta", &row.meta)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InsightRow {
    id: String,
    window_start: String,
    window_end: String,
    filters: String,
    title: String,
    evidence: String,
    impact_score: f64,
    recommended_fixes: String,
    experiment_plan: String,
    status: String,
    created_at: String,
}

impl TryFrom<InsightRow> for Insight {
    type Error = StorageError;

    fn try_from(row: InsightRow) -> StorageResult<Self> {
        let filters: InsightFilters = parse_json("filters", &row.filters)?;

        Ok(Self {
            id: row.id,
            window_start: parse_ts("window_start", &row.window_start)?,
            window_end: parse_ts("window_end", &row.window_end)?,
            filters,
            title: row.title,
            evidence: parse_json("evidence", &row.evidence)?,
            impact_score: row.impact_score,
            recommended_fixes: parse_json("recommended_fixes", &row.recommended_fixes)?,
            experiment_plan: parse_json("experiment_plan", &row.experiment_plan)?,
            status: parse_enum("status", &row.status)?,
            created_at: parse_ts("created_at", &row.created_at)?,
        })
    }
}
