use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::info;

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::seed::{check_bounds, DEFAULT_DAYS, DEFAULT_SESSIONS};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");
    let start = Instant::now();

    let result = match tool_name {
        "insights_recompute" => handle_recompute(state).await,
        "insights_list" => to_value(state.engine.list_insights().await?),
        "insight_detail" => handle_insight_detail(state, arguments).await,
        "dashboard_metrics" => to_value(state.engine.dashboard_metrics().await?),
        "dashboard_trends" => to_value(state.engine.daily_trends().await?),
        "dashboard_anomalies" => to_value(state.engine.anomalies().await?),
        "segment_stats" => handle_segment_stats(state).await,
        "sessions_list" => handle_sessions_list(state, arguments).await,
        "demo_seed" => handle_demo_seed(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    };

    info!(
        tool = %tool_name,
        latency_ms = start.elapsed().as_millis(),
        success = result.is_ok(),
        "Tool call finished"
    );
    result
}

async fn handle_recompute(state: &SharedState) -> McpResult<Value> {
    let created = state.engine.recompute().await?;
    Ok(json!({ "insights": created }))
}

async fn handle_insight_detail(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct DetailParams {
        id: String,
    }

    let params: DetailParams = parse_arguments("insight_detail", arguments)?;

    match state.engine.insight_detail(&params.id).await? {
        Some(detail) => to_value(detail),
        None => Err(McpError::NotFound {
            resource: "insight".to_string(),
            id: params.id,
        }),
    }
}

/// Keyed by dimension name, each holding that dimension's segment rows.
async fn handle_segment_stats(state: &SharedState) -> McpResult<Value> {
    let stats = state.engine.segment_stats().await?;
    let mut table = serde_json::Map::new();
    for dimension in stats {
        table.insert(
            dimension.dimension.key().to_string(),
            serde_json::to_value(dimension.segments)?,
        );
    }
    Ok(Value::Object(table))
}

async fn handle_sessions_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize, Default)]
    struct ListParams {
        #[serde(default)]
        page: Option<u32>,
    }

    let params: ListParams = parse_optional_arguments("sessions_list", arguments)?;
    to_value(state.engine.sessions_page(params.page.unwrap_or(1)).await?)
}

async fn handle_demo_seed(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize, Default)]
    struct SeedParams {
        #[serde(default)]
        sessions: Option<usize>,
        #[serde(default)]
        days: Option<u32>,
    }

    let params: SeedParams = parse_optional_arguments("demo_seed", arguments)?;
    let sessions = params.sessions.unwrap_or(DEFAULT_SESSIONS);
    let days = params.days.unwrap_or(DEFAULT_DAYS);

    check_bounds(sessions, days).map_err(|message| McpError::InvalidParameters {
        tool_name: "demo_seed".to_string(),
        message,
    })?;

    to_value(state.engine.seed_demo_data(sessions, days).await?)
}

fn to_value<T: serde::Serialize>(value: T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(McpError::Json)
}

fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Like [`parse_arguments`], but absent arguments mean all defaults.
fn parse_optional_arguments<T: serde::de::DeserializeOwned + Default>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        None | Some(Value::Null) => Ok(T::default()),
        args => parse_arguments(tool_name, args),
    }
}
