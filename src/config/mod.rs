use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub narrative: NarrativeConfig,
    pub analysis: AnalysisConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Which narrative generator backs insight text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeMode {
    Deterministic,
    Remote,
}

/// Narrative generation configuration
#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    pub mode: NarrativeMode,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Upper bound on a single draft's narrative call, fallback included.
    pub timeout_ms: u64,
}

/// Thresholds for segment mining, driver selection and anomaly windows
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub min_segment_volume: usize,
    pub min_abs_lift: f64,
    pub top_k: usize,
    pub driver_min_lift: f64,
    pub max_drivers: usize,
    pub anomaly_recent_days: i64,
    pub anomaly_previous_days: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/insights.db".to_string()),
            ),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_or("MAX_RETRIES", 2),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 500),
        };

        let api_key = env::var("NARRATIVE_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let mode = match env::var("NARRATIVE_MODE")
            .unwrap_or_else(|_| "deterministic".to_string())
            .to_lowercase()
            .as_str()
        {
            "deterministic" => NarrativeMode::Deterministic,
            "remote" => NarrativeMode::Remote,
            other => {
                return Err(AppError::Config {
                    message: format!(
                        "NARRATIVE_MODE must be 'deterministic' or 'remote', got '{}'",
                        other
                    ),
                })
            }
        };

        let narrative = NarrativeConfig {
            mode,
            api_key,
            base_url: env::var("NARRATIVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("NARRATIVE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            timeout_ms: parse_or("NARRATIVE_TIMEOUT_MS", 15000),
        };

        let defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            min_segment_volume: parse_or("ANALYSIS_MIN_SEGMENT_VOLUME", defaults.min_segment_volume),
            min_abs_lift: parse_or("ANALYSIS_MIN_ABS_LIFT", defaults.min_abs_lift),
            top_k: parse_or("ANALYSIS_TOP_K", defaults.top_k),
            driver_min_lift: parse_or("ANALYSIS_DRIVER_MIN_LIFT", defaults.driver_min_lift),
            max_drivers: parse_or("ANALYSIS_MAX_DRIVERS", defaults.max_drivers),
            anomaly_recent_days: parse_or("ANOMALY_RECENT_DAYS", defaults.anomaly_recent_days),
            anomaly_previous_days: parse_or(
                "ANOMALY_PREVIOUS_DAYS",
                defaults.anomaly_previous_days,
            ),
        };

        if analysis.anomaly_previous_days <= analysis.anomaly_recent_days {
            return Err(AppError::Config {
                message: "ANOMALY_PREVIOUS_DAYS must be greater than ANOMALY_RECENT_DAYS"
                    .to_string(),
            });
        }

        Ok(Config {
            database,
            logging,
            request,
            narrative,
            analysis,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            request: RequestConfig::default(),
            narrative: NarrativeConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/insights.db"),
            max_connections: 5,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            mode: NarrativeMode::Deterministic,
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 15000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_segment_volume: 120,
            min_abs_lift: 3.0,
            top_k: 10,
            driver_min_lift: 2.0,
            max_drivers: 4,
            anomaly_recent_days: 2,
            anomaly_previous_days: 7,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
