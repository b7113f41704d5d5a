//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::sink::ColumnMapping;

/// Shown to the visitor when a submission fails. The underlying reason is
/// only logged.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Per-flow configuration handed to the controller.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Collection (table) records are inserted into.
    pub collection: String,
    /// Source tag attached to analytics events, e.g. "hero_cta".
    pub source: String,
    pub column_mapping: ColumnMapping,
    pub failure_message: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            collection: "signups".to_string(),
            source: "landing".to_string(),
            column_mapping: ColumnMapping::default(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Where submissions are written.
#[derive(Debug, Clone)]
pub enum SinkBackend {
    /// Local libSQL database file.
    LibSql { path: PathBuf },
    /// Hosted table behind a PostgREST-style API.
    Rest {
        url: String,
        api_key: SecretString,
        timeout: Duration,
    },
}

/// Optional HTTP analytics capture endpoint.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub host: String,
    pub api_key: SecretString,
}

/// Server binary configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub sink: SinkBackend,
    pub analytics: Option<AnalyticsConfig>,
    /// JSON flow definition; the product-market-fit preset when absent.
    pub flow_file: Option<PathBuf>,
    /// CORS origin allowed to call the shell API; any origin when absent.
    pub allowed_origin: Option<String>,
    /// Open flows untouched for this long are closed and dropped.
    pub flow_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            sink: SinkBackend::LibSql {
                path: PathBuf::from("./data/signups.db"),
            },
            analytics: None,
            flow_file: None,
            allowed_origin: None,
            flow_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl ServerConfig {
    /// Read configuration from `SIGNUP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("SIGNUP_PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "SIGNUP_PORT".to_string(),
                message: format!("not a port number: {raw}"),
            })?,
            None => defaults.port,
        };

        let flow_ttl = match lookup("SIGNUP_FLOW_TTL_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "SIGNUP_FLOW_TTL_SECS".to_string(),
                        message: format!("expected a positive number of seconds, got `{raw}`"),
                    });
                }
            },
            None => defaults.flow_ttl,
        };

        let backend = lookup("SIGNUP_SINK").unwrap_or_else(|| "libsql".to_string());
        let sink = match backend.trim() {
            "libsql" => SinkBackend::LibSql {
                path: lookup("SIGNUP_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/signups.db")),
            },
            "rest" => {
                let url = lookup("SIGNUP_REST_URL")
                    .ok_or_else(|| ConfigError::MissingEnvVar("SIGNUP_REST_URL".to_string()))?;
                let api_key = lookup("SIGNUP_REST_KEY")
                    .ok_or_else(|| ConfigError::MissingEnvVar("SIGNUP_REST_KEY".to_string()))?;
                let timeout_secs: u64 = lookup("SIGNUP_REST_TIMEOUT_SECS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(10);
                SinkBackend::Rest {
                    url,
                    api_key: SecretString::from(api_key),
                    timeout: Duration::from_secs(timeout_secs),
                }
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "SIGNUP_SINK".to_string(),
                    message: format!("expected `libsql` or `rest`, got `{other}`"),
                });
            }
        };

        let analytics = match (lookup("SIGNUP_ANALYTICS_URL"), lookup("SIGNUP_ANALYTICS_KEY")) {
            (Some(host), Some(key)) => Some(AnalyticsConfig {
                host,
                api_key: SecretString::from(key),
            }),
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("SIGNUP_ANALYTICS_KEY".to_string()));
            }
            _ => None,
        };

        Ok(Self {
            port,
            sink,
            analytics,
            flow_file: lookup("SIGNUP_FLOW_FILE").map(PathBuf::from),
            allowed_origin: lookup("SIGNUP_ALLOWED_ORIGIN").filter(|s| !s.trim().is_empty()),
            flow_ttl,
        })
    }
}
