//! Controller configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `KULTA_HEALTH_PORT` | 8080 |
//! | `KULTA_REQUEUE_SECONDS` | 30 |
//! | `KULTA_CONFLICT_REQUEUE_SECONDS` | 2 |
//! | `KULTA_ERROR_REQUEUE_SECONDS` | 10 |
//! | `KULTA_INSTANCE_ID` | `$HOSTNAME` |

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_REQUEUE_SECONDS: u64 = 30;
pub const DEFAULT_CONFLICT_REQUEUE_SECONDS: u64 = 2;
pub const DEFAULT_ERROR_REQUEUE_SECONDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Port of the health and metrics server
    pub health_port: u16,
    /// Periodic requeue for settled rollouts
    pub requeue_interval: Duration,
    /// Requeue after a 409 so the next attempt sees a fresh snapshot
    pub conflict_requeue: Duration,
    /// Requeue after any other error
    pub error_requeue: Duration,
    /// Reporting instance for Kubernetes Events
    pub instance_id: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            health_port: DEFAULT_HEALTH_PORT,
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
            conflict_requeue: Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECONDS),
            error_requeue: Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECONDS),
            instance_id: None,
        }
    }
}

impl ControllerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (tests pass a map)
    ///
    /// Unparsable values fall back to their default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let seconds = |key: &str, default: u64| {
            Duration::from_secs(parse_or(key, lookup(key), default))
        };

        ControllerConfig {
            health_port: parse_or(
                "KULTA_HEALTH_PORT",
                lookup("KULTA_HEALTH_PORT"),
                DEFAULT_HEALTH_PORT,
            ),
            requeue_interval: seconds("KULTA_REQUEUE_SECONDS", DEFAULT_REQUEUE_SECONDS),
            conflict_requeue: seconds(
                "KULTA_CONFLICT_REQUEUE_SECONDS",
                DEFAULT_CONFLICT_REQUEUE_SECONDS,
            ),
            error_requeue: seconds("KULTA_ERROR_REQUEUE_SECONDS", DEFAULT_ERROR_REQUEUE_SECONDS),
            instance_id: lookup("KULTA_INSTANCE_ID")
                .or_else(|| lookup("HOSTNAME"))
                .filter(|id| !id.is_empty()),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = key, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
    }
}
