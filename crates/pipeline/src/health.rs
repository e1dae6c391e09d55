//! Process-wide health and the error routing that feeds it.

use crate::error::Error;
use crate::status::{Outcome, StatusTracker};
use serde::{Serialize, Serializer};
use std::sync::{Arc, PoisonError, RwLock};
use time::UtcDateTime;
use time::format_description::well_known::Rfc3339;

/// Snapshot of the health state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub up: bool,
    /// Message of the failure that took health down; cleared on recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(serialize_with = "rfc3339")]
    pub changed_at: UtcDateTime,
}

fn rfc3339<S: Serializer>(at: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = at.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

/// Holder of the process-wide [`Health`], last writer wins.
#[derive(Debug)]
pub struct HealthIndicator {
    state: RwLock<Health>,
}
impl Default for HealthIndicator {
    fn default() -> Self {
        Self {
            state: RwLock::new(Health {
                up: true,
                detail: None,
                changed_at: UtcDateTime::now(),
            }),
        }
    }
}
impl HealthIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the process unhealthy with `detail`.
    pub fn report(&self, detail: impl Into<String>) {
        let detail = detail.into();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.up {
            tracing::warn!(detail, "Health is now DOWN");
        }
        *state = Health {
            up: false,
            detail: Some(detail),
            changed_at: UtcDateTime::now(),
        };
    }

    /// Mark the process healthy. Idempotent: an already healthy state is left
    /// untouched, including its timestamp.
    pub fn report_success(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.up {
            return;
        }
        tracing::info!("Health is now UP");
        *state = Health {
            up: true,
            detail: None,
            changed_at: UtcDateTime::now(),
        };
    }

    pub fn health(&self) -> Health {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Sends failures to the log and, unless transient, to the health indicator.
#[derive(Debug, Clone)]
pub struct ErrorRouter {
    health: Arc<HealthIndicator>,
}
impl ErrorRouter {
    pub fn new(health: Arc<HealthIndicator>) -> Self {
        Self { health }
    }

    /// Log `err` and take health down with its message. Transient errors
    /// (pool exhaustion) are only logged.
    pub fn route(&self, err: &Error) {
        if err.is_transient() {
            self.warn(err);
            return;
        }
        let kind = &**err;
        tracing::error!(error = ?err, "{kind}");
        self.health.report(kind.to_string());
    }

    /// Log `err` without touching health.
    pub fn warn(&self, err: &Error) {
        let kind = &**err;
        tracing::warn!(error = ?err, "{kind}");
    }
}

/// Read-only view over status and health.
#[derive(Debug, Clone)]
pub struct Monitor {
    status: Arc<StatusTracker>,
    health: Arc<HealthIndicator>,
}
impl Monitor {
    pub fn new(status: Arc<StatusTracker>, health: Arc<HealthIndicator>) -> Self {
        Self { status, health }
    }

    /// Outcome of the last unit for `name`, if any.
    pub fn inspect(&self, name: &str) -> Option<Outcome> {
        self.status.inspect(name)
    }

    pub fn health(&self) -> Health {
        self.health.health()
    }
}
