use thiserror::Error;

use crate::session::RunStatus;

/// Failures talking to the shared session record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend refused or could not complete the write (network, permission, ...)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record exists but could not be interpreted as a session state
    #[error("malformed record at {key}: {reason}")]
    Malformed { key: String, reason: String },

    /// Subscription's producer side went away
    #[error("subscription closed")]
    Closed,
}

/// Errors surfaced to whoever issued a controller command.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot {command} while {status}")]
    InvalidTransition {
        command: &'static str,
        status: RunStatus,
    },

    #[error("plan cannot change while a run is in progress")]
    PlanLocked,

    #[error("invalid {field}: {value}")]
    InvalidInput { field: &'static str, value: f64 },
}

pub type Result<T> = std::result::Result<T, OverlayError>;
