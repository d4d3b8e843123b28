use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A decision or command was rejected; state is unchanged.
    #[error("Rejected: {reason}")]
    Validation { reason: String },

    /// A second attempt to open a session with a busy counterpart.
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Negotiation session '{id}' not found")]
    SessionNotFound { id: String },

    #[error("Negotiation session '{id}' is already resolved")]
    SessionClosed { id: String },

    #[error("Territory '{id}' not found")]
    TerritoryNotFound { id: String },

    #[error("Term is over after month {month}")]
    TermOver { month: u32 },

    #[error("Unsupported document schema version {version}")]
    UnsupportedSchema { version: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict { reason: reason.into() }
    }
}

pub type SimResult<T> = Result<T, SimError>;
