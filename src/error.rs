// Error taxonomy for the ingestion engine
//
// Each layer owns one enum; callers decide whether a failure is retried,
// recorded into a report, or mapped to an HTTP status.

use thiserror::Error;

// ============================================================================
// BANK GATEWAY ERRORS
// ============================================================================

/// Errors raised by a `BankGateway`.
///
/// Only `RateLimited` is retried by the sync orchestrator. Everything else
/// fails the current account immediately.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The bank rejected the call because the global request budget is spent
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Missing or rejected API token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unknown account or endpoint
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success response from the bank
    #[error("Bank API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Requested statement window exceeds what the bank accepts
    #[error("Invalid statement window: {0}")]
    InvalidWindow(String),

    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response parsed but carried values the engine cannot use
    #[error("Malformed bank response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// True for the single error kind that is retried with backoff.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

// ============================================================================
// STORE ERRORS
// ============================================================================

/// Errors raised by a primary-store repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A UNIQUE constraint rejected the insert. Callers treat this as
    /// "already persisted", never as a hard failure.
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The store cannot serve requests (poisoned lock, closed connection)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Result type alias for primary-store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// MIRROR ERRORS
// ============================================================================

/// Errors raised by the mirror store.
///
/// These never escape the dual-write layer; they are logged and counted.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mirror sheet error: {0}")]
    Csv(#[from] csv::Error),

    #[error("mirror sheet {sheet} has unexpected header: {found}")]
    Header { sheet: String, found: String },

    #[error("mirror unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// QUEUE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Queue API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker accepted the call but returned no message id
    #[error("Queue returned no message id")]
    MissingMessageId,

    /// The local delivery loop has shut down
    #[error("Queue closed")]
    Closed,
}

// ============================================================================
// SYNC ERRORS
// ============================================================================

/// Failure of one account's transaction sync. Displays as the inner error
/// so reports read "Failed to sync account <name> (<id>): <inner message>".
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// WEBHOOK ERRORS
// ============================================================================

/// One variant per decoding stage of a push delivery.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid push envelope: {0}")]
    Envelope(String),

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid JSON payload: {0}")]
    Json(String),

    #[error("Payload does not match transaction schema: {0}")]
    Schema(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Status for the push endpoint: 400 is acknowledged for good, 500 asks
    /// the broker to redeliver.
    pub fn status_code(&self) -> u16 {
        match self {
            ProcessError::Decode(_) | ProcessError::UnknownAccount(_) => 400,
            ProcessError::Store(_) => 500,
        }
    }
}
