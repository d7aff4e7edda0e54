//! Crate-wide error taxonomy.
//!
//! Every error surfaced to a client maps to one of the stable codes below.
//! Component-local error enums (in `storage`, `policy`, `split`, ...)
//! convert into this type at the seam where they cross into the gateway.

use serde::Serialize;
use thiserror::Error;

/// Stable, documented error code. Part of the wire contract: clients match
/// on `code`, not on `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidQuery,
    SqlSyntaxError,
    InvalidPolicy,
    InvalidPhase,
    AuthInvalidToken,
    AuthTokenExpired,
    TenantAccessDenied,
    ShardCapacity,
    RateLimited,
    Retryable,
    Timeout,
    CircuitOpen,
    ConflictUnique,
    TransactionNotFound,
    IncompatiblePolicy,
    SplitNotFound,
    InternalError,
}

impl ErrorCode {
    /// Whether a caller should retry this error with backoff + jitter.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Retryable | Self::Timeout | Self::CircuitOpen)
    }
}

/// Top-level error returned by any seam the gateway dispatches through.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("SQL syntax error: {0}")]
    SqlSyntaxError(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid phase transition: {0}")]
    InvalidPhase(String),

    #[error("invalid auth token")]
    AuthInvalidToken,

    #[error("auth token expired")]
    AuthTokenExpired,

    #[error("tenant access denied")]
    TenantAccessDenied,

    #[error("shard at capacity")]
    ShardCapacity,

    #[error("rate limited")]
    RateLimited,

    #[error("retryable error: {0}")]
    Retryable(String),

    #[error("request timed out")]
    Timeout,

    #[error("circuit open for shard {0}")]
    CircuitOpen(String),

    #[error("unique constraint violated")]
    ConflictUnique,

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("incompatible routing policy: {0}")]
    IncompatiblePolicy(String),

    #[error("split plan not found: {0}")]
    SplitNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        use Error::*;
        match self {
            InvalidQuery(_) => ErrorCode::InvalidQuery,
            SqlSyntaxError(_) => ErrorCode::SqlSyntaxError,
            InvalidPolicy(_) => ErrorCode::InvalidPolicy,
            InvalidPhase(_) => ErrorCode::InvalidPhase,
            AuthInvalidToken => ErrorCode::AuthInvalidToken,
            AuthTokenExpired => ErrorCode::AuthTokenExpired,
            TenantAccessDenied => ErrorCode::TenantAccessDenied,
            ShardCapacity => ErrorCode::ShardCapacity,
            RateLimited => ErrorCode::RateLimited,
            Retryable(_) => ErrorCode::Retryable,
            Timeout => ErrorCode::Timeout,
            CircuitOpen(_) => ErrorCode::CircuitOpen,
            ConflictUnique => ErrorCode::ConflictUnique,
            TransactionNotFound(_) => ErrorCode::TransactionNotFound,
            IncompatiblePolicy(_) => ErrorCode::IncompatiblePolicy,
            SplitNotFound(_) => ErrorCode::SplitNotFound,
            Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// `{success:false, error:{code, message, details?}}` envelope (spec §6).
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorEnvelope {
    fn from(err: &Error) -> Self {
        ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: err.code(),
                message: err.to_string(),
                details: None,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
