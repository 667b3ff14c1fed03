//! Typed error kinds for the session engine and its boundary (spec §7).
//!
//! Internal adapter/store code propagates `anyhow::Result` so context chains
//! stay intact; anything that reaches the engine's public operations is
//! mapped into this enum so the HTTP boundary can turn it into a status
//! code without ever seeing an opaque exception.

use thiserror::Error;

/// Errors the engine can return from its public operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Unknown session or config id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate id on create.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Session creation is currently suspended.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed id/parameters, or a bounded field exceeded its limit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Renderer endpoint reachable but not ready.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Adapter/transport failure not attributable to client input.
    #[error("internal error: {0}")]
    Internal(String),

    /// Terminal failure reported by the cluster scheduler.
    #[error("scheduler failure: {0}")]
    SchedulerFailure(String),
}

impl AppError {
    /// Maps this error to the HTTP status code the boundary should use.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Forbidden(_) => 403,
            Self::InvalidArgument(_) => 400,
            Self::Unavailable(_) => 503,
            Self::Internal(_) | Self::SchedulerFailure(_) => 500,
        }
    }
}

/// Convenience alias used throughout the engine's public surface.
pub type AppResult<T> = Result<T, AppError>;

/// Flattens an adapter/store `anyhow::Error` into an `AppError::Internal`.
///
/// Use at the seam between internal plumbing (which propagates `anyhow`
/// context chains) and the engine's typed public operations.
pub fn internal(err: anyhow::Error) -> AppError {
    AppError::Internal(err.to_string())
}
