use thiserror::Error;

use crate::model::Scale;

/// Failure classes shared by every provider adapter. Adapters map their
/// provider-specific status codes and body shapes onto these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("rate limited by provider")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    Timeout,
}

/// A classified provider failure. `attempts` is filled in by the retry
/// client; an adapter always reports a single attempt.
#[derive(Debug, Clone, Error)]
#[error("{kind} (attempts: {attempts})")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub retriable: bool,
    pub attempts: u32,
}

impl FetchError {
    /// A failure worth retrying: timeouts, 429s, 5xx-equivalents.
    pub fn transient(kind: FetchErrorKind) -> Self {
        Self {
            kind,
            retriable: true,
            attempts: 1,
        }
    }

    /// A failure that retrying cannot fix: auth, validation, schema drift.
    pub fn permanent(kind: FetchErrorKind) -> Self {
        Self {
            kind,
            retriable: false,
            attempts: 1,
        }
    }
}

/// Aggregation-level failures. These abort one symbol's aggregation only and
/// never affect other in-flight symbols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("mandatory field `{0}` could not be sourced from any provider")]
    MissingMandatoryField(&'static str),
}

/// Computation-level validation failures. No partial report is produced when
/// one of these is raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error("statement scales disagree: {left} reported in {left_scale:?}, {right} in {right_scale:?}")]
    UnitMismatch {
        left: &'static str,
        left_scale: Scale,
        right: &'static str,
        right_scale: Scale,
    },
    #[error("invalid DCF assumptions: {0}")]
    InvalidAssumptions(String),
}
