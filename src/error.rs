//! Domain error types for the jank-db crate.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

/// Application-level errors.
///
/// Every variant is fatal to the operation that raised it: the crate never
/// downgrades one of these to a warning or returns partial results.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A raw payload is missing a required field or has a value outside its
    /// enumerated domain.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Polymorphic resolution found a discriminator value it does not know.
    #[error("Unknown job run variant: {0}")]
    UnknownVariant(String),

    /// A filter parameter names an unsupported comparison operator.
    #[error("Invalid comparison operator: {0}")]
    InvalidOperator(String),

    /// A filter parameter could not be compiled (bad regex pattern).
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The injected fetch callback failed while backfilling error texts.
    /// Carries the identity of the test case being processed so the caller
    /// can decide on retry policy.
    #[error("Failed to fetch error texts for test case `{case}`: {source}")]
    FetchFailed {
        case: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// After backfill, a FAILED test case still lacks error text. Signals an
    /// upstream/transport inconsistency rather than a transient condition.
    #[error("Incomplete backfill: failed test case `{case}` has no error texts")]
    IncompleteBackfill { case: String },

    /// Document store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The upstream CI API returned an unusable payload.
    #[error("Upstream API error: {0}")]
    Api(String),
}

/// Convenience type alias for Results with Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Validation error naming the missing or invalid field.
    pub fn missing_field(field: &str) -> Self {
        Error::Validation(format!("missing required field `{field}`"))
    }

    /// Validation error naming a field with an out-of-domain value.
    pub fn invalid_field(field: &str, detail: impl std::fmt::Display) -> Self {
        Error::Validation(format!("invalid value for field `{field}`: {detail}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(format!("JSON parsing error: {err}"))
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::InvalidFilter(err.to_string())
    }
}
