//! # metricsd-shared
//!
//! Foundational types used by every other metricsd crate:
//!
//! - `ErrorEnvelope` and the workspace `Result` alias
//! - `RequestContext` (correlation id + cancellation) and `BoundedQueue`
//! - retry and deadline helpers
//! - secret redaction
//!
//! This crate has no workspace dependencies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod concurrency;
pub mod errors;
pub mod redaction;
pub mod result;
pub mod retry;
pub mod timeout;

pub use concurrency::{
    BoundedQueue, BoundedQueueClosedError, CancellationToken, CorrelationId, RequestContext,
    is_queue_closed,
};
pub use errors::{
    ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, REDACTED_VALUE,
    UnexpectedError, find_io_error, normalize_unexpected_error, redact_metadata,
};
pub use redaction::{REDACTED, SecretString, is_secret_key, redact_if_secret};
pub use result::Result;
pub use retry::{RetryPolicy, retry_async, retry_async_with_observer, retry_with_schedule};
pub use timeout::timeout_with_context;

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_error_types_are_available() {
        let error = ErrorEnvelope::expected(ErrorCode::not_found(), "missing");
        assert_eq!(error.kind, ErrorKind::Expected);
        assert_eq!(error.class, ErrorClass::NonRetriable);
    }

    #[test]
    fn crate_version_is_set() {
        assert!(!shared_crate_version().is_empty());
    }
}
