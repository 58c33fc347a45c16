//! Upstream API access
//!
//! This module provides:
//! - The `MediaApi` trait the collector talks to
//! - The reqwest-backed OvenMediaEngine implementation
//!
//! The rest of the application must interact exclusively through
//! the trait, which keeps the collector testable against canned
//! payloads.

pub mod ovenmedia;

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

pub use ovenmedia::OvenMediaClient;

/// Read-only view of the media server management API.
///
/// Every operation returns the `response` field of the upstream
/// JSON envelope.
///
/// FAILURE CONTRACT:
/// - Operations never fail from the caller's perspective
/// - Any upstream failure yields `Value::Null` (see `is_empty`)
/// - Failures are logged by the implementation
/// - No retries: the next scheduled cycle is the retry
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by all concurrent stream tasks
///
#[async_trait::async_trait]
pub trait MediaApi: Send + Sync {
    /// Virtual host names.
    async fn list_vhosts(&self) -> Value;

    /// Stream names of the configured application in `vhost`.
    async fn list_streams(&self, vhost: &str) -> Value;

    /// Aggregate stream status of the configured application in `vhost`.
    async fn stream_status(&self, vhost: &str) -> Value;

    /// Descriptive data (tracks) of one stream.
    async fn stream_info(&self, vhost: &str, stream: &str) -> Value;

    /// Runtime statistics of one stream.
    async fn stream_stats(&self, vhost: &str, stream: &str) -> Value;
}

/// Whether an API result carries no data.
///
/// Null, `{}`, `[]` and `""` all count as empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Why a single upstream request produced no data.
///
/// Only used for diagnostics: every variant degrades to an empty
/// result at the `MediaApi` boundary.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("credential rejected ({0}), check the API token")]
    Unauthorized(StatusCode),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response body: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("response envelope has no `response` field")]
    MissingResponse,

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emptiness_follows_payload_shape() {
        assert!(is_empty(&Value::Null));
        assert!(is_empty(&json!({})));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!("")));

        assert!(!is_empty(&json!(["default"])));
        assert!(!is_empty(&json!({ "name": "test" })));
        assert!(!is_empty(&json!(0)));
    }
}
