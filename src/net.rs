//! Bounded outbound calls: every request carries a timeout and honours the
//! caller's cancellation token.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Run `fut` until it finishes, `timeout` elapses, or `cancel` fires.
///
/// An elapsed timeout is a transient failure of `service`.
pub async fn bounded<T, F>(
    service: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(PipelineError::timeout(service, timeout)),
        },
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a transport-level reqwest failure onto the error taxonomy.
pub fn classify_transport(service: &str, err: reqwest::Error) -> PipelineError {
    if let Some(status) = err.status() {
        return PipelineError::from_status(service, status.as_u16(), err.to_string(), None);
    }
    if err.is_builder() {
        return PipelineError::Validation(format!("{service}: {err}"));
    }
    PipelineError::TransientNetwork {
        service: service.to_string(),
        reason: err.to_string(),
        retry_after: None,
    }
}

/// Best-effort human message from an error response body.
///
/// WordPress and Anthropic both put it under `message` (the latter nested
/// in `error`). A WordPress `code` such as `rest_cannot_create` is appended.
/// Falls back to the raw body.
pub fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let Some(message) = value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(|m| m.as_str())
    else {
        return body.trim().to_string();
    };
    match value.get("code").and_then(|c| c.as_str()) {
        Some(code) => format!("{message} ({code})"),
        None => message.to_string(),
    }
}
