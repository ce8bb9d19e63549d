use reqwest::StatusCode;
use thiserror::Error;

/// Failure returned by a control-plane call.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },
    #[error("conflict on {kind} '{name}': {message}")]
    Conflict { kind: String, name: String, message: String },
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ClusterError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: StatusCode, kind: &str, name: &str, body: &str) -> Self {
        let message = status_message(body);
        match status {
            StatusCode::NOT_FOUND => ClusterError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            StatusCode::CONFLICT => ClusterError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClusterError::Forbidden(message),
            other => ClusterError::Status {
                status: other.as_u16(),
                message,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

impl From<reqwest::Error> for ClusterError {
    fn from(error: reqwest::Error) -> Self {
        ClusterError::Transport(error.to_string())
    }
}

/// Extract the `message` of a control-plane `Status` body, falling back to the raw text.
fn status_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(|message| message.as_str()).map(str::to_string))
        .unwrap_or_else(|| castor_util::redact_sensitive(body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        let error = ClusterError::from_status(StatusCode::NOT_FOUND, "Deployment", "d1", "");
        assert!(error.is_not_found());

        let error = ClusterError::from_status(
            StatusCode::CONFLICT,
            "Service",
            "svc",
            r#"{"kind":"Status","message":"services \"svc\" already exists"}"#,
        );
        assert!(matches!(error, ClusterError::Conflict { ref message, .. } if message.contains("already exists")));

        let error = ClusterError::from_status(StatusCode::FORBIDDEN, "Pod", "", "forbidden");
        assert!(matches!(error, ClusterError::Forbidden(_)));

        let error = ClusterError::from_status(StatusCode::BAD_GATEWAY, "Pod", "", "upstream");
        assert!(matches!(error, ClusterError::Status { status: 502, .. }));
    }
}
