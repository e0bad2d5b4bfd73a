use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the server
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(&'static str),

    #[error(transparent)]
    Export(#[from] crate::export::ExportError),

    #[error("Cannot import diagram: {0}")]
    Import(&'static str),
}

impl ClientError {
    /// Build an [`ClientError::Api`] from a failed response, preferring the
    /// server's `message` or `detail` field over the raw body.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
        });

        let message = from_json
            .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            });

        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_message_field_is_preferred() {
        let err = ClientError::from_response(
            StatusCode::NOT_FOUND,
            r#"{"status":"error","message":"Project not found"}"#,
        );
        assert!(err.is_not_found());
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "Project not found"));
    }

    #[test]
    fn test_detail_field_is_used() {
        let err = ClientError::from_response(
            StatusCode::UNAUTHORIZED,
            r#"{"detail":"Given token not valid"}"#,
        );
        assert!(matches!(err, ClientError::Api { status: 401, ref message } if message == "Given token not valid"));
    }

    #[test]
    fn test_empty_body_falls_back_to_reason() {
        let err = ClientError::from_response(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "Bad Gateway"));
    }
}
