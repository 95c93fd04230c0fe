use std::time::Duration;
use thiserror::Error;

/// Failure to produce a signed app assertion.
#[derive(Debug, Clone, Error)]
pub enum SigningError {
    #[error("app private key rejected by signer: {0}")]
    InvalidKey(String),

    #[error("could not encode app assertion: {0}")]
    Encode(String),
}

/// Failure to acquire an installation access token.
///
/// Display output is safe to surface to callers: it never carries key
/// material, signed assertions, tokens, or upstream response bodies.
/// The `Status` variant keeps the (truncated) upstream body in a field
/// that only shows up in logs via `Debug`.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("could not sign app assertion: {0}")]
    Signing(#[from] SigningError),

    #[error("GitHub token exchange transport error: {0}")]
    Transport(String),

    #[error("GitHub token exchange returned HTTP {status}")]
    Status { status: u16, message: String },

    #[error("GitHub token exchange timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("GitHub token exchange returned an unexpected payload: {0}")]
    Malformed(String),
}

impl TokenError {
    /// Stable label for the token exchange outcome metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            TokenError::Signing(_) => "signing",
            TokenError::Transport(_) => "transport",
            TokenError::Status { .. } => "status",
            TokenError::Timeout(_) => "timeout",
            TokenError::Malformed(_) => "decode",
        }
    }

    /// Truncated upstream response body, when the failure carries one.
    /// Goes to operator logs only, never into `Display`.
    pub fn upstream_detail(&self) -> Option<&str> {
        match self {
            TokenError::Status { message, .. } if !message.is_empty() => Some(message),
            _ => None,
        }
    }
}

/// Failure from the repository-facing GitHub REST client.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API request failed: {0}")]
    Transport(String),

    #[error("GitHub API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode GitHub API response: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_hides_upstream_body() {
        let err = TokenError::Status {
            status: 502,
            message: "{\"message\":\"upstream secret sauce\"}".to_string(),
        };
        let shown = err.to_string();
        assert_eq!(shown, "GitHub token exchange returned HTTP 502");
        assert!(!shown.contains("secret sauce"));
        assert_eq!(
            err.upstream_detail(),
            Some("{\"message\":\"upstream secret sauce\"}")
        );
    }

    #[test]
    fn test_metric_labels_are_stable() {
        let cases = [
            (
                TokenError::Signing(SigningError::InvalidKey("bad".into())),
                "signing",
            ),
            (TokenError::Transport("refused".into()), "transport"),
            (
                TokenError::Status {
                    status: 401,
                    message: String::new(),
                },
                "status",
            ),
            (TokenError::Timeout(Duration::from_secs(10)), "timeout"),
            (TokenError::Malformed("missing token".into()), "decode"),
        ];
        for (err, label) in cases {
            assert_eq!(err.metric_label(), label);
        }
    }
}
