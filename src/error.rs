use thiserror::Error;

/// Boundary error for every upstream HTTP/WebSocket call (Supabase,
/// Bitquery, Telegram, TikTok). Service loops catch these, log them and
/// degrade to empty defaults; they are never surfaced raw to the dashboard.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("upstream rejected credentials (status {0})")]
    Auth(u16),

    #[error("upstream rate limit hit")]
    RateLimit,

    #[error("upstream returned status {0}: {1}")]
    Status(u16, String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => ApiError::Auth(status),
            429 => ApiError::RateLimit,
            _ => ApiError::Status(status, body.into()),
        }
    }
}

/// Map a non-success response into the classified error, consuming the body
/// for context. Success responses pass through untouched.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_and_rate_limit_statuses() {
        assert!(matches!(ApiError::from_status(401, ""), ApiError::Auth(401)));
        assert!(matches!(ApiError::from_status(403, ""), ApiError::Auth(403)));
        assert!(matches!(ApiError::from_status(429, ""), ApiError::RateLimit));
        assert!(matches!(
            ApiError::from_status(502, "bad gateway"),
            ApiError::Status(502, _)
        ));
    }
}
