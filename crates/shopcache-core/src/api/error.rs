use thiserror::Error;

/// Failures of a single shop request.
#[derive(Error, Debug)]
pub enum ApiError {
    /// 401/403. The shop endpoint is public, so this usually means a proxy
    /// or geo block sits in front of it.
    #[error("Shop endpoint refused {url} ({status}): {body}")]
    Refused { url: String, status: u16, body: String },

    #[error("No shop at {url}")]
    ShopNotFound { url: String },

    #[error("Still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Shop service failed ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Could not decode shop payload from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Unexpected status {status} from {url}: {body}")]
    UnexpectedStatus { url: String, status: u16, body: String },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Map a non-success, non-429 response for `url`.
    pub fn from_status(url: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let body = Self::truncate_body(body);
        let code = status.as_u16();
        match code {
            401 | 403 => ApiError::Refused {
                url: url.to_string(),
                status: code,
                body,
            },
            404 => ApiError::ShopNotFound {
                url: url.to_string(),
            },
            500..=599 => ApiError::ServerError { status: code, body },
            _ => ApiError::UnexpectedStatus {
                url: url.to_string(),
                status: code,
                body,
            },
        }
    }

    /// Whether the same request may succeed later without any change.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::ServerError { .. } => true,
            ApiError::NetworkError(e) => e.is_timeout() || e.is_connect(),
            ApiError::Refused { .. }
            | ApiError::ShopNotFound { .. }
            | ApiError::Decode { .. }
            | ApiError::UnexpectedStatus { .. } => false,
        }
    }
}
