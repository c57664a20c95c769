//! Transport error types

use std::time::Duration;

/// WordPress error code for a missing or expired REST nonce.
const INVALID_NONCE: &str = "rest_cookie_invalid_nonce";

/// Failures reaching the site or reading its answer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The site answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Raw response body.
        message: String,
        /// `code` member of a `WP_Error` body, if any.
        code: Option<String>,
    },

    /// The request never completed.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request exceeded the configured timeout.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The site URL or route can't form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The body wasn't the JSON we expected.
    #[error("Response parse error: {message}")]
    Parse {
        /// What was wrong.
        message: String,
        /// Raw response body, if read.
        body: Option<String>,
    },
}

impl ApiError {
    /// Creates an HTTP error without a WordPress error code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            body: None,
        }
    }

    /// Creates a parse error keeping the offending body.
    pub fn parse_with_body(message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            body: Some(body.into()),
        }
    }

    /// Returns the status code of an HTTP error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the WordPress error code of an HTTP error.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if the site rejected the REST nonce.
    ///
    /// Nonces expire after a day; a fresh one has to be fetched from an
    /// authenticated admin page.
    pub fn is_invalid_nonce(&self) -> bool {
        self.error_code() == Some(INVALID_NONCE)
    }
}
