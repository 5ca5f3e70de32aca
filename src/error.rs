//! Session errors: one taxonomy for validation, transport, and backend failures.
//!
//! ERROR HANDLING
//! ==============
//! Every public operation returns `Result<_, SessionError>` instead of
//! panicking. Profile resolution consults [`SessionError::is_transient`] to
//! decide whether another attempt is worthwhile; everything else surfaces
//! to the caller as-is.

/// Errors produced by session synchronizer and backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Credentials were missing or malformed; no request was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backend (or the demo table) rejected the email/password pair.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The operation is disabled in the current mode.
    #[error("not available: {0}")]
    NotAvailable(String),

    /// The operation did not complete before its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(String),

    /// Row-level security or permission rejection on the data API.
    #[error("access denied by policy ({code}): {message}")]
    PolicyDenied { code: String, message: String },

    /// No profile row exists for the identity.
    #[error("profile not found ({code})")]
    NotFound { code: String },

    /// Any other non-success backend response.
    #[error("backend error: status {status}: {message}")]
    Api { status: u16, message: String },

    /// The backend body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// Reading or writing the persisted session failed.
    #[error("session storage failed: {0}")]
    Storage(String),
}

impl SessionError {
    /// Stable machine-readable code, suitable for logs and CLI output.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::NotAvailable(_) => "E_NOT_AVAILABLE",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::Network(_) => "E_NETWORK",
            Self::PolicyDenied { .. } => "E_POLICY_DENIED",
            Self::NotFound { .. } => "E_NOT_FOUND",
            Self::Api { .. } => "E_API",
            Self::Parse(_) => "E_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Storage(_) => "E_STORAGE",
        }
    }

    /// Whether a profile lookup failing with this error should be retried.
    ///
    /// Policy denials count as transient: they show up while a freshly
    /// issued token has not yet propagated to the data API.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_) | Self::PolicyDenied { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() { Self::Timeout("backend request") } else { Self::Network(e.to_string()) }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
