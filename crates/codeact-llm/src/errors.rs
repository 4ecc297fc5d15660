/// Typed errors for chat-completion calls. Classifies as fatal (don't
/// retry) or retryable; cancellation is not an error, since the client
/// resolves with partial content instead.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LlmError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("insufficient credits: {0}")]
    InsufficientCredits(String),

    // Retryable
    #[error("rate limited")]
    RateLimited,
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ProviderOverloaded | Self::ServerError { .. } | Self::Network(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Whether the task should pause and wait for the operator rather than
    /// retry (e.g. the account ran out of credits).
    pub fn requires_pause(&self) -> bool {
        matches!(self, Self::InsufficientCredits(_))
    }

    /// Classify an HTTP status code into the appropriate variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            402 => Self::InsufficientCredits(body),
            400 => {
                if body.contains("insufficient") && body.contains("credit") {
                    Self::InsufficientCredits(body)
                } else {
                    Self::InvalidRequest(body)
                }
            }
            429 => Self::RateLimited,
            529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
