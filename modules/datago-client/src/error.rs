use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataGoError>;

#[derive(Debug, Error)]
pub enum DataGoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("registry result {code}: {message}")]
    ResultCode { code: String, message: String },

    /// INFO-03: the query matched no candidate rows. Not a failure.
    #[error("registry returned no data")]
    NoData,

    #[error("malformed registry response: {0}")]
    Parse(String),

    #[error("client is not configured (missing service key or election id)")]
    NotConfigured,
}

impl DataGoError {
    /// Transient failure classes worth a retry: timeouts, transport errors,
    /// and 5xx responses. "No data" and malformed payloads fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            DataGoError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DataGoError::Api { status, .. } => *status >= 500,
            DataGoError::ResultCode { .. } => true,
            DataGoError::NoData | DataGoError::Parse(_) | DataGoError::NotConfigured => false,
        }
    }
}
