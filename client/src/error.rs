use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("invalid server address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("timed out waiting for the gate to answer {user_id}")]
    Timeout { user_id: String },

    #[error("login rejected: {reason}")]
    Rejected { reason: String },
}

impl ClientError {
    /// Whether trying the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout { .. } | ClientError::Io(_))
    }
}
