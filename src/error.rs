use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    /// Rejected before any network call; nothing was mutated.
    #[error("{0}")]
    Validation(String),

    #[error("authentication required: {0}")]
    Auth(String),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("could not parse assistant reply: {0}")]
    SuggestionParse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PlannerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Map an HTTP status and body from the backend into the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            _ => Self::Backend { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
