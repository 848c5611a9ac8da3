use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("SYNC_FAILED: {0}")]
    Sync(String),
    #[error("AI_QUOTA: {0}")]
    Quota(String),
    #[error("AI_UNAVAILABLE: {0}")]
    Unavailable(String),
    #[error("AI_FAILED: {0}")]
    Ai(String),
    #[error("AI_PARSE: {0}")]
    Parse(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Text shown inline in the panel that started the action.
    pub fn user_message(&self) -> String {
        match self {
            Self::Quota(_) => {
                "API quota exceeded. Try again later, switch to the local model, or enter the data manually."
                    .to_string()
            }
            Self::Unavailable(message) => message.clone(),
            Self::Config(message) => message.clone(),
            Self::Parse(_) => "The AI response could not be understood. Please try again.".to_string(),
            Self::InvalidInput(message) => message.clone(),
            Self::Ai(_) => "The AI request failed. Please try again.".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }
}

/// Heuristic used on hosted-backend failures: only clear rate limit signals count as quota.
pub fn looks_like_quota(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lowered = message.to_ascii_lowercase();
    lowered.contains("429")
        || lowered.contains("resource_exhausted")
        || (lowered.contains("quota") && lowered.contains("exceeded"))
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sync(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_connect() {
            Self::Unavailable(value.without_url().to_string())
        } else {
            Self::Ai(value.without_url().to_string())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
