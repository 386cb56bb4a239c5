use thiserror::Error;

/// Errors raised while talking to MangaDex or decoding page images.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("chapter {chapter_id} is not available")]
    NotAvailable { chapter_id: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReaderError {
    pub fn not_available(chapter_id: impl Into<String>) -> Self {
        Self::NotAvailable {
            chapter_id: chapter_id.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Whether re-issuing the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReaderError::Network(_) | ReaderError::Io(_) => true,
            ReaderError::Http { status } => *status >= 500 || *status == 429,
            ReaderError::NotAvailable { .. }
            | ReaderError::MalformedResponse(_)
            | ReaderError::Image(_) => false,
        }
    }

    /// Short text shown to the reader in alerts and status lines.
    pub fn user_message(&self) -> String {
        match self {
            ReaderError::Network(_) | ReaderError::Io(_) => {
                "Network problem. Check your connection and try again.".to_string()
            }
            ReaderError::Http { status } if *status == 429 => {
                "MangaDex is rate limiting requests. Try again shortly.".to_string()
            }
            ReaderError::Http { status } => format!("MangaDex answered with HTTP {status}."),
            ReaderError::NotAvailable { .. } => {
                "This chapter is unavailable. Pick another one.".to_string()
            }
            ReaderError::MalformedResponse(_) | ReaderError::Image(_) => {
                "Something went wrong loading this content.".to_string()
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("could not determine config directory")]
    NoConfigDir,
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ReaderError::Http { status: 503 }.is_retryable());
        assert!(ReaderError::Http { status: 429 }.is_retryable());
        assert!(!ReaderError::Http { status: 400 }.is_retryable());
        assert!(!ReaderError::not_available("abc").is_retryable());
        assert!(!ReaderError::malformed("missing field").is_retryable());
    }

    #[test]
    fn test_not_available_names_chapter() {
        let err = ReaderError::not_available("ch-42");
        assert_eq!(err.to_string(), "chapter ch-42 is not available");
        assert!(err.user_message().contains("unavailable"));
    }
}
