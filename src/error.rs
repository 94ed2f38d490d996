use thiserror::Error;

/// Errors raised by the WPP admin client.
#[derive(Debug, Error)]
pub enum WppError {
    /// Input rejected before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// The API answered 401; session state has been cleared.
    #[error("unauthorized: session missing or expired")]
    Unauthorized,

    /// The API answered with a non-success status.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// OTP validation was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),
}

impl WppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Message suitable for an inline banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Auth(msg) | Self::Spreadsheet(msg) => msg.clone(),
            Self::Api { message, .. } => message.clone(),
            Self::Unauthorized => "session expired, please log in again".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<calamine::Error> for WppError {
    fn from(err: calamine::Error) -> Self {
        Self::Spreadsheet(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for WppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::Spreadsheet(err.to_string())
    }
}

impl From<csv::Error> for WppError {
    fn from(err: csv::Error) -> Self {
        Self::Spreadsheet(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WppError>;
