use std::fmt;

/// Errors produced by the HTTP layer. Protocol-level outcomes (a rejected
/// login, a bound-secret challenge) are not errors; see
/// [`crate::api::types::LoginOutcome`].
#[derive(Clone, Debug)]
pub enum ApiError {
    Config(String),
    Network(String),
    Timeout(String),
    Http { status: u16, message: String },
    Parse(String),
    Serialization(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Config(message) => write!(formatter, "Config error: {message}"),
            ApiError::Network(message) => write!(formatter, "Network error: {message}"),
            ApiError::Timeout(message) => write!(formatter, "Timeout: {message}"),
            ApiError::Http { status, message } => {
                write!(formatter, "Request failed ({status}): {message}")
            }
            ApiError::Parse(message) => write!(formatter, "Response error: {message}"),
            ApiError::Serialization(message) => {
                write!(formatter, "Request error: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout("Request timed out. Please try again.".to_string())
        } else if err.is_decode() {
            ApiError::Parse(format!("Failed to decode response: {err}"))
        } else {
            ApiError::Network(format!("Unable to reach the server: {err}"))
        }
    }
}
