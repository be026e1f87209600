use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderqError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrderqError {
    /// Short, stable error code attached to CLI log lines.
    pub fn code(&self) -> &'static str {
        match self {
            OrderqError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrderqError>;
