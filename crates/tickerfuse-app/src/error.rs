//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tickerfuse_ws::WsError>),

    #[error("Feed is not running")]
    NotRunning,
}

impl From<tickerfuse_ws::WsError> for AppError {
    fn from(e: tickerfuse_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
