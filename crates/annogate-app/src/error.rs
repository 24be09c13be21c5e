//! Application-level error type shared by the binary and its helpers.

use annogate_server::{ConfigError, ServerError};
use thiserror::Error;

use crate::config;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Resolve(#[from] ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
