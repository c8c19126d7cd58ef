use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::browser::BrowserError;

/// Errors surfaced by the audit engine
#[derive(Error, Debug)]
pub enum AuditError {
    /// Malformed or missing input; raised before any browser work happens
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Inline record of an analyzer that failed as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFailure {
    pub error: bool,
    pub error_message: String,
    pub raw_error: String,
}

impl CheckFailure {
    pub fn new(label: &str, raw_error: impl Into<String>) -> Self {
        Self {
            error: true,
            error_message: format!("{} check failed inside worker.", label),
            raw_error: raw_error.into(),
        }
    }
}
