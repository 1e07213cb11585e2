//! Data models for the oracle relay

use serde::{Deserialize, Serialize};

pub mod oracle;

/// Generic API response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Static liveness payload served on `/api`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}
