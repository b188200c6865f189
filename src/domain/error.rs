use thiserror::Error;

use super::types::OrderStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("order cannot move from `{from}` to `{to}`")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
