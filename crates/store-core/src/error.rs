//! Error Types

use thiserror::Error;

use crate::catalog::ItemId;

/// Result type alias for storefront domain operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storefront domain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// E-book id not present in the catalog
    #[error("E-book not found: {0}")]
    ItemNotFound(ItemId),

    /// Authoring input failed validation
    #[error("Invalid e-book: {0}")]
    InvalidEbook(String),

    /// Customer lacks platform access for the requested operation
    #[error("Platform access required for {0}")]
    AccessRequired(String),

    /// Backing store failure (poisoned lock, unavailable backend)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::ItemNotFound(id) => format!("E-book {id} does not exist."),
            Self::InvalidEbook(msg) => format!("Please review the e-book form: {msg}"),
            Self::AccessRequired(_) => "Buy platform access to use this feature.".into(),
            Self::Storage(_) => "Temporary storage problem. Please try again.".into(),
        }
    }
}
