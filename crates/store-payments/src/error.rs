//! Payment Error Types

use store_core::{ItemId, StoreError};
use thiserror::Error;

use crate::session::SessionStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Why a purchase intent was refused before any network call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("customer name is empty")]
    EmptyName,

    #[error("cart is empty")]
    EmptyCart,

    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    #[error("item {0} is already owned")]
    AlreadyOwned(ItemId),

    #[error("amount overflows")]
    AmountOverflow,

    #[error("amount must be at least one minor unit")]
    ZeroAmount,
}

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Bad purchase input, correctable by the user
    #[error("Invalid purchase: {0}")]
    InvalidIntent(#[from] IntentError),

    /// Provider credentials or endpoint not provisioned
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Transport failure, timeout or provider 5xx
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Provider refused the request as sent
    #[error("Gateway rejected request ({status}): {message}")]
    GatewayRejected { status: u16, message: String },

    /// Unknown transaction id
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// A terminal outcome contradicts the one already recorded
    #[error("Reconciliation conflict for {transaction_id}: recorded {recorded}, observed {observed}")]
    ReconciliationConflict {
        transaction_id: String,
        recorded: SessionStatus,
        observed: SessionStatus,
    },

    /// Webhook failed verification or arrived with no secret provisioned
    #[error("Webhook rejected: {0}")]
    WebhookRejected(String),

    /// Verified webhook payload could not be parsed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Account store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PaymentError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_))
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::InvalidIntent(_) => "Please check your details and cart.",
            Self::GatewayUnavailable(_) => "Payment service is unavailable. Please try again.",
            Self::GatewayRejected { .. } => "The payment provider declined this checkout.",
            Self::NotFound(_) => "Transaction not found.",
            Self::ConfigurationMissing(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}
