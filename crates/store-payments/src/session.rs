//! Checkout Sessions
//!
//! A session is the gateway's handle on one checkout attempt. Records are
//! immutable: a status change yields a new record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gateway transaction identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction status as the storefront understands it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Approved,
    Declined,
    Expired,
    /// Placeholder before the first observation
    Unknown,
}

impl SessionStatus {
    /// Approved, Declined and Expired accept no further transition
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Declined | Self::Expired)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    /// Map a provider status string
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "pending" | "waiting_payment" | "processing" | "created" => Self::Pending,
            "approved" | "paid" | "completed" | "succeeded" => Self::Approved,
            "declined" | "refused" | "failed" | "canceled" | "cancelled" => Self::Declined,
            "expired" => Self::Expired,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of creating (or re-reading) a checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway transaction id
    pub transaction_id: TransactionId,

    /// URL to redirect the user-agent to
    pub checkout_url: String,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// A fresh session awaiting payment
    pub fn pending(transaction_id: TransactionId, checkout_url: impl Into<String>) -> Self {
        Self {
            transaction_id,
            checkout_url: checkout_url.into(),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Copy of this record carrying a new status
    #[must_use]
    pub fn with_status(&self, status: SessionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}
