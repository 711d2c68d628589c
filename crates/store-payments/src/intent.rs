//! Purchase Intents
//!
//! What the customer asked to buy, before pricing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use store_core::{Grant, ItemId};

use crate::error::IntentError;

/// Customer identity sent to the gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub name: String,
}

impl Customer {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// Trimmed copy, or the first validation failure
    pub fn validated(&self) -> Result<Self, IntentError> {
        let email = self.email.trim();
        if !is_valid_email(email) {
            return Err(IntentError::InvalidEmail(self.email.clone()));
        }

        let name = self.name.trim();
        if name.is_empty() {
            return Err(IntentError::EmptyName);
        }

        Ok(Self::new(email, name))
    }
}

/// A purchase request from the storefront
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseIntent {
    /// One-time platform access
    Access { customer: Customer },

    /// The e-books in the customer's cart
    Cart {
        customer: Customer,
        item_ids: BTreeSet<ItemId>,
    },
}

impl PurchaseIntent {
    pub fn access(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Access {
            customer: Customer::new(email, name),
        }
    }

    pub fn cart(
        email: impl Into<String>,
        name: impl Into<String>,
        item_ids: impl IntoIterator<Item = ItemId>,
    ) -> Self {
        Self::Cart {
            customer: Customer::new(email, name),
            item_ids: item_ids.into_iter().collect(),
        }
    }

    pub const fn customer(&self) -> &Customer {
        match self {
            Self::Access { customer } | Self::Cart { customer, .. } => customer,
        }
    }

    /// What a confirmed payment for this intent grants
    pub fn grant(&self) -> Grant {
        match self {
            Self::Access { .. } => Grant::Access,
            Self::Cart { item_ids, .. } => Grant::Items(item_ids.clone()),
        }
    }
}

/// Syntactic email check: one `@`, non-empty local part, dotted domain
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}
