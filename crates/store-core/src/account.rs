//! Customer Accounts
//!
//! Ownership state (platform access, purchased e-books, cart) and the store
//! that holds it. Checkout never writes here directly: reconciled payments
//! arrive as a [`Grant`] through [`AccountStore::apply_grant`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::catalog::ItemId;
use crate::error::{Result, StoreError};

/// What a confirmed payment entitles the customer to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Grant {
    /// Lifetime platform access
    Access,

    /// Individual e-books
    Items(BTreeSet<ItemId>),
}

impl Grant {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Items(_) => "items",
        }
    }
}

/// Per-customer ownership state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub has_access: bool,
    pub purchased: BTreeSet<ItemId>,
    pub cart: BTreeSet<ItemId>,
}

impl Account {
    pub fn owns(&self, id: ItemId) -> bool {
        self.purchased.contains(&id)
    }

    /// Add to cart; owned items and duplicates are ignored
    pub fn add_to_cart(&mut self, id: ItemId) -> bool {
        if self.owns(id) {
            return false;
        }
        self.cart.insert(id)
    }

    pub fn remove_from_cart(&mut self, id: ItemId) -> bool {
        self.cart.remove(&id)
    }

    /// Apply a confirmed grant
    pub fn apply(&mut self, grant: &Grant) {
        match grant {
            Grant::Access => self.has_access = true,
            Grant::Items(items) => {
                self.purchased.extend(items.iter().copied());
                self.cart.retain(|id| !items.contains(id));
            }
        }
    }
}

/// Canonical account key for an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account storage trait
///
/// The surrounding application owns durability; implementations decide where
/// accounts live.
pub trait AccountStore: Send + Sync {
    /// Load an account; unknown customers start empty
    fn load(&self, email: &str) -> Result<Account>;

    /// Add an item to the customer's cart
    fn add_to_cart(&self, email: &str, id: ItemId) -> Result<Account>;

    /// Remove an item from the customer's cart
    fn remove_from_cart(&self, email: &str, id: ItemId) -> Result<Account>;

    /// Apply a reconciled grant (atomic read-modify-write)
    fn apply_grant(&self, email: &str, grant: &Grant) -> Result<Account>;
}

/// In-memory account store (for development)
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    fn modify(&self, email: &str, f: impl FnOnce(&mut Account)) -> Result<Account> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let account = accounts.entry(normalize_email(email)).or_default();
        f(account);
        Ok(account.clone())
    }
}

impl AccountStore for MemoryAccountStore {
    fn load(&self, email: &str) -> Result<Account> {
        let accounts = self
            .accounts
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(accounts
            .get(&normalize_email(email))
            .cloned()
            .unwrap_or_default())
    }

    fn add_to_cart(&self, email: &str, id: ItemId) -> Result<Account> {
        self.modify(email, |account| {
            account.add_to_cart(id);
        })
    }

    fn remove_from_cart(&self, email: &str, id: ItemId) -> Result<Account> {
        self.modify(email, |account| {
            account.remove_from_cart(id);
        })
    }

    fn apply_grant(&self, email: &str, grant: &Grant) -> Result<Account> {
        let account = self.modify(email, |account| account.apply(grant))?;
        tracing::info!(email = %normalize_email(email), grant = grant.as_str(), "Applied grant");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[u32]) -> BTreeSet<ItemId> {
        ids.iter().copied().map(ItemId).collect()
    }

    #[test]
    fn test_cart_ignores_owned_and_duplicates() {
        let mut account = Account::default();
        account.purchased.insert(ItemId(1));

        assert!(!account.add_to_cart(ItemId(1)));
        assert!(account.add_to_cart(ItemId(2)));
        assert!(!account.add_to_cart(ItemId(2)));
        assert_eq!(account.cart, items(&[2]));
    }

    #[test]
    fn test_item_grant_clears_cart() {
        let mut account = Account::default();
        account.cart = items(&[7, 9, 11]);

        account.apply(&Grant::Items(items(&[7, 9])));

        assert_eq!(account.purchased, items(&[7, 9]));
        assert_eq!(account.cart, items(&[11]));
        assert!(!account.has_access);
    }

    #[test]
    fn test_memory_store_keys_by_normalized_email() {
        let store = MemoryAccountStore::new();

        store.add_to_cart("Reader@Example.com ", ItemId(4)).unwrap();
        store.apply_grant("reader@example.com", &Grant::Access).unwrap();

        let account = store.load("READER@example.com").unwrap();
        assert!(account.has_access);
        assert_eq!(account.cart, items(&[4]));
    }

    #[test]
    fn test_grant_wire_shape() {
        let grant = Grant::Items(items(&[7, 9]));
        assert_eq!(
            serde_json::to_value(&grant).unwrap(),
            serde_json::json!({"kind": "items", "items": [7, 9]})
        );
        assert_eq!(
            serde_json::to_value(Grant::Access).unwrap(),
            serde_json::json!({"kind": "access"})
        );
    }

    #[test]
    fn test_unknown_customer_starts_empty() {
        let store = MemoryAccountStore::new();
        assert_eq!(store.load("new@example.com").unwrap(), Account::default());
    }
}
