//! Checkout Request Builder
//!
//! Turns a [`PurchaseIntent`] into a normalized, provider-agnostic
//! [`CheckoutRequest`]. Pure: no I/O, no clock, only a fresh idempotency key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use store_core::{Currency, ItemLookup, ACCESS_PRICE_MINOR_UNITS};

use crate::error::{IntentError, Result};
use crate::intent::{Customer, PurchaseIntent};

const ACCESS_ITEM_NAME: &str = "Acesso à plataforma e-booksjá";

/// Provider-side deduplication token, one per checkout attempt
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Mint a key for a new attempt
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line on the checkout page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price_minor_units: u64,
}

impl LineItem {
    pub fn single(name: impl Into<String>, unit_price_minor_units: u64) -> Self {
        Self {
            name: name.into(),
            quantity: 1,
            unit_price_minor_units,
        }
    }

    /// `quantity * unit price`, `None` on overflow
    pub fn subtotal(&self) -> Option<u64> {
        self.unit_price_minor_units.checked_mul(u64::from(self.quantity))
    }
}

/// Normalized request to open a checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Reused verbatim on retries of the same attempt
    pub idempotency_key: IdempotencyKey,

    /// Always equals the sum of line-item subtotals
    pub amount_minor_units: u64,

    pub currency: Currency,
    pub description: String,
    pub customer: Customer,
    pub line_items: Vec<LineItem>,
    pub metadata: BTreeMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    /// Exact sum of line-item subtotals, `None` on overflow
    pub fn line_total(&self) -> Option<u64> {
        sum_line_items(&self.line_items)
    }
}

fn sum_line_items(items: &[LineItem]) -> Option<u64> {
    items
        .iter()
        .try_fold(0u64, |total, item| total.checked_add(item.subtotal()?))
}

/// Builds checkout requests for the storefront
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    return_base_url: String,
    currency: Currency,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}

impl SessionBuilder {
    /// `return_base_url` is where the gateway sends the user back to
    pub fn new(return_base_url: impl Into<String>) -> Self {
        Self {
            return_base_url: return_base_url.into().trim_end_matches('/').to_string(),
            currency: Currency::Brl,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        std::env::var("STORE_RETURN_BASE_URL").map_or_else(|_| Self::default(), Self::new)
    }

    pub const fn currency(&self) -> Currency {
        self.currency
    }

    pub fn success_url(&self) -> String {
        format!("{}/success", self.return_base_url)
    }

    pub fn cancel_url(&self) -> String {
        format!("{}/", self.return_base_url)
    }

    /// Validate and price an intent
    ///
    /// Cart items are resolved through `catalog`; unknown or already-owned
    /// items fail the whole intent.
    pub fn build(&self, intent: &PurchaseIntent, catalog: &impl ItemLookup) -> Result<CheckoutRequest> {
        let customer = intent.customer().validated()?;

        let mut metadata = BTreeMap::new();
        metadata.insert("customer_email".to_string(), customer.email.clone());

        let (description, line_items) = match intent {
            PurchaseIntent::Access { .. } => {
                metadata.insert("purchase".to_string(), "access".to_string());
                (
                    ACCESS_ITEM_NAME.to_string(),
                    vec![LineItem::single(ACCESS_ITEM_NAME, ACCESS_PRICE_MINOR_UNITS)],
                )
            }
            PurchaseIntent::Cart { item_ids, .. } => {
                if item_ids.is_empty() {
                    return Err(IntentError::EmptyCart.into());
                }

                let mut line_items = Vec::with_capacity(item_ids.len());
                for &id in item_ids {
                    let item = catalog.lookup(id).ok_or(IntentError::UnknownItem(id))?;
                    if item.already_owned {
                        return Err(IntentError::AlreadyOwned(id).into());
                    }
                    line_items.push(LineItem::single(item.title, item.price_minor_units));
                }

                let ids: Vec<String> = item_ids.iter().map(ToString::to_string).collect();
                metadata.insert("purchase".to_string(), "items".to_string());
                metadata.insert("item_ids".to_string(), ids.join(","));

                let description = match line_items.len() {
                    1 => "1 e-book".to_string(),
                    n => format!("{n} e-books"),
                };
                (description, line_items)
            }
        };

        let amount_minor_units = sum_line_items(&line_items).ok_or(IntentError::AmountOverflow)?;
        if amount_minor_units == 0 {
            return Err(IntentError::ZeroAmount.into());
        }

        Ok(CheckoutRequest {
            idempotency_key: IdempotencyKey::generate(),
            amount_minor_units,
            currency: self.currency,
            description,
            customer,
            line_items,
            metadata,
            success_url: self.success_url(),
            cancel_url: self.cancel_url(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use store_core::{ItemId, ItemView};

    use crate::error::PaymentError;

    #[derive(Default)]
    struct PriceList {
        items: HashMap<ItemId, ItemView>,
    }

    impl PriceList {
        fn with(mut self, id: u32, price: u64, owned: bool) -> Self {
            self.items.insert(
                ItemId(id),
                ItemView {
                    title: format!("E-book {id}"),
                    price_minor_units: price,
                    already_owned: owned,
                },
            );
            self
        }
    }

    impl ItemLookup for PriceList {
        fn lookup(&self, id: ItemId) -> Option<ItemView> {
            self.items.get(&id).cloned()
        }
    }

    fn intent_error(result: Result<CheckoutRequest>) -> IntentError {
        match result {
            Err(PaymentError::InvalidIntent(e)) => e,
            other => panic!("expected invalid intent, got {other:?}"),
        }
    }

    #[test]
    fn test_access_intent() {
        let builder = SessionBuilder::new("https://ebooksja.com.br/");
        let request = builder
            .build(&PurchaseIntent::access("a@b.com", "A"), &PriceList::default())
            .unwrap();

        assert_eq!(request.amount_minor_units, 1999);
        assert_eq!(request.line_items.len(), 1);
        assert_eq!(request.metadata["purchase"], "access");
        assert_eq!(request.success_url, "https://ebooksja.com.br/success");
        assert_eq!(request.cancel_url, "https://ebooksja.com.br/");
    }

    #[test]
    fn test_cart_intent() {
        let catalog = PriceList::default().with(7, 499, false).with(9, 499, false);
        let intent = PurchaseIntent::cart("a@b.com", "A", [ItemId(9), ItemId(7)]);

        let request = SessionBuilder::default().build(&intent, &catalog).unwrap();

        assert_eq!(request.amount_minor_units, 998);
        assert_eq!(request.line_items[0].name, "E-book 7");
        assert_eq!(request.metadata["item_ids"], "7,9");
        assert_eq!(request.description, "2 e-books");
    }

    #[test]
    fn test_rejects_unknown_and_owned_items() {
        let catalog = PriceList::default().with(1, 499, true).with(2, 499, false);
        let builder = SessionBuilder::default();

        let owned = PurchaseIntent::cart("a@b.com", "A", [ItemId(1), ItemId(2)]);
        assert_eq!(intent_error(builder.build(&owned, &catalog)), IntentError::AlreadyOwned(ItemId(1)));

        let unknown = PurchaseIntent::cart("a@b.com", "A", [ItemId(2), ItemId(3)]);
        assert_eq!(intent_error(builder.build(&unknown, &catalog)), IntentError::UnknownItem(ItemId(3)));
    }

    #[test]
    fn test_rejects_bad_customer_and_empty_cart() {
        let builder = SessionBuilder::default();
        let catalog = PriceList::default();

        let bad_email = PurchaseIntent::access("not-an-email", "A");
        assert!(matches!(intent_error(builder.build(&bad_email, &catalog)), IntentError::InvalidEmail(_)));

        let no_name = PurchaseIntent::access("a@b.com", "");
        assert_eq!(intent_error(builder.build(&no_name, &catalog)), IntentError::EmptyName);

        let empty = PurchaseIntent::cart("a@b.com", "A", Vec::<ItemId>::new());
        assert_eq!(intent_error(builder.build(&empty, &catalog)), IntentError::EmptyCart);
    }

    #[test]
    fn test_rejects_zero_and_overflowing_totals() {
        let builder = SessionBuilder::default();

        let free = PriceList::default().with(1, 0, false);
        let intent = PurchaseIntent::cart("a@b.com", "A", [ItemId(1)]);
        assert_eq!(intent_error(builder.build(&intent, &free)), IntentError::ZeroAmount);

        let huge = PriceList::default().with(1, u64::MAX, false).with(2, 1, false);
        let intent = PurchaseIntent::cart("a@b.com", "A", [ItemId(1), ItemId(2)]);
        assert_eq!(intent_error(builder.build(&intent, &huge)), IntentError::AmountOverflow);
    }

    #[test]
    fn test_each_attempt_gets_a_fresh_key() {
        let builder = SessionBuilder::default();
        let intent = PurchaseIntent::access("a@b.com", "A");

        let first = builder.build(&intent, &PriceList::default()).unwrap();
        let second = builder.build(&intent, &PriceList::default()).unwrap();
        assert_ne!(first.idempotency_key, second.idempotency_key);
    }

    proptest! {
        #[test]
        fn prop_amount_is_exact_sum(prices in prop::collection::btree_map(0u32..10_000, 1u64..1_000_000, 1..64)) {
            let catalog = prices
                .iter()
                .fold(PriceList::default(), |list, (&id, &price)| list.with(id, price, false));
            let intent = PurchaseIntent::cart("a@b.com", "A", prices.keys().copied().map(ItemId));

            let request = SessionBuilder::default().build(&intent, &catalog).unwrap();

            prop_assert_eq!(request.amount_minor_units, prices.values().sum::<u64>());
            prop_assert_eq!(request.line_total(), Some(request.amount_minor_units));
            prop_assert_eq!(request.line_items.len(), prices.len());
        }
    }
}
