//! # store-core
//!
//! Domain types for the e-booksjá storefront: the e-book catalog, customer
//! accounts, and the prices everything is charged at.
//!
//! ## Ownership
//!
//! ```text
//! ┌──────────────┐   Grant    ┌────────────────┐
//! │  Reconciler  │───────────▶│  AccountStore  │  access flag, purchased, cart
//! └──────────────┘            └────────────────┘
//!        ▲                            │
//!        │ confirmed payment          │ already_owned
//!        │                            ▼
//! ┌──────────────┐  ItemLookup ┌────────────────┐
//! │   Gateway    │◀────────────│    Catalog     │
//! └──────────────┘             └────────────────┘
//! ```
//!
//! Ownership only changes through [`AccountStore::apply_grant`], which the
//! payment reconciler calls once a transaction is confirmed.

pub mod account;
pub mod catalog;
pub mod error;
pub mod pricing;

pub use account::{normalize_email, Account, AccountStore, Grant, MemoryAccountStore};
pub use catalog::{Catalog, Ebook, ItemId, ItemLookup, ItemView, NewEbook, OwnedCatalog, CATEGORIES};
pub use error::{Result, StoreError};
pub use pricing::{Currency, ACCESS_PRICE_MINOR_UNITS, EBOOK_PRICE_MINOR_UNITS};
