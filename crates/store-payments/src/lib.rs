//! # store-payments
//!
//! Hosted checkout and payment reconciliation for the e-book store.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐  build   ┌─────────────────┐  create   ┌──────────────┐
//! │PurchaseIntent│────────▶│ CheckoutRequest │─────────▶│   Gateway    │
//! └──────────────┘          └─────────────────┘           └──────┬───────┘
//!                                                               │ Pending session
//!                                                               ▼
//!   webhook (signed) ──▶ WebhookHandler ──┐           ┌──────────────────┐
//!                                          ├─────────▶│    Reconciler    │──▶ AccountStore
//!   success URL ──────▶ poll(get_status) ─┘           └──────────────────┘   (grant once)
//! ```
//!
//! The user-agent never tells us a payment succeeded. The success redirect only
//! names a transaction; ownership changes happen when a verified webhook or a
//! status poll reports `Approved`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use store_payments::{GatewayConfig, KirvanoClient, PurchaseIntent, SessionBuilder};
//!
//! let gateway = KirvanoClient::new(&GatewayConfig::from_env())?;
//! let request = SessionBuilder::from_env().build(&PurchaseIntent::access(email, name), &catalog)?;
//! let session = gateway.create_session(&request).await?;
//! reconciler.track(session.clone(), email, Grant::Access).await;
//!
//! // Redirect user to: session.checkout_url
//! ```

mod checkout;
mod error;
mod gateway;
mod intent;
mod reconciler;
mod retry;
mod session;
mod webhook;

pub use checkout::{CheckoutRequest, IdempotencyKey, LineItem, SessionBuilder};
pub use error::{IntentError, PaymentError, Result};
pub use gateway::{DEFAULT_API_URL, GatewayConfig, KirvanoClient, MockGateway, PaymentGateway};
pub use intent::{Customer, PurchaseIntent, is_valid_email};
pub use reconciler::{DomainEvent, Outcome, PollConfig, ReconciliationEvent, Reconciler};
pub use retry::{RetryPolicy, create_session_with_retry};
pub use session::{CheckoutSession, SessionStatus, TransactionId};
pub use webhook::{
    SIGNATURE_HEADER, WebhookHandler, WebhookNotification, WebhookVerifier, sign as sign_payload,
    verify as verify_signature,
};
