//! Application State

use std::sync::Arc;

use store_core::{Catalog, MemoryAccountStore};
use store_payments::{
    PaymentGateway, PollConfig, Reconciler, RetryPolicy, SessionBuilder, WebhookHandler,
    WebhookVerifier,
};

/// Checkout wiring, present only when a gateway is configured
pub struct Payments {
    pub gateway: Arc<dyn PaymentGateway>,
    pub reconciler: Arc<Reconciler<MemoryAccountStore>>,
    pub webhooks: WebhookHandler<MemoryAccountStore>,
    pub webhook_configured: bool,
    pub retry: RetryPolicy,
}

impl Payments {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        accounts: Arc<MemoryAccountStore>,
        poll: PollConfig,
        verifier: WebhookVerifier,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(accounts, gateway.clone(), poll));
        let webhook_configured = verifier.is_configured();

        Self {
            gateway,
            webhooks: WebhookHandler::new(verifier, reconciler.clone()),
            reconciler,
            webhook_configured,
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// E-book catalog
    pub catalog: Arc<Catalog>,

    /// Customer accounts keyed by normalized email
    pub accounts: Arc<MemoryAccountStore>,

    /// Prices intents and builds return URLs
    pub builder: Arc<SessionBuilder>,

    /// Payment gateway wiring (optional - None if not configured)
    pub payments: Option<Arc<Payments>>,
}
