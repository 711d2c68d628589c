//! Payment Gateway Integration
//!
//! The gateway seam and its implementations. [`KirvanoClient`] talks to the
//! hosted checkout provider; [`MockGateway`] stands in for it in development
//! and tests.

mod kirvano;
mod mock;

pub use kirvano::KirvanoClient;
pub use mock::MockGateway;

use async_trait::async_trait;

use crate::checkout::CheckoutRequest;
use crate::error::Result;
use crate::session::{CheckoutSession, TransactionId};

/// Default provider endpoint
pub const DEFAULT_API_URL: &str = "https://api.kirvano.com.br/v1";

/// Payment gateway trait (Strategy pattern)
///
/// Each call sends exactly one request. Retrying is the caller's concern, see
/// [`crate::create_session_with_retry`].
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout session
    ///
    /// The returned session is always `Pending`; the caller redirects the
    /// user-agent to its `checkout_url`.
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// Read the provider's current view of a transaction
    async fn get_status(&self, transaction_id: &TransactionId) -> Result<CheckoutSession>;

    /// Gateway name
    fn name(&self) -> &str;
}

/// Provider configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Bearer token for the provider API
    pub api_key: Option<String>,

    /// API base URL
    pub base_url: String,

    /// Shared secret for webhook signatures
    pub webhook_secret: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_API_URL.into(),
            webhook_secret: None,
            timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Read `KIRVANO_*` variables. Missing values stay `None` here; clients
    /// fail fast when they need them.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Self {
            api_key: non_empty("KIRVANO_API_KEY"),
            base_url: non_empty("KIRVANO_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            webhook_secret: non_empty("KIRVANO_WEBHOOK_SECRET"),
            timeout_secs: std::env::var("KIRVANO_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}
