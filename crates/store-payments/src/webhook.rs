//! Webhook Handling
//!
//! Authenticates provider notifications and feeds them to the reconciler.
//! Signatures are HMAC-SHA256 over the raw request body, hex encoded, with an
//! optional `sha256=` prefix. Without a configured secret every notification
//! is rejected.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use store_core::AccountStore;

use crate::error::{PaymentError, Result};
use crate::reconciler::{DomainEvent, Reconciler};
use crate::session::{SessionStatus, TransactionId};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "x-kirvano-signature";

/// Check `signature` against the HMAC of `payload`
///
/// Returns `false` for a missing secret, undecodable signature or mismatch.
/// The comparison is constant time.
pub fn verify(payload: &[u8], signature: &str, secret: Option<&str>) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return false;
    };

    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(signature) else {
        tracing::debug!("Failed to decode webhook signature");
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Hex HMAC-SHA256 of `payload`, as the provider computes it
// HMAC accepts keys of any length, so key setup cannot fail
#[allow(clippy::missing_panics_doc)]
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifier bound to the configured secret
#[derive(Clone, Default)]
pub struct WebhookVerifier {
    secret: Option<String>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub const fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        verify(payload, signature, self.secret.as_deref())
    }
}

/// Provider notification body
///
/// The provider names the transaction `id` or `transaction_id` depending on
/// the event; extra fields are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookNotification {
    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    transaction_id: Option<String>,

    status: String,

    #[serde(default)]
    pub event: Option<String>,
}

impl WebhookNotification {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let notification: Self = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        if notification.raw_id().is_none() {
            return Err(PaymentError::WebhookParse("missing transaction id".into()));
        }
        Ok(notification)
    }

    fn raw_id(&self) -> Option<&str> {
        self.transaction_id
            .as_deref()
            .or(self.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new(self.raw_id().unwrap_or_default())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_provider(&self.status)
    }
}

/// Webhook handler
pub struct WebhookHandler<S: AccountStore> {
    verifier: WebhookVerifier,
    reconciler: Arc<Reconciler<S>>,
}

impl<S: AccountStore> WebhookHandler<S> {
    pub const fn new(verifier: WebhookVerifier, reconciler: Arc<Reconciler<S>>) -> Self {
        Self {
            verifier,
            reconciler,
        }
    }

    /// Verify the signature, then parse the notification
    pub fn parse_event(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookNotification> {
        if !self.verifier.is_configured() {
            tracing::error!("Webhook secret not configured; rejecting notification");
            return Err(PaymentError::WebhookRejected("webhook secret not configured".into()));
        }

        let Some(signature) = signature else {
            return Err(PaymentError::WebhookRejected("missing signature".into()));
        };

        if !self.verifier.verify(payload, signature) {
            tracing::warn!(bytes = payload.len(), "Webhook signature mismatch");
            return Err(PaymentError::WebhookRejected("invalid signature".into()));
        }

        WebhookNotification::parse(payload)
    }

    /// Verify, parse and reconcile one delivery
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> Result<Option<DomainEvent>> {
        let notification = self.parse_event(payload, signature)?;
        self.observe(&notification).await
    }

    async fn observe(&self, notification: &WebhookNotification) -> Result<Option<DomainEvent>> {
        let transaction_id = notification.transaction_id();
        let status = notification.status();

        tracing::info!(
            %transaction_id,
            %status,
            event = notification.event.as_deref().unwrap_or("-"),
            "Processing payment webhook"
        );

        self.reconciler.observe(&transaction_id, status).await
    }
}
