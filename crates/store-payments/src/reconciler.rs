//! Payment Reconciliation
//!
//! Decides each transaction's final status from an authoritative source and
//! turns it into ownership changes.
//!
//! ```text
//!            ┌──────────┐
//!  Unknown ─▶│ Pending  │──┬─▶ Approved  (grant applied once)
//!            └──────────┘  ├─▶ Declined  (no effect)
//!                          └─▶ Expired   (deadline passed, no effect)
//! ```
//!
//! Webhooks (after signature verification) and return-URL polls feed the same
//! state machine. Every transaction sits behind its own mutex, so the first
//! terminal write wins and a contradicting one is reported as a conflict.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use store_core::{normalize_email, AccountStore, Grant, ItemId};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{PaymentError, Result};
use crate::gateway::PaymentGateway;
use crate::session::{CheckoutSession, SessionStatus, TransactionId};

/// Reported outcome of a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approved,
    Declined,
    Pending,
}

impl Outcome {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Declined)
    }

    pub const fn status(self) -> SessionStatus {
        match self {
            Self::Approved => SessionStatus::Approved,
            Self::Declined => SessionStatus::Declined,
            Self::Pending => SessionStatus::Pending,
        }
    }
}

/// One observation of a transaction's outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    pub transaction_id: TransactionId,
    pub outcome: Outcome,
    pub applies_to: Grant,
    pub observed_at: DateTime<Utc>,
}

impl ReconciliationEvent {
    pub fn new(transaction_id: TransactionId, outcome: Outcome, applies_to: Grant) -> Self {
        Self {
            transaction_id,
            outcome,
            applies_to,
            observed_at: Utc::now(),
        }
    }
}

/// Emitted for the application once an observation is applied
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    AccessGranted {
        transaction_id: TransactionId,
        customer_email: String,
    },
    ItemsPurchased {
        transaction_id: TransactionId,
        customer_email: String,
        items: BTreeSet<ItemId>,
    },
    PaymentFailed {
        transaction_id: TransactionId,
        customer_email: String,
    },
    PaymentPending {
        transaction_id: TransactionId,
        customer_email: String,
    },
}

/// Status polling bounds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between `get_status` calls
    pub interval: Duration,

    /// How long after tracking a transaction may stay unresolved
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(15 * 60),
        }
    }
}

impl PollConfig {
    /// Read `STORE_POLL_INTERVAL_SECS` and `STORE_POLL_DEADLINE_SECS`
    pub fn from_env() -> Self {
        let secs = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
        };
        let defaults = Self::default();

        Self {
            interval: secs("STORE_POLL_INTERVAL_SECS").unwrap_or(defaults.interval),
            deadline: secs("STORE_POLL_DEADLINE_SECS").unwrap_or(defaults.deadline),
        }
    }
}

struct TrackedTransaction {
    customer_email: String,
    grant: Grant,

    /// Every observed status change, oldest first; never empty
    history: Vec<CheckoutSession>,

    resolved: Option<SessionStatus>,
    resolved_at: Option<Instant>,
    deadline: Instant,
}

impl TrackedTransaction {
    fn current(&self) -> &CheckoutSession {
        // `track` seeds the history with the created session.
        &self.history[self.history.len() - 1]
    }
}

/// Per-transaction reconciliation state machine
pub struct Reconciler<S: AccountStore> {
    accounts: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    poll: PollConfig,
    transactions: RwLock<HashMap<TransactionId, Arc<Mutex<TrackedTransaction>>>>,
}

impl<S: AccountStore> Reconciler<S> {
    pub fn new(accounts: Arc<S>, gateway: Arc<dyn PaymentGateway>, poll: PollConfig) -> Self {
        Self {
            accounts,
            gateway,
            poll,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a freshly created session
    ///
    /// Tracking the same transaction again (a deduplicated retry) keeps the
    /// existing record.
    pub async fn track(&self, session: CheckoutSession, customer_email: &str, grant: Grant) {
        let mut transactions = self.transactions.write().await;
        let transaction_id = session.transaction_id.clone();

        if transactions.contains_key(&transaction_id) {
            tracing::debug!(%transaction_id, "Transaction already tracked");
            return;
        }

        tracing::info!(%transaction_id, grant = grant.as_str(), "Tracking checkout");
        let tracked = TrackedTransaction {
            customer_email: normalize_email(customer_email),
            grant,
            history: vec![session],
            resolved: None,
            resolved_at: None,
            deadline: Instant::now() + self.poll.deadline,
        };
        transactions.insert(transaction_id, Arc::new(Mutex::new(tracked)));
    }

    async fn entry(&self, transaction_id: &TransactionId) -> Result<Arc<Mutex<TrackedTransaction>>> {
        self.transactions
            .read()
            .await
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(transaction_id.to_string()))
    }

    /// Apply an outcome observation
    ///
    /// Returns the emitted domain event, or `None` when the observation
    /// repeats the recorded terminal outcome.
    pub async fn apply(&self, event: ReconciliationEvent) -> Result<Option<DomainEvent>> {
        let entry = self.entry(&event.transaction_id).await?;
        let mut tx = entry.lock().await;
        self.record(&mut tx, event.outcome.status(), &event.applies_to)
    }

    /// Apply a provider-reported status for a tracked transaction
    pub async fn observe(
        &self,
        transaction_id: &TransactionId,
        status: SessionStatus,
    ) -> Result<Option<DomainEvent>> {
        let entry = self.entry(transaction_id).await?;
        let mut tx = entry.lock().await;
        let grant = tx.grant.clone();
        self.record(&mut tx, status, &grant)
    }

    fn record(
        &self,
        tx: &mut TrackedTransaction,
        observed: SessionStatus,
        applies_to: &Grant,
    ) -> Result<Option<DomainEvent>> {
        let transaction_id = tx.current().transaction_id.clone();

        if let Some(recorded) = tx.resolved {
            if recorded == observed {
                tracing::debug!(%transaction_id, status = %observed, "Duplicate terminal observation");
                return Ok(None);
            }

            tracing::warn!(
                %transaction_id,
                %recorded,
                %observed,
                "Reconciliation anomaly: observation contradicts terminal status"
            );

            if observed.is_terminal() {
                return Err(PaymentError::ReconciliationConflict {
                    transaction_id: transaction_id.to_string(),
                    recorded,
                    observed,
                });
            }
            return Ok(None);
        }

        let customer_email = tx.customer_email.clone();
        let event = match observed {
            SessionStatus::Approved => {
                self.accounts.apply_grant(&customer_email, applies_to)?;
                Some(match applies_to {
                    Grant::Access => DomainEvent::AccessGranted {
                        transaction_id: transaction_id.clone(),
                        customer_email,
                    },
                    Grant::Items(items) => DomainEvent::ItemsPurchased {
                        transaction_id: transaction_id.clone(),
                        customer_email,
                        items: items.clone(),
                    },
                })
            }
            SessionStatus::Declined => Some(DomainEvent::PaymentFailed {
                transaction_id: transaction_id.clone(),
                customer_email,
            }),
            SessionStatus::Pending | SessionStatus::Unknown => Some(DomainEvent::PaymentPending {
                transaction_id: transaction_id.clone(),
                customer_email,
            }),
            SessionStatus::Expired => None,
        };

        // Unknown carries no information worth recording.
        if observed != SessionStatus::Unknown && tx.current().status != observed {
            let next = tx.current().with_status(observed);
            tx.history.push(next);
        }

        if observed.is_terminal() {
            tx.resolved = Some(observed);
            tx.resolved_at = Some(Instant::now());
            tracing::info!(%transaction_id, status = %observed, "Transaction resolved");
        }

        Ok(event)
    }

    /// Poll the gateway until the transaction resolves or its deadline passes
    ///
    /// Used when the customer lands on the success URL: the redirect only says
    /// which transaction to check, never that it was paid.
    pub async fn poll(&self, transaction_id: &TransactionId) -> Result<SessionStatus> {
        let entry = self.entry(transaction_id).await?;

        loop {
            let deadline = {
                let mut tx = entry.lock().await;
                if let Some(status) = tx.resolved {
                    return Ok(status);
                }
                if Instant::now() >= tx.deadline {
                    let grant = tx.grant.clone();
                    self.record(&mut tx, SessionStatus::Expired, &grant)?;
                    tracing::info!(%transaction_id, "Polling deadline passed; transaction expired");
                    return Ok(SessionStatus::Expired);
                }
                tx.deadline
            };

            match self.gateway.get_status(transaction_id).await {
                Ok(session) => {
                    let mut tx = entry.lock().await;
                    let grant = tx.grant.clone();
                    match self.record(&mut tx, session.status, &grant) {
                        Ok(_) => {}
                        Err(PaymentError::ReconciliationConflict { .. }) => {}
                        Err(err) => return Err(err),
                    }
                    if let Some(status) = tx.resolved {
                        return Ok(status);
                    }
                }
                Err(err @ (PaymentError::GatewayUnavailable(_) | PaymentError::NotFound(_))) => {
                    tracing::warn!(%transaction_id, error = %err, "Status poll failed; will retry");
                }
                Err(err) => return Err(err),
            }

            let wake = (Instant::now() + self.poll.interval).min(deadline);
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Latest record for a transaction
    pub async fn status(&self, transaction_id: &TransactionId) -> Result<CheckoutSession> {
        let entry = self.entry(transaction_id).await?;
        let tx = entry.lock().await;
        Ok(tx.current().clone())
    }

    /// Every record observed for a transaction, oldest first
    pub async fn history(&self, transaction_id: &TransactionId) -> Result<Vec<CheckoutSession>> {
        let entry = self.entry(transaction_id).await?;
        let tx = entry.lock().await;
        Ok(tx.history.clone())
    }

    /// Terminal status, if reached
    pub async fn resolution(&self, transaction_id: &TransactionId) -> Result<Option<SessionStatus>> {
        let entry = self.entry(transaction_id).await?;
        let tx = entry.lock().await;
        Ok(tx.resolved)
    }

    /// Expire overdue transactions and forget those resolved more than `retention` ago
    ///
    /// An unresolved transaction past its deadline is recorded as `Expired`
    /// with no domain effect, then dropped once the retention window passes
    /// like any other resolved one. Returns how many were dropped. Late
    /// webhooks for a dropped transaction get `NotFound`.
    pub async fn prune_resolved(&self, retention: Duration) -> usize {
        let mut transactions = self.transactions.write().await;
        let before = transactions.len();

        let mut keep = HashMap::with_capacity(before);
        for (id, entry) in transactions.drain() {
            let stale = {
                let mut tx = entry.lock().await;
                if tx.resolved.is_none() && Instant::now() >= tx.deadline {
                    let grant = tx.grant.clone();
                    if let Err(e) = self.record(&mut tx, SessionStatus::Expired, &grant) {
                        tracing::warn!(transaction_id = %id, error = %e, "Failed to expire transaction");
                    } else {
                        tracing::info!(transaction_id = %id, "Deadline passed unresolved; transaction expired");
                    }
                }
                tx.resolved_at.is_some_and(|at| at.elapsed() >= retention)
            };
            if !stale {
                keep.insert(id, entry);
            }
        }
        *transactions = keep;

        let dropped = before - transactions.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Pruned resolved transactions");
        }
        dropped
    }

    /// Number of tracked transactions
    pub async fn tracked(&self) -> usize {
        self.transactions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use store_core::MemoryAccountStore;

    const EMAIL: &str = "a@b.com";

    fn items(ids: &[u32]) -> BTreeSet<ItemId> {
        ids.iter().copied().map(ItemId).collect()
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            deadline: Duration::from_secs(5),
        }
    }

    async fn setup(grant: Grant, poll: PollConfig) -> (Reconciler<MemoryAccountStore>, Arc<MockGateway>, Arc<MemoryAccountStore>, TransactionId) {
        let accounts = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        let reconciler = Reconciler::new(accounts.clone(), gateway.clone(), poll);

        let id = TransactionId::new("tx_1");
        let session = CheckoutSession::pending(id.clone(), "https://pay/tx_1");
        reconciler.track(session, EMAIL, grant).await;

        (reconciler, gateway, accounts, id)
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (reconciler, _, accounts, id) = setup(Grant::Items(items(&[7])), fast_poll()).await;
        accounts.add_to_cart(EMAIL, ItemId(7)).unwrap();

        let event = ReconciliationEvent::new(id.clone(), Outcome::Approved, Grant::Items(items(&[7])));
        let first = reconciler.apply(event.clone()).await.unwrap();
        let after_first = accounts.load(EMAIL).unwrap();
        let second = reconciler.apply(event).await.unwrap();

        assert!(matches!(first, Some(DomainEvent::ItemsPurchased { .. })));
        assert_eq!(second, None);
        assert_eq!(accounts.load(EMAIL).unwrap(), after_first);
        assert!(after_first.cart.is_empty());
        assert_eq!(reconciler.history(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_terminal_outcome() {
        let (reconciler, _, accounts, id) = setup(Grant::Access, fast_poll()).await;

        reconciler
            .apply(ReconciliationEvent::new(id.clone(), Outcome::Declined, Grant::Access))
            .await
            .unwrap();
        let err = reconciler
            .apply(ReconciliationEvent::new(id.clone(), Outcome::Approved, Grant::Access))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentError::ReconciliationConflict {
                recorded: SessionStatus::Declined,
                observed: SessionStatus::Approved,
                ..
            }
        ));
        assert!(!accounts.load(EMAIL).unwrap().has_access);
        assert_eq!(reconciler.resolution(&id).await.unwrap(), Some(SessionStatus::Declined));
    }

    #[tokio::test]
    async fn test_pending_never_grants() {
        let (reconciler, _, accounts, id) = setup(Grant::Access, fast_poll()).await;

        let event = reconciler.observe(&id, SessionStatus::Pending).await.unwrap();
        assert!(matches!(event, Some(DomainEvent::PaymentPending { .. })));
        let unknown = reconciler.observe(&id, SessionStatus::Unknown).await.unwrap();
        assert!(matches!(unknown, Some(DomainEvent::PaymentPending { .. })));
        assert_eq!(reconciler.history(&id).await.unwrap().len(), 1);

        assert!(!accounts.load(EMAIL).unwrap().has_access);
        assert_eq!(reconciler.resolution(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_after_terminal_is_ignored() {
        let (reconciler, _, _, id) = setup(Grant::Access, fast_poll()).await;

        reconciler.observe(&id, SessionStatus::Approved).await.unwrap();
        assert_eq!(reconciler.observe(&id, SessionStatus::Pending).await.unwrap(), None);
        assert_eq!(reconciler.status(&id).await.unwrap().status, SessionStatus::Approved);
    }

    #[tokio::test]
    async fn test_poll_until_approved() {
        let accounts = Arc::new(MemoryAccountStore::new());
        let gateway = Arc::new(MockGateway::new());
        let reconciler = Reconciler::new(accounts.clone(), gateway.clone(), fast_poll());

        let request = crate::checkout::SessionBuilder::default()
            .build(
                &crate::intent::PurchaseIntent::access(EMAIL, "A"),
                &store_core::OwnedCatalog::new(&store_core::Catalog::new(), &store_core::Account::default()),
            )
            .unwrap();
        let session = gateway.create_session(&request).await.unwrap();
        let id = session.transaction_id.clone();
        reconciler.track(session, EMAIL, Grant::Access).await;

        gateway.fail_next(1);
        gateway.script_statuses(&id, [SessionStatus::Pending, SessionStatus::Approved]);

        let status = reconciler.poll(&id).await.unwrap();

        assert_eq!(status, SessionStatus::Approved);
        assert!(accounts.load(EMAIL).unwrap().has_access);
        assert_eq!(gateway.status_calls(), 3);

        // Resolved: no further gateway calls.
        assert_eq!(reconciler.poll(&id).await.unwrap(), SessionStatus::Approved);
        assert_eq!(gateway.status_calls(), 3);
    }

    #[tokio::test]
    async fn test_poll_unknown_transaction() {
        let (reconciler, _, _, _) = setup(Grant::Access, fast_poll()).await;
        let err = reconciler.poll(&TransactionId::new("tx_other")).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_poll_gives_up_at_deadline() {
        let poll = PollConfig {
            interval: Duration::from_millis(5),
            deadline: Duration::from_millis(30),
        };
        // The mock never saw this transaction, so every poll is NotFound.
        let (reconciler, gateway, accounts, id) = setup(Grant::Access, poll).await;

        let status = reconciler.poll(&id).await.unwrap();

        assert_eq!(status, SessionStatus::Expired);
        assert!(gateway.status_calls() >= 1);
        assert!(!accounts.load(EMAIL).unwrap().has_access);

        let late = reconciler.observe(&id, SessionStatus::Approved).await;
        assert!(matches!(late, Err(PaymentError::ReconciliationConflict { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_observations_grant_once() {
        let (reconciler, _, accounts, id) = setup(Grant::Access, fast_poll()).await;
        let reconciler = Arc::new(reconciler);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = reconciler.clone();
                let id = id.clone();
                tokio::spawn(async move { reconciler.observe(&id, SessionStatus::Approved).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if let Ok(Some(DomainEvent::AccessGranted { .. })) = handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
        assert!(accounts.load(EMAIL).unwrap().has_access);
    }

    #[tokio::test]
    async fn test_prune_resolved() {
        let (reconciler, _, _, id) = setup(Grant::Access, fast_poll()).await;
        reconciler
            .track(CheckoutSession::pending(TransactionId::new("tx_2"), "https://pay/tx_2"), EMAIL, Grant::Access)
            .await;

        reconciler.observe(&id, SessionStatus::Declined).await.unwrap();

        assert_eq!(reconciler.prune_resolved(Duration::ZERO).await, 1);
        assert_eq!(reconciler.tracked().await, 1);
        assert!(matches!(reconciler.status(&id).await, Err(PaymentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_prune_expires_abandoned_sessions() {
        let (reconciler, gateway, accounts, id) = setup(
            Grant::Access,
            PollConfig {
                interval: Duration::from_millis(1),
                deadline: Duration::from_millis(10),
            },
        )
        .await;
        for n in 2..=100 {
            let tx = TransactionId::new(format!("tx_{n}"));
            reconciler
                .track(CheckoutSession::pending(tx.clone(), format!("https://pay/{tx}")), EMAIL, Grant::Access)
                .await;
        }
        assert_eq!(reconciler.resolution(&id).await.unwrap(), None);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(reconciler.prune_resolved(Duration::from_secs(60)).await, 0);
        assert_eq!(reconciler.tracked().await, 100);
        assert_eq!(reconciler.resolution(&id).await.unwrap(), Some(SessionStatus::Expired));

        assert_eq!(reconciler.prune_resolved(Duration::ZERO).await, 100);
        assert_eq!(reconciler.tracked().await, 0);
        assert!(!accounts.load(EMAIL).unwrap().has_access);
        assert_eq!(gateway.status_calls(), 0);
    }
}
