//! Mock Payment Gateway
//!
//! For development and tests. Deduplicates by idempotency key like the real
//! provider, replays scripted statuses and can inject transient failures
//! or provider rejections.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::PaymentGateway;
use crate::checkout::{CheckoutRequest, IdempotencyKey};
use crate::error::{PaymentError, Result};
use crate::session::{CheckoutSession, SessionStatus, TransactionId};

#[derive(Default)]
struct MockState {
    sessions: HashMap<TransactionId, CheckoutSession>,
    by_key: HashMap<IdempotencyKey, TransactionId>,
    scripted: HashMap<TransactionId, VecDeque<SessionStatus>>,
    requests: Vec<CheckoutRequest>,
    failures_remaining: u32,
    rejections_remaining: u32,
    create_calls: u32,
    status_calls: u32,
    next_id: u64,
}

/// In-memory gateway
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` calls with `GatewayUnavailable`
    pub fn fail_next(&self, n: u32) {
        self.state().failures_remaining = n;
    }

    /// Reject the next `n` calls with `GatewayRejected`
    pub fn reject_next(&self, n: u32) {
        self.state().rejections_remaining = n;
    }

    /// Queue statuses for successive `get_status` calls
    pub fn script_statuses(
        &self,
        transaction_id: &TransactionId,
        statuses: impl IntoIterator<Item = SessionStatus>,
    ) {
        self.state()
            .scripted
            .entry(transaction_id.clone())
            .or_default()
            .extend(statuses);
    }

    /// Number of `create_session` calls, failed ones included
    pub fn create_calls(&self) -> u32 {
        self.state().create_calls
    }

    /// Number of `get_status` calls, failed ones included
    pub fn status_calls(&self) -> u32 {
        self.state().status_calls
    }

    /// Requests that reached the gateway
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.state().requests.clone()
    }

    fn take_failure(state: &mut MockState) -> Result<()> {
        if state.rejections_remaining > 0 {
            state.rejections_remaining -= 1;
            return Err(PaymentError::GatewayRejected {
                status: 422,
                message: "injected rejection".into(),
            });
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(PaymentError::GatewayUnavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let mut state = self.state();
        state.create_calls += 1;
        Self::take_failure(&mut state)?;

        state.requests.push(request.clone());

        if let Some(existing) = state
            .by_key
            .get(&request.idempotency_key)
            .and_then(|id| state.sessions.get(id))
        {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let transaction_id = TransactionId::new(format!("tx_mock_{}", state.next_id));
        let session = CheckoutSession::pending(
            transaction_id.clone(),
            format!("https://mock.kirvano.local/checkout/{transaction_id}"),
        );

        state
            .by_key
            .insert(request.idempotency_key.clone(), transaction_id.clone());
        state.sessions.insert(transaction_id, session.clone());

        Ok(session)
    }

    async fn get_status(&self, transaction_id: &TransactionId) -> Result<CheckoutSession> {
        let mut state = self.state();
        state.status_calls += 1;
        Self::take_failure(&mut state)?;

        let next = state
            .scripted
            .get_mut(transaction_id)
            .and_then(VecDeque::pop_front);

        let session = state
            .sessions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(transaction_id.to_string()))?;

        match next {
            Some(status) => {
                let updated = session.with_status(status);
                state.sessions.insert(transaction_id.clone(), updated.clone());
                Ok(updated)
            }
            None => Ok(session),
        }
    }

    fn name(&self) -> &str {
        "Mock"
    }
}
