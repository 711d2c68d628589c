//! HTTP Handlers

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use store_core::{
    Account, AccountStore, Ebook, ItemId, NewEbook, OwnedCatalog, StoreError, normalize_email,
};
use store_payments::{
    CheckoutSession, IntentError, PaymentError, PurchaseIntent, SIGNATURE_HEADER, SessionStatus,
    TransactionId, create_session_with_retry, is_valid_email,
};

use crate::state::{AppState, Payments};

/// How long the success page waits on a poll before answering "pending"
const SUCCESS_WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway_configured: bool,
    pub webhook_configured: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategoryCount {
    pub name: &'static str,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct EbookView {
    #[serde(flatten)]
    pub ebook: Ebook,
    pub price: String,
    pub purchased: bool,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub categories: Vec<CategoryCount>,
    pub ebooks: Vec<EbookView>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorRequest {
    pub email: String,
    #[serde(flatten)]
    pub ebook: NewEbook,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub email: String,
    pub has_access: bool,
    pub purchased: BTreeSet<ItemId>,
    pub cart: BTreeSet<ItemId>,
    pub cart_total_minor_units: u64,
    pub cart_total: String,
}

#[derive(Debug, Deserialize)]
pub struct CartRequest {
    pub email: String,
    pub item_id: ItemId,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutForm {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub transaction_id: TransactionId,
    pub amount_minor_units: u64,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub transaction_id: TransactionId,
    pub status: SessionStatus,
    pub confirmed: bool,
    pub message: &'static str,
}

// ============================================================================
// Errors
// ============================================================================

/// Converts domain errors to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    Payment(PaymentError),
    Store(StoreError),
    AlreadyHasAccess,
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Store(store) => Self::Store(store),
            other => Self::Payment(other),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<IntentError> for ApiError {
    fn from(err: IntentError) -> Self {
        Self::Payment(err.into())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String, bool) {
        match self {
            Self::Payment(err) => {
                let (status, code) = match err {
                    PaymentError::InvalidIntent(_) => (StatusCode::BAD_REQUEST, "INVALID_PURCHASE"),
                    PaymentError::ConfigurationMissing(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED")
                    }
                    PaymentError::GatewayUnavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "GATEWAY_UNAVAILABLE")
                    }
                    PaymentError::GatewayRejected { .. } => (StatusCode::BAD_GATEWAY, "GATEWAY_REJECTED"),
                    PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND"),
                    PaymentError::ReconciliationConflict { .. } => {
                        (StatusCode::CONFLICT, "RECONCILIATION_CONFLICT")
                    }
                    PaymentError::WebhookRejected(_) => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
                    PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
                    PaymentError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
                };
                let message = match err {
                    PaymentError::InvalidIntent(reason) => format!("{} ({reason})", err.user_message()),
                    _ => err.user_message().to_string(),
                };
                (status, code, message, err.is_retryable())
            }
            Self::Store(err) => {
                let (status, code) = match err {
                    StoreError::ItemNotFound(_) => (StatusCode::NOT_FOUND, "EBOOK_NOT_FOUND"),
                    StoreError::InvalidEbook(_) => (StatusCode::BAD_REQUEST, "INVALID_EBOOK"),
                    StoreError::AccessRequired(_) => (StatusCode::FORBIDDEN, "ACCESS_REQUIRED"),
                    StoreError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
                };
                (status, code, err.user_message(), err.is_retryable())
            }
            Self::AlreadyHasAccess => (
                StatusCode::CONFLICT,
                "ALREADY_HAS_ACCESS",
                "This account already has platform access.".into(),
                false,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error, retryable) = self.parts();
        if status.is_server_error() {
            tracing::error!(?self, code, "Request failed");
        }

        let body = ErrorResponse {
            error,
            code: code.into(),
            retryable,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn payments(state: &AppState) -> ApiResult<&Arc<Payments>> {
    state.payments.as_ref().ok_or_else(|| {
        PaymentError::ConfigurationMissing("KIRVANO_API_KEY".into()).into()
    })
}

fn checked_email(email: &str) -> ApiResult<String> {
    let email = normalize_email(email);
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(IntentError::InvalidEmail(email).into())
    }
}

fn account_response(state: &AppState, email: String, account: Account) -> AccountResponse {
    let cart_total_minor_units = account
        .cart
        .iter()
        .filter_map(|&id| state.catalog.get(id))
        .map(|ebook| ebook.price_minor_units)
        .sum();

    AccountResponse {
        email,
        has_access: account.has_access,
        purchased: account.purchased,
        cart: account.cart,
        cart_total_minor_units,
        cart_total: state.builder.currency().format(cart_total_minor_units),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway_configured: state.payments.is_some(),
        webhook_configured: state
            .payments
            .as_ref()
            .is_some_and(|payments| payments.webhook_configured),
    })
}

/// List the catalog, flagging e-books the customer owns
pub async fn list_ebooks(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<CatalogResponse>> {
    let account = match query.email.as_deref() {
        Some(email) => state.accounts.load(&checked_email(email)?)?,
        None => Account::default(),
    };
    let currency = state.builder.currency();

    let categories = state
        .catalog
        .categories()
        .iter()
        .map(|&name| CategoryCount {
            name,
            count: state.catalog.count_in(name),
        })
        .collect();

    let ebooks = state
        .catalog
        .list()
        .into_iter()
        .map(|ebook| EbookView {
            price: currency.format(ebook.price_minor_units),
            purchased: account.owns(ebook.id),
            ebook,
        })
        .collect();

    Ok(Json(CatalogResponse { categories, ebooks }))
}

/// Author an e-book; requires platform access
pub async fn create_ebook(
    State(state): State<AppState>,
    Json(payload): Json<AuthorRequest>,
) -> ApiResult<(StatusCode, Json<Ebook>)> {
    let email = checked_email(&payload.email)?;
    if !state.accounts.load(&email)?.has_access {
        return Err(StoreError::AccessRequired("authoring e-books".into()).into());
    }

    let ebook = state.catalog.create(payload.ebook)?;
    Ok((StatusCode::CREATED, Json(ebook)))
}

/// Account summary
pub async fn get_account(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<AccountResponse>> {
    let email = checked_email(query.email.as_deref().unwrap_or_default())?;
    let account = state.accounts.load(&email)?;
    Ok(Json(account_response(&state, email, account)))
}

/// Add an e-book to the cart; requires platform access
pub async fn add_to_cart(
    State(state): State<AppState>,
    Json(payload): Json<CartRequest>,
) -> ApiResult<Json<AccountResponse>> {
    let email = checked_email(&payload.email)?;
    if !state.accounts.load(&email)?.has_access {
        return Err(StoreError::AccessRequired("buying e-books".into()).into());
    }
    if state.catalog.get(payload.item_id).is_none() {
        return Err(StoreError::ItemNotFound(payload.item_id).into());
    }

    let account = state.accounts.add_to_cart(&email, payload.item_id)?;
    Ok(Json(account_response(&state, email, account)))
}

/// Remove an e-book from the cart
pub async fn remove_from_cart(
    State(state): State<AppState>,
    Path(item_id): Path<u32>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<AccountResponse>> {
    let email = checked_email(query.email.as_deref().unwrap_or_default())?;
    let account = state.accounts.remove_from_cart(&email, ItemId(item_id))?;
    Ok(Json(account_response(&state, email, account)))
}

async fn start_checkout(
    state: &AppState,
    payments: &Payments,
    intent: &PurchaseIntent,
    account: &Account,
) -> ApiResult<Json<CheckoutResponse>> {
    let request = state
        .builder
        .build(intent, &OwnedCatalog::new(&state.catalog, account))?;

    let session: CheckoutSession =
        create_session_with_retry(payments.gateway.as_ref(), &request, &payments.retry).await?;

    tracing::info!(
        transaction_id = %session.transaction_id,
        gateway = payments.gateway.name(),
        amount_minor_units = request.amount_minor_units,
        "Checkout session created"
    );

    payments
        .reconciler
        .track(session.clone(), &request.customer.email, intent.grant())
        .await;

    Ok(Json(CheckoutResponse {
        checkout_url: session.checkout_url,
        transaction_id: session.transaction_id,
        amount_minor_units: request.amount_minor_units,
        amount: request.currency.format(request.amount_minor_units),
    }))
}

/// Open a checkout for platform access
pub async fn checkout_access(
    State(state): State<AppState>,
    Json(form): Json<CheckoutForm>,
) -> ApiResult<Json<CheckoutResponse>> {
    let payments = payments(&state)?.clone();
    let email = checked_email(&form.email)?;
    let account = state.accounts.load(&email)?;
    if account.has_access {
        return Err(ApiError::AlreadyHasAccess);
    }

    let intent = PurchaseIntent::access(email, form.name);
    start_checkout(&state, &payments, &intent, &account).await
}

/// Open a checkout for everything in the cart; requires platform access
pub async fn checkout_cart(
    State(state): State<AppState>,
    Json(form): Json<CheckoutForm>,
) -> ApiResult<Json<CheckoutResponse>> {
    let payments = payments(&state)?.clone();
    let email = checked_email(&form.email)?;
    let account = state.accounts.load(&email)?;
    if !account.has_access {
        return Err(StoreError::AccessRequired("buying e-books".into()).into());
    }

    let intent = PurchaseIntent::cart(email, form.name, account.cart.iter().copied());
    start_checkout(&state, &payments, &intent, &account).await
}

/// Return URL: poll the gateway for the named transaction
///
/// The redirect itself proves nothing; only a resolved `Approved` is
/// reported as confirmed.
pub async fn checkout_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> ApiResult<Json<SuccessResponse>> {
    let payments = payments(&state)?.clone();
    let transaction_id = TransactionId::new(query.transaction_id);

    let status = match tokio::time::timeout(SUCCESS_WAIT, payments.reconciler.poll(&transaction_id)).await {
        Ok(result) => result?,
        Err(_) => payments.reconciler.status(&transaction_id).await?.status,
    };

    let message = match status {
        SessionStatus::Approved => "Payment confirmed.",
        SessionStatus::Declined => "Payment was declined.",
        SessionStatus::Expired => "Checkout expired without payment.",
        SessionStatus::Pending | SessionStatus::Unknown => "Payment is still being processed.",
    };

    Ok(Json(SuccessResponse {
        transaction_id,
        status,
        confirmed: status == SessionStatus::Approved,
        message,
    }))
}

/// Provider webhook
pub async fn kirvano_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let payments = payments(&state)?.clone();
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match payments.webhooks.handle(&body, signature).await {
        Ok(event) => {
            if let Some(event) = event {
                tracing::info!(?event, "Webhook applied");
            }
            Ok(StatusCode::OK)
        }
        Err(PaymentError::NotFound(id)) => {
            // Not acknowledged, so the provider redelivers once the checkout is tracked
            tracing::warn!(transaction_id = %id, "Webhook for untracked transaction; asking for redelivery");
            Err(PaymentError::NotFound(id).into())
        }
        Err(err @ PaymentError::ReconciliationConflict { .. }) => {
            tracing::error!(error = %err, "Webhook contradicts recorded outcome; needs manual review");
            Ok(StatusCode::OK)
        }
        Err(err) => Err(err.into()),
    }
}
