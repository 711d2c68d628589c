//! Kirvano Hosted Checkout Client
//!
//! `POST /checkout` opens a session, `GET /transactions/{id}` reads its status.
//! Field names vary between API versions, so responses accept both spellings.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{GatewayConfig, PaymentGateway};
use crate::checkout::CheckoutRequest;
use crate::error::{PaymentError, Result};
use crate::intent::Customer;
use crate::session::{CheckoutSession, SessionStatus, TransactionId};

/// Kirvano API client
pub struct KirvanoClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl std::fmt::Debug for KirvanoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KirvanoClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl KirvanoClient {
    /// Create a client, failing fast on missing credentials or endpoint
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PaymentError::ConfigurationMissing("KIRVANO_API_KEY not set".into()))?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            PaymentError::ConfigurationMissing(format!("KIRVANO_API_URL invalid: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PaymentError::ConfigurationMissing(
                "KIRVANO_API_URL cannot be a base URL".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::ConfigurationMissing(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(&GatewayConfig::from_env())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PaymentError::ConfigurationMissing("KIRVANO_API_URL cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl PaymentGateway for KirvanoClient {
    async fn create_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let url = self.endpoint(&["checkout"])?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(&CreateCheckoutBody::from(request))
            .send()
            .await
            .map_err(transport_error)?;

        let body: TransactionBody = read_json(response, None).await?;

        let transaction_id = body
            .transaction_id()
            .ok_or_else(|| PaymentError::GatewayUnavailable("No transaction id returned".into()))?;
        let checkout_url = body
            .checkout_url()
            .ok_or_else(|| PaymentError::GatewayUnavailable("No checkout URL returned".into()))?;

        if let Some(status) = body.status.as_deref() {
            if SessionStatus::from_provider(status) != SessionStatus::Pending {
                tracing::debug!(%transaction_id, status, "New session reported non-pending status");
            }
        }

        tracing::info!(
            %transaction_id,
            amount = request.amount_minor_units,
            idempotency_key = %request.idempotency_key,
            "Created Kirvano checkout session"
        );

        Ok(CheckoutSession::pending(transaction_id, checkout_url))
    }

    async fn get_status(&self, transaction_id: &TransactionId) -> Result<CheckoutSession> {
        let url = self.endpoint(&["transactions", transaction_id.as_str()])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let body: TransactionBody = read_json(response, Some(transaction_id)).await?;

        let status = body
            .status
            .as_deref()
            .map_or(SessionStatus::Unknown, SessionStatus::from_provider);

        Ok(CheckoutSession {
            transaction_id: body.transaction_id().unwrap_or_else(|| transaction_id.clone()),
            checkout_url: body.checkout_url().unwrap_or_default(),
            status,
            created_at: body.created_at.unwrap_or_else(Utc::now),
        })
    }

    fn name(&self) -> &str {
        "Kirvano"
    }
}

fn transport_error(err: reqwest::Error) -> PaymentError {
    tracing::warn!(error = %err, "Kirvano request failed");
    PaymentError::GatewayUnavailable(err.to_string())
}

/// Map the HTTP status, then decode the body
///
/// `lookup` marks a transaction read, where 404 means the id is unknown.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    lookup: Option<&TransactionId>,
) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), %message, "Kirvano returned an error");

        return Err(match (status, lookup) {
            (StatusCode::NOT_FOUND, Some(id)) => PaymentError::NotFound(id.to_string()),
            (s, _) if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                PaymentError::GatewayUnavailable(format!("{s}: {message}"))
            }
            (s, _) => PaymentError::GatewayRejected {
                status: s.as_u16(),
                message,
            },
        });
    }

    response
        .json()
        .await
        .map_err(|e| PaymentError::GatewayUnavailable(format!("Malformed gateway response: {e}")))
}

#[derive(Serialize)]
struct CreateCheckoutBody<'a> {
    amount: u64,
    currency: &'static str,
    description: &'a str,
    customer: &'a Customer,
    items: Vec<ItemBody<'a>>,
    metadata: &'a BTreeMap<String, String>,
    success_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Serialize)]
struct ItemBody<'a> {
    name: &'a str,
    quantity: u32,
    price: u64,
}

impl<'a> From<&'a CheckoutRequest> for CreateCheckoutBody<'a> {
    fn from(request: &'a CheckoutRequest) -> Self {
        Self {
            amount: request.amount_minor_units,
            currency: request.currency.as_str(),
            description: &request.description,
            customer: &request.customer,
            items: request
                .line_items
                .iter()
                .map(|item| ItemBody {
                    name: &item.name,
                    quantity: item.quantity,
                    price: item.unit_price_minor_units,
                })
                .collect(),
            metadata: &request.metadata,
            success_url: &request.success_url,
            cancel_url: &request.cancel_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl TransactionBody {
    fn transaction_id(&self) -> Option<TransactionId> {
        self.id
            .clone()
            .or_else(|| self.transaction_id.clone())
            .map(TransactionId::new)
    }

    fn checkout_url(&self) -> Option<String> {
        self.checkout_url.clone().or_else(|| self.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::SessionBuilder;
    use crate::intent::PurchaseIntent;
    use store_core::Catalog;

    fn client(base_url: &str) -> KirvanoClient {
        let config = GatewayConfig::default()
            .with_api_key("kv_test_key")
            .with_base_url(base_url);
        KirvanoClient::new(&config).unwrap()
    }

    fn access_request() -> CheckoutRequest {
        SessionBuilder::new("https://ebooksja.com.br")
            .build(&PurchaseIntent::access("a@b.com", "A"), &OwnedNothing)
            .unwrap()
    }

    struct OwnedNothing;

    impl store_core::ItemLookup for OwnedNothing {
        fn lookup(&self, _id: store_core::ItemId) -> Option<store_core::ItemView> {
            None
        }
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let err = KirvanoClient::new(&GatewayConfig::default()).unwrap_err();
        assert!(matches!(err, PaymentError::ConfigurationMissing(_)));

        let blank = GatewayConfig::default().with_api_key("  ");
        assert!(matches!(
            KirvanoClient::new(&blank),
            Err(PaymentError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_invalid_base_url_fails_fast() {
        let config = GatewayConfig::default()
            .with_api_key("kv_test_key")
            .with_base_url("not a url");
        assert!(matches!(
            KirvanoClient::new(&config),
            Err(PaymentError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = client("https://api.kirvano.com.br/v1/");
        let url = client.endpoint(&["transactions", "tx/1"]).unwrap();
        assert_eq!(url.as_str(), "https://api.kirvano.com.br/v1/transactions/tx%2F1");
    }

    #[test]
    fn test_request_body_shape() {
        let catalog = Catalog::with_defaults();
        let account = store_core::Account::default();
        let request = SessionBuilder::default()
            .build(
                &PurchaseIntent::cart("a@b.com", "A", [store_core::ItemId(7)]),
                &store_core::OwnedCatalog::new(&catalog, &account),
            )
            .unwrap();

        let body = serde_json::to_value(CreateCheckoutBody::from(&request)).unwrap();
        assert_eq!(body["amount"], 499);
        assert_eq!(body["currency"], "BRL");
        assert_eq!(body["customer"]["email"], "a@b.com");
        assert_eq!(body["items"][0]["price"], 499);
        assert_eq!(body["items"][0]["quantity"], 1);
        assert_eq!(body["metadata"]["item_ids"], "7");
        assert_eq!(body["success_url"], "http://localhost:3000/success");
    }

    #[tokio::test]
    async fn test_create_session() {
        let mut server = mockito::Server::new_async().await;
        let request = access_request();

        let mock = server
            .mock("POST", "/checkout")
            .match_header("authorization", "Bearer kv_test_key")
            .match_header("idempotency-key", request.idempotency_key.as_str())
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"transaction_id":"tx_42","url":"https://pay.kirvano.com/tx_42","status":"created"}"#)
            .expect(1)
            .create_async()
            .await;

        let session = client(&server.url()).create_session(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(session.transaction_id, TransactionId::new("tx_42"));
        assert_eq!(session.checkout_url, "https://pay.kirvano.com/tx_42");
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_session_error_mapping() {
        let mut server = mockito::Server::new_async().await;
        let request = access_request();

        let _unavailable = server
            .mock("POST", "/checkout")
            .with_status(503)
            .with_body("maintenance")
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url()).create_session(&request).await.unwrap_err();
        assert!(matches!(err, PaymentError::GatewayUnavailable(_)));
        assert!(err.is_retryable());

        let mut strict = mockito::Server::new_async().await;
        let _rejected = strict
            .mock("POST", "/checkout")
            .with_status(422)
            .with_body(r#"{"error":"invalid amount"}"#)
            .create_async()
            .await;

        let err = client(&strict.url()).create_session(&request).await.unwrap_err();
        assert!(matches!(err, PaymentError::GatewayRejected { status: 422, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_session_without_url_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/checkout")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"tx_1"}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .create_session(&access_request())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::GatewayUnavailable(_)));
    }

    #[tokio::test]
    async fn test_get_status() {
        let mut server = mockito::Server::new_async().await;
        let _paid = server
            .mock("GET", "/transactions/tx_42")
            .match_header("authorization", "Bearer kv_test_key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"tx_42","status":"paid","checkout_url":"https://pay.kirvano.com/tx_42"}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/transactions/tx_404")
            .with_status(404)
            .create_async()
            .await;

        let client = client(&server.url());

        let session = client.get_status(&TransactionId::new("tx_42")).await.unwrap();
        assert_eq!(session.status, SessionStatus::Approved);

        let err = client.get_status(&TransactionId::new("tx_404")).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(id) if id == "tx_404"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let err = client("http://127.0.0.1:1")
            .get_status(&TransactionId::new("tx_1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
