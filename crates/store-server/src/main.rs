//! e-booksjá HTTP Server
//!
//! Axum-based server for the catalog, carts and hosted checkout.
//!
//! Payments go through the provider's hosted checkout. Ownership only changes
//! when a signed webhook or a status poll confirms the transaction.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use store_core::{Catalog, MemoryAccountStore};
use store_payments::{
    GatewayConfig, KirvanoClient, PaymentGateway, PollConfig, SessionBuilder, WebhookVerifier,
};

use crate::handlers::{
    add_to_cart, checkout_access, checkout_cart, checkout_success, create_ebook, get_account,
    health_check, kirvano_webhook, list_ebooks, remove_from_cart,
};
use crate::state::{AppState, Payments};

/// How often overdue transactions are expired and resolved ones swept
const PRUNE_EVERY: Duration = Duration::from_secs(60);

/// How long a resolved transaction stays queryable
const RESOLVED_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Build the application router
fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Catalog & accounts
        .route("/api/ebooks", get(list_ebooks).post(create_ebook))
        .route("/api/account", get(get_account))
        .route("/api/cart", post(add_to_cart))
        .route("/api/cart/{id}", delete(remove_from_cart))

        // Payments
        .route("/api/checkout/access", post(checkout_access))
        .route("/api/checkout/cart", post(checkout_cart))
        .route("/success", get(checkout_success))
        .route("/webhook/kirvano", post(kirvano_webhook))

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let catalog = Arc::new(Catalog::with_defaults());
    let accounts = Arc::new(MemoryAccountStore::new());
    tracing::info!("Catalog loaded with {} e-books", catalog.len());

    // Initialize payments
    let config = GatewayConfig::from_env();
    let verifier = WebhookVerifier::new(config.webhook_secret.clone());
    let payments = match KirvanoClient::new(&config) {
        Ok(client) => {
            tracing::info!("✓ Kirvano configured at {}", config.base_url);
            let gateway: Arc<dyn PaymentGateway> = Arc::new(client);
            Some(Arc::new(Payments::new(
                gateway,
                accounts.clone(),
                PollConfig::from_env(),
                verifier,
            )))
        }
        Err(e) => {
            tracing::warn!("⚠ Payments disabled: {}", e);
            tracing::warn!("  Set KIRVANO_API_KEY and KIRVANO_WEBHOOK_SECRET in .env");
            None
        }
    };

    if let Some(payments) = &payments {
        if !payments.webhook_configured {
            tracing::warn!("⚠ KIRVANO_WEBHOOK_SECRET not set - webhooks will be rejected");
        }

        let reconciler = payments.reconciler.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_EVERY);
            loop {
                ticker.tick().await;
                reconciler.prune_resolved(RESOLVED_RETENTION).await;
            }
        });
    }

    let state = AppState {
        catalog,
        accounts,
        builder: Arc::new(SessionBuilder::from_env()),
        payments,
    };

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 e-booksjá server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health               - Health check");
    tracing::info!("  GET    /api/ebooks           - List catalog");
    tracing::info!("  POST   /api/ebooks           - Author e-book (access required)");
    tracing::info!("  GET    /api/account          - Account summary");
    tracing::info!("  POST   /api/cart             - Add to cart");
    tracing::info!("  DELETE /api/cart/{{id}}        - Remove from cart");
    tracing::info!("  POST   /api/checkout/access  - Buy platform access");
    tracing::info!("  POST   /api/checkout/cart    - Buy cart");
    tracing::info!("  GET    /success              - Checkout return URL");
    tracing::info!("  POST   /webhook/kirvano      - Payment webhook");
    tracing::info!("");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
