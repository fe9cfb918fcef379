// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Resolution paths thread several provider identifiers
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Agencydesk Billing Module
//!
//! The billing-webhook reconciliation pipeline: verifies provider deliveries
//! (Stripe, Treli), decodes them into typed events, and reconciles them into
//! internal billing state.
//!
//! ## Features
//!
//! - **Webhook Router**: provider selection by signature header, HMAC verification
//! - **Typed Events**: payloads are decoded and narrowed before any handler runs
//! - **Entity Resolution**: billing account → agency → client, with lazy client creation
//! - **Reconciliation**: subscription lifecycle, invoice lifecycle, one-time purchases
//! - **Retries**: bounded exponential backoff for transient failures only
//! - **Activity Log**: append-only audit records for every reconciliation action

pub mod activity;
pub mod client;
pub mod error;
pub mod event;
pub mod invoices;
pub mod one_time;
pub mod providers;
pub mod resolver;
pub mod retry;
pub mod router;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

// Activity log
pub use activity::{ActivityBuilder, ActivityLogger, ActivityType};

// Clients
pub use client::{
    CheckoutLinkRequest, CheckoutLinks, ProviderGateways, StripeClient, StripeConfig, TreliClient,
    TreliConfig,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use event::{
    EventKind, InvoiceLinePayload, InvoicePayload, PaymentPayload, SubscriptionPayload,
    WebhookEvent,
};

// Reconcilers
pub use invoices::{
    map_invoice_status, map_stripe_invoice_status, map_treli_invoice_status, InvoiceReconciler,
};
pub use one_time::OneTimePaymentReconciler;
pub use subscriptions::SubscriptionReconciler;

// Resolution
pub use resolver::EntityResolver;

// Retry
pub use retry::{retry_if_transient, RetryPolicy};

// Router
pub use router::{SignedDelivery, WebhookRouter};

// Store
pub use store::{
    ActivityRecord, BillingStore, InvoiceItemRecord, InvoicePaymentRecord, InvoiceRecord,
    MemoryStore, NewClient, PgBillingStore, SubscriptionChange, SubscriptionRecord,
};

// Webhooks
pub use webhooks::WebhookHandler;

use std::sync::Arc;

use providers::{StripeEventDecoder, TreliEventDecoder};
use sqlx::PgPool;

/// The assembled reconciliation pipeline: router plus handler
pub struct ReconciliationService {
    pub router: WebhookRouter,
    pub webhooks: WebhookHandler,
}

impl ReconciliationService {
    /// Assemble the pipeline from explicit configs and a store
    ///
    /// At least one provider must be configured.
    pub fn new(
        stripe: Option<StripeConfig>,
        treli: Option<TreliConfig>,
        store: Arc<dyn BillingStore>,
    ) -> BillingResult<Self> {
        if stripe.is_none() && treli.is_none() {
            return Err(BillingError::Config(
                "no billing provider configured".to_string(),
            ));
        }

        let stripe_decoder = stripe
            .as_ref()
            .map(|c| StripeEventDecoder::new(c.webhook_secret.clone()));
        let treli_decoder = treli
            .as_ref()
            .map(|c| TreliEventDecoder::new(c.webhook_secret.clone()));

        let gateways = ProviderGateways {
            stripe: stripe.map(StripeClient::new),
            treli: treli.map(TreliClient::new),
        };

        Ok(Self {
            router: WebhookRouter::new(stripe_decoder, treli_decoder),
            webhooks: WebhookHandler::new(store, Arc::new(gateways)),
        })
    }

    /// Assemble the pipeline from environment variables over a Postgres pool
    ///
    /// Providers whose secrets are absent are left unconfigured.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeConfig::from_env().ok();
        let treli = TreliConfig::from_env().ok();

        if stripe.is_some() {
            tracing::info!("Stripe billing provider configured");
        }
        if treli.is_some() {
            tracing::info!("Treli billing provider configured");
        }

        Self::new(stripe, treli, Arc::new(PgBillingStore::new(pool)))
    }
}
