//! Shared test utilities for the reconciliation tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use agencydesk_billing::{
    ActivityLogger, BillingError, BillingResult, CheckoutLinkRequest, CheckoutLinks,
    EntityResolver, EventKind, InvoicePayload, InvoiceReconciler, MemoryStore,
    OneTimePaymentReconciler, PaymentPayload, RetryPolicy, SubscriptionPayload,
    SubscriptionReconciler, WebhookEvent, WebhookHandler,
};
use agencydesk_shared::BillingProvider;

pub const ACCOUNT_ID: &str = "acct_agency_1";

/// Checkout-link stub that records calls and optionally fails first
pub struct StubLinks {
    pub url: String,
    pub calls: AtomicUsize,
    pub fail_first: usize,
}

impl StubLinks {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            calls: AtomicUsize::new(0),
            fail_first: 0,
        }
    }

    pub fn failing_first(url: &str, fail_first: usize) -> Self {
        Self {
            url: url.to_string(),
            calls: AtomicUsize::new(0),
            fail_first,
        }
    }
}

#[async_trait]
impl CheckoutLinks for StubLinks {
    async fn create_checkout_link(
        &self,
        _provider: BillingProvider,
        _request: &CheckoutLinkRequest,
    ) -> BillingResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(BillingError::ProviderApi("gateway timeout".to_string()));
        }
        Ok(self.url.clone())
    }
}

pub struct TestPipeline {
    pub store: Arc<MemoryStore>,
    pub handler: WebhookHandler,
    pub links: Arc<StubLinks>,
    pub agency_id: Uuid,
}

/// Build a handler over a fresh in-memory store with millisecond retry
/// schedules and a seeded billing account.
pub async fn pipeline() -> TestPipeline {
    pipeline_with_links(StubLinks::new("https://pay.example.com/link_1")).await
}

pub async fn pipeline_with_links(links: StubLinks) -> TestPipeline {
    let store = Arc::new(MemoryStore::new());
    let agency_id = Uuid::new_v4();
    store
        .add_billing_account(agency_id, BillingProvider::Stripe, ACCOUNT_ID)
        .await;
    store
        .add_billing_account(agency_id, BillingProvider::Treli, ACCOUNT_ID)
        .await;

    let links = Arc::new(links);
    let fast = RetryPolicy::new(3, std::time::Duration::from_millis(2), 2);

    let store_dyn: Arc<dyn agencydesk_billing::BillingStore> = store.clone();
    let activity = ActivityLogger::new(store_dyn.clone());
    let resolver = EntityResolver::new(store_dyn.clone(), activity.clone());

    let handler = WebhookHandler::new(store_dyn.clone(), links.clone()).with_reconcilers(
        SubscriptionReconciler::new(store_dyn.clone(), resolver.clone(), activity.clone()),
        InvoiceReconciler::new(store_dyn.clone(), resolver.clone(), activity.clone())
            .with_retry_policies(fast, fast),
        OneTimePaymentReconciler::new(store_dyn, resolver, activity, links.clone())
            .with_link_retry(fast),
    );

    TestPipeline {
        store,
        handler,
        links,
        agency_id,
    }
}

pub fn subscription_payload(subscription_id: &str, customer_id: &str, status: &str) -> SubscriptionPayload {
    SubscriptionPayload {
        subscription_id: subscription_id.to_string(),
        customer_id: customer_id.to_string(),
        customer_email: Some(format!("{customer_id}@example.com")),
        customer_name: Some("Acme Coffee".to_string()),
        status: status.to_string(),
        current_period_start: Some(1_700_000_000),
        current_period_end: Some(1_702_592_000),
        trial_start: None,
        trial_end: None,
    }
}

pub fn invoice_payload(invoice_id: &str, customer_id: &str, status: &str) -> InvoicePayload {
    InvoicePayload {
        invoice_id: invoice_id.to_string(),
        customer_id: customer_id.to_string(),
        customer_email: Some(format!("{customer_id}@example.com")),
        subscription_id: None,
        status: status.to_string(),
        currency: "usd".to_string(),
        total_cents: 9_900,
        amount_due_cents: 9_900,
        amount_paid_cents: 0,
        description: Some("Monthly retainer".to_string()),
        issued_at: Some(1_700_000_000),
        due_date: Some(1_702_592_000),
        lines: vec![],
    }
}

pub fn one_time_payment_payload(payment_id: &str, customer_id: &str) -> PaymentPayload {
    PaymentPayload {
        payment_id: payment_id.to_string(),
        customer_id: Some(customer_id.to_string()),
        customer_email: Some(format!("{customer_id}@example.com")),
        customer_name: Some("Acme Coffee".to_string()),
        invoice_id: None,
        description: Some("Brand audit package".to_string()),
        amount_cents: 45_000,
        currency: "usd".to_string(),
        current_period_start: None,
        current_period_end: None,
        trial_start: None,
        trial_end: None,
    }
}

pub fn event(provider: BillingProvider, event_id: &str, kind: EventKind) -> WebhookEvent {
    WebhookEvent {
        provider,
        event_id: event_id.to_string(),
        account_id: Some(ACCOUNT_ID.to_string()),
        created: None,
        kind,
    }
}

pub fn stripe_event(event_id: &str, kind: EventKind) -> WebhookEvent {
    event(BillingProvider::Stripe, event_id, kind)
}
