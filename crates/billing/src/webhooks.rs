//! Webhook processing orchestration
//!
//! Claims each (provider, event id) delivery before dispatching so that
//! concurrent redelivery of the same event is serialized, runs the matching
//! reconciler, and records the outcome on the claim row.

use std::sync::Arc;

use crate::activity::ActivityLogger;
use crate::client::CheckoutLinks;
use crate::error::BillingResult;
use crate::event::{EventKind, WebhookEvent};
use crate::invoices::InvoiceReconciler;
use crate::one_time::OneTimePaymentReconciler;
use crate::resolver::EntityResolver;
use crate::store::BillingStore;
use crate::subscriptions::SubscriptionReconciler;

/// Dispatches decoded webhook events to the reconciliation handlers
pub struct WebhookHandler {
    store: Arc<dyn BillingStore>,
    subscriptions: SubscriptionReconciler,
    invoices: InvoiceReconciler,
    one_time: OneTimePaymentReconciler,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn BillingStore>, links: Arc<dyn CheckoutLinks>) -> Self {
        let activity = ActivityLogger::new(store.clone());
        let resolver = EntityResolver::new(store.clone(), activity.clone());

        Self {
            subscriptions: SubscriptionReconciler::new(
                store.clone(),
                resolver.clone(),
                activity.clone(),
            ),
            invoices: InvoiceReconciler::new(store.clone(), resolver.clone(), activity.clone()),
            one_time: OneTimePaymentReconciler::new(store.clone(), resolver, activity, links),
            store,
        }
    }

    /// Replace the reconcilers (used by tests to shrink retry schedules)
    pub fn with_reconcilers(
        mut self,
        subscriptions: SubscriptionReconciler,
        invoices: InvoiceReconciler,
        one_time: OneTimePaymentReconciler,
    ) -> Self {
        self.subscriptions = subscriptions;
        self.invoices = invoices;
        self.one_time = one_time;
        self
    }

    /// Handle a verified, decoded event
    ///
    /// The claim makes processing idempotent per provider event id: a
    /// duplicate delivery is acknowledged without touching any billing state.
    pub async fn handle_event(&self, event: WebhookEvent) -> BillingResult<()> {
        let claimed = self
            .store
            .claim_webhook_event(event.provider, &event.event_id, event.kind.name())
            .await?;

        if !claimed {
            tracing::info!(
                provider = %event.provider,
                event_id = %event.event_id,
                event_type = event.kind.name(),
                "Duplicate webhook delivery, skipping"
            );
            return Ok(());
        }

        tracing::info!(
            provider = %event.provider,
            event_id = %event.event_id,
            event_type = event.kind.name(),
            "Processing webhook event"
        );

        let result = self.dispatch(&event).await;

        let (outcome, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .finish_webhook_event(
                event.provider,
                &event.event_id,
                outcome,
                error_message.as_deref(),
            )
            .await
        {
            tracing::error!(
                provider = %event.provider,
                event_id = %event.event_id,
                outcome = outcome,
                error = %e,
                "Failed to record webhook processing outcome"
            );
        }

        result
    }

    async fn dispatch(&self, event: &WebhookEvent) -> BillingResult<()> {
        match &event.kind {
            EventKind::SubscriptionCreated(payload) => {
                self.subscriptions.handle_created(event, payload).await
            }
            EventKind::SubscriptionUpdated(payload) => {
                self.subscriptions.handle_updated(event, payload).await
            }
            EventKind::SubscriptionDeleted(payload) => {
                self.subscriptions.handle_deleted(event, payload).await
            }
            EventKind::InvoiceCreated(payload) => self.invoices.handle_created(event, payload).await,
            EventKind::InvoiceUpdated(payload) => self.invoices.handle_updated(event, payload).await,
            // The period fields' absence is the sole one-time signal
            EventKind::PaymentSucceeded(payload) if payload.is_one_time() => {
                self.one_time.handle(event, payload).await
            }
            EventKind::PaymentSucceeded(payload) => {
                self.invoices.handle_payment(event, payload).await
            }
        }
    }
}
