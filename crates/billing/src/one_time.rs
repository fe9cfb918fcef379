//! One-time payment reconciliation
//!
//! A payment event carrying no subscription period at all is a one-off
//! purchase. It produces an invoice pre-marked paid, a single line item, a
//! payment record, and an activity entry. The hosted checkout link (used for
//! receipts and repeat purchases) is created through the provider API on a
//! detached task so the webhook ack never waits on it.

use std::sync::Arc;

use time::OffsetDateTime;

use agencydesk_shared::InvoiceStatus;

use crate::activity::{ActivityBuilder, ActivityLogger, ActivityType};
use crate::client::{CheckoutLinkRequest, CheckoutLinks};
use crate::error::BillingResult;
use crate::event::{PaymentPayload, WebhookEvent};
use crate::resolver::EntityResolver;
use crate::retry::{retry_if_transient, RetryPolicy};
use crate::store::{BillingStore, InvoiceItemRecord, InvoicePaymentRecord, InvoiceRecord};

/// Reconciles one-off purchases
pub struct OneTimePaymentReconciler {
    store: Arc<dyn BillingStore>,
    resolver: EntityResolver,
    activity: ActivityLogger,
    links: Arc<dyn CheckoutLinks>,
    link_retry: RetryPolicy,
}

impl OneTimePaymentReconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        resolver: EntityResolver,
        activity: ActivityLogger,
        links: Arc<dyn CheckoutLinks>,
    ) -> Self {
        Self {
            store,
            resolver,
            activity,
            links,
            link_retry: RetryPolicy::CHECKOUT_LINK,
        }
    }

    /// Override the checkout-link retry schedule (used by tests)
    pub fn with_link_retry(mut self, policy: RetryPolicy) -> Self {
        self.link_retry = policy;
        self
    }

    pub async fn handle(
        &self,
        event: &WebhookEvent,
        payload: &PaymentPayload,
    ) -> BillingResult<()> {
        let account = self
            .resolver
            .resolve_agency(event.provider, event.account_id.as_deref())
            .await?;

        // The first successful payment is what creates the client graph
        let client = self
            .resolver
            .resolve_or_create_client(
                account.agency_id,
                event.provider,
                payload.customer_id.as_deref(),
                payload.customer_email.as_deref(),
                payload.customer_name.as_deref(),
            )
            .await?;

        let now = OffsetDateTime::now_utc();
        let description = payload
            .description
            .clone()
            .unwrap_or_else(|| "One-time purchase".to_string());

        let invoice = self
            .store
            .upsert_invoice(
                InvoiceRecord {
                    agency_id: account.agency_id,
                    client_id: Some(client.id),
                    subscription_id: None,
                    provider: event.provider,
                    provider_id: payload.payment_id.clone(),
                    status: InvoiceStatus::Paid,
                    currency: payload.currency.clone(),
                    total_cents: payload.amount_cents,
                    amount_due_cents: 0,
                    amount_paid_cents: payload.amount_cents,
                    description: Some(description.clone()),
                    issued_at: Some(now),
                    due_date: None,
                    paid_at: Some(now),
                },
                vec![InvoiceItemRecord {
                    service_id: None,
                    provider_line_id: Some(payload.payment_id.clone()),
                    description: description.clone(),
                    quantity: 1,
                    unit_amount_cents: payload.amount_cents,
                    amount_cents: payload.amount_cents,
                    period_start: None,
                    period_end: None,
                }],
            )
            .await?;

        self.store
            .insert_invoice_payment(InvoicePaymentRecord {
                invoice_id: invoice.id,
                provider_payment_id: Some(payload.payment_id.clone()),
                amount_cents: payload.amount_cents,
                currency: payload.currency.clone(),
                paid_at: now,
            })
            .await?;

        // Fire and forget: the checkout link is generated on a detached task
        // under its own retry schedule; the handler does not await it.
        let links = self.links.clone();
        let store = self.store.clone();
        let link_retry = self.link_retry;
        let provider = event.provider;
        let invoice_id = invoice.id;
        let request = CheckoutLinkRequest {
            amount_cents: payload.amount_cents,
            currency: payload.currency.clone(),
            description: description.clone(),
            customer_email: payload.customer_email.clone(),
        };
        tokio::spawn(async move {
            let result = retry_if_transient(&link_retry, || {
                links.create_checkout_link(provider, &request)
            })
            .await;

            match result {
                Ok(url) => {
                    if let Err(e) = store.set_invoice_checkout_url(invoice_id, &url).await {
                        tracing::error!(
                            invoice_id = %invoice_id,
                            error = %e,
                            "Failed to store checkout url"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        invoice_id = %invoice_id,
                        provider = %provider,
                        error = %e,
                        "Checkout link creation failed after retries"
                    );
                }
            }
        });

        self.activity
            .log_best_effort(
                ActivityBuilder::new(account.agency_id, ActivityType::OneTimePurchase)
                    .data(serde_json::json!({
                        "amount_cents": payload.amount_cents,
                        "currency": payload.currency,
                        "client_id": client.id,
                    }))
                    .provider_event(&event.event_id)
                    .invoice(&payload.payment_id)
                    .customer(payload.customer_id.clone().unwrap_or_default()),
            )
            .await;

        tracing::info!(
            agency_id = %account.agency_id,
            invoice_id = %invoice.id,
            client_id = %client.id,
            amount_cents = payload.amount_cents,
            "One-time purchase reconciled"
        );

        Ok(())
    }
}
