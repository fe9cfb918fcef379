//! Invoice reconciliation
//!
//! Creates and updates invoice rows from provider events. Invoice creation
//! and payment recording run under retry policies because the rows they
//! reference (subscription, billing account, invoice) may not be committed
//! yet when the provider delivers the event.

use std::sync::Arc;

use time::OffsetDateTime;

use agencydesk_shared::{BillingProvider, InvoiceStatus};

use crate::activity::{ActivityBuilder, ActivityLogger, ActivityType};
use crate::error::{BillingError, BillingResult};
use crate::event::{unix_timestamp_opt, InvoicePayload, PaymentPayload, WebhookEvent};
use crate::resolver::EntityResolver;
use crate::retry::{retry_if_transient, RetryPolicy};
use crate::store::{BillingStore, InvoiceItemRecord, InvoicePaymentRecord, InvoiceRecord};

/// Map a Stripe invoice status onto the internal enum.
/// Unmapped statuses default to `Draft`.
pub fn map_stripe_invoice_status(status: &str) -> InvoiceStatus {
    match status {
        "draft" => InvoiceStatus::Draft,
        "open" => InvoiceStatus::Issued,
        "paid" => InvoiceStatus::Paid,
        "uncollectible" => InvoiceStatus::Overdue,
        "void" => InvoiceStatus::Voided,
        _ => InvoiceStatus::Draft,
    }
}

/// Map a Treli invoice status onto the internal enum.
/// Unmapped statuses default to `Draft`.
pub fn map_treli_invoice_status(status: &str) -> InvoiceStatus {
    match status {
        "draft" => InvoiceStatus::Draft,
        "pending" => InvoiceStatus::Issued,
        "approved" | "paid" => InvoiceStatus::Paid,
        "overdue" => InvoiceStatus::Overdue,
        "cancelled" | "void" => InvoiceStatus::Voided,
        _ => InvoiceStatus::Draft,
    }
}

pub fn map_invoice_status(provider: BillingProvider, status: &str) -> InvoiceStatus {
    match provider {
        BillingProvider::Stripe => map_stripe_invoice_status(status),
        BillingProvider::Treli => map_treli_invoice_status(status),
    }
}

/// Reconciles invoice lifecycle and payment events
pub struct InvoiceReconciler {
    store: Arc<dyn BillingStore>,
    resolver: EntityResolver,
    activity: ActivityLogger,
    created_retry: RetryPolicy,
    payment_retry: RetryPolicy,
}

impl InvoiceReconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        resolver: EntityResolver,
        activity: ActivityLogger,
    ) -> Self {
        Self {
            store,
            resolver,
            activity,
            created_retry: RetryPolicy::INVOICE_CREATED,
            payment_retry: RetryPolicy::INVOICE_PAYMENT,
        }
    }

    /// Override the retry schedules (used by tests)
    pub fn with_retry_policies(mut self, created: RetryPolicy, payment: RetryPolicy) -> Self {
        self.created_retry = created;
        self.payment_retry = payment;
        self
    }

    pub async fn handle_created(
        &self,
        event: &WebhookEvent,
        payload: &InvoicePayload,
    ) -> BillingResult<()> {
        // The subscription/account rows this invoice references may lag
        // behind the provider's delivery; retry before giving up.
        retry_if_transient(&self.created_retry, || self.reconcile_created(event, payload)).await
    }

    async fn reconcile_created(
        &self,
        event: &WebhookEvent,
        payload: &InvoicePayload,
    ) -> BillingResult<()> {
        let account = self
            .resolver
            .resolve_agency(event.provider, event.account_id.as_deref())
            .await?;

        let subscription = match &payload.subscription_id {
            Some(subscription_id) => Some(
                self.store
                    .subscription_by_provider_id(event.provider, subscription_id)
                    .await?
                    .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.clone()))?,
            ),
            None => {
                self.store
                    .subscription_by_customer(event.provider, &payload.customer_id)
                    .await?
            }
        };

        let client_id = match &subscription {
            Some(subscription) => Some(subscription.client_id),
            None => self
                .resolver
                .resolve_or_create_client(
                    account.agency_id,
                    event.provider,
                    Some(&payload.customer_id),
                    payload.customer_email.as_deref(),
                    None,
                )
                .await
                .map(|client| Some(client.id))?,
        };

        let status = map_invoice_status(event.provider, &payload.status);
        let paid_at = (status == InvoiceStatus::Paid).then(OffsetDateTime::now_utc);

        let mut items = Vec::with_capacity(payload.lines.len());
        for line in &payload.lines {
            let service_id = match &line.price_id {
                Some(price_id) => self
                    .store
                    .service_by_provider_price(account.agency_id, price_id)
                    .await?
                    .map(|service| service.id),
                None => None,
            };
            items.push(InvoiceItemRecord {
                service_id,
                provider_line_id: line.line_id.clone(),
                description: line
                    .description
                    .clone()
                    .unwrap_or_else(|| "Invoice item".to_string()),
                quantity: line.quantity,
                unit_amount_cents: line.unit_amount_cents,
                amount_cents: line.amount_cents,
                period_start: unix_timestamp_opt(line.period_start),
                period_end: unix_timestamp_opt(line.period_end),
            });
        }

        let invoice = self
            .store
            .upsert_invoice(
                InvoiceRecord {
                    agency_id: account.agency_id,
                    client_id,
                    subscription_id: subscription.as_ref().map(|s| s.id),
                    provider: event.provider,
                    provider_id: payload.invoice_id.clone(),
                    status,
                    currency: payload.currency.clone(),
                    total_cents: payload.total_cents,
                    amount_due_cents: payload.amount_due_cents,
                    amount_paid_cents: payload.amount_paid_cents,
                    description: payload.description.clone(),
                    issued_at: unix_timestamp_opt(payload.issued_at),
                    due_date: unix_timestamp_opt(payload.due_date),
                    paid_at,
                },
                items,
            )
            .await?;

        self.activity
            .log_best_effort(
                ActivityBuilder::new(account.agency_id, ActivityType::InvoiceCreated)
                    .data(serde_json::json!({
                        "status": status.as_str(),
                        "total_cents": payload.total_cents,
                        "line_count": payload.lines.len(),
                    }))
                    .provider_event(&event.event_id)
                    .invoice(&payload.invoice_id)
                    .customer(&payload.customer_id),
            )
            .await;

        tracing::info!(
            agency_id = %account.agency_id,
            invoice_id = %invoice.id,
            provider_invoice_id = %payload.invoice_id,
            total_cents = payload.total_cents,
            "Invoice created"
        );

        Ok(())
    }

    pub async fn handle_updated(
        &self,
        event: &WebhookEvent,
        payload: &InvoicePayload,
    ) -> BillingResult<()> {
        let invoice = self
            .store
            .invoice_by_provider_id(event.provider, &payload.invoice_id)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(payload.invoice_id.clone()))?;

        let next = map_invoice_status(event.provider, &payload.status);

        // paid_at records only the first transition into Paid
        let paid_at = if next == InvoiceStatus::Paid && invoice.status != InvoiceStatus::Paid {
            Some(OffsetDateTime::now_utc())
        } else {
            invoice.paid_at
        };

        self.store
            .update_invoice_status(invoice.id, next, paid_at)
            .await?;

        self.activity
            .log_best_effort(
                ActivityBuilder::new(invoice.agency_id, ActivityType::InvoiceUpdated)
                    .data(serde_json::json!({
                        "previous_status": invoice.status.as_str(),
                        "status": next.as_str(),
                    }))
                    .provider_event(&event.event_id)
                    .invoice(&payload.invoice_id),
            )
            .await;

        tracing::info!(
            agency_id = %invoice.agency_id,
            invoice_id = %invoice.id,
            previous_status = %invoice.status,
            status = %next,
            "Invoice updated"
        );

        Ok(())
    }

    /// Record a payment against an existing invoice (the subscription path)
    pub async fn handle_payment(
        &self,
        event: &WebhookEvent,
        payload: &PaymentPayload,
    ) -> BillingResult<()> {
        let provider_invoice_id = payload
            .invoice_id
            .as_deref()
            .ok_or(BillingError::MissingField("invoice id"))?;

        // The invoice row may not be committed yet; retry the lookup
        let invoice = retry_if_transient(&self.payment_retry, || async {
            self.store
                .invoice_by_provider_id(event.provider, provider_invoice_id)
                .await?
                .ok_or_else(|| BillingError::InvoiceNotFound(provider_invoice_id.to_string()))
        })
        .await?;

        let payment = self
            .store
            .insert_invoice_payment(InvoicePaymentRecord {
                invoice_id: invoice.id,
                provider_payment_id: Some(payload.payment_id.clone()),
                amount_cents: payload.amount_cents,
                currency: payload.currency.clone(),
                paid_at: OffsetDateTime::now_utc(),
            })
            .await?;

        self.activity
            .log_best_effort(
                ActivityBuilder::new(invoice.agency_id, ActivityType::InvoicePaymentRecorded)
                    .data(serde_json::json!({
                        "amount_cents": payload.amount_cents,
                        "payment_id": payload.payment_id,
                    }))
                    .provider_event(&event.event_id)
                    .invoice(provider_invoice_id),
            )
            .await;

        tracing::info!(
            agency_id = %invoice.agency_id,
            invoice_id = %invoice.id,
            payment_id = %payment.id,
            amount_cents = payload.amount_cents,
            "Invoice payment recorded"
        );

        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stripe_status_mapping_totality() {
        assert_eq!(map_stripe_invoice_status("draft"), InvoiceStatus::Draft);
        assert_eq!(map_stripe_invoice_status("open"), InvoiceStatus::Issued);
        assert_eq!(map_stripe_invoice_status("paid"), InvoiceStatus::Paid);
        assert_eq!(
            map_stripe_invoice_status("uncollectible"),
            InvoiceStatus::Overdue
        );
        assert_eq!(map_stripe_invoice_status("void"), InvoiceStatus::Voided);
    }

    #[test]
    fn test_stripe_unknown_status_defaults_to_draft() {
        assert_eq!(map_stripe_invoice_status(""), InvoiceStatus::Draft);
        assert_eq!(map_stripe_invoice_status("deleted"), InvoiceStatus::Draft);
        assert_eq!(map_stripe_invoice_status("PAID"), InvoiceStatus::Draft);
        assert_eq!(
            map_stripe_invoice_status("marked_uncollectible"),
            InvoiceStatus::Draft
        );
    }

    #[test]
    fn test_treli_status_mapping() {
        assert_eq!(map_treli_invoice_status("pending"), InvoiceStatus::Issued);
        assert_eq!(map_treli_invoice_status("approved"), InvoiceStatus::Paid);
        assert_eq!(map_treli_invoice_status("paid"), InvoiceStatus::Paid);
        assert_eq!(map_treli_invoice_status("overdue"), InvoiceStatus::Overdue);
        assert_eq!(map_treli_invoice_status("cancelled"), InvoiceStatus::Voided);
        assert_eq!(map_treli_invoice_status("unknown"), InvoiceStatus::Draft);
    }
}
