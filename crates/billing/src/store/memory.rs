//! In-memory billing store
//!
//! Mirrors the Postgres store's conflict-target and soft-delete semantics.
//! Backs the reconciliation tests and local development without a database.

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use agencydesk_shared::{
    Activity, AgencyService, BillingAccount, BillingProvider, Client, ClientOrganization,
    ClientSubscription, Invoice, InvoiceItem, InvoicePayment, InvoiceStatus,
};

use crate::error::{BillingError, BillingResult};

use super::{
    ActivityRecord, BillingStore, InvoiceItemRecord, InvoicePaymentRecord, InvoiceRecord,
    NewClient, SubscriptionChange, SubscriptionRecord,
};

#[derive(Debug, Clone)]
struct WebhookEventRow {
    provider: BillingProvider,
    event_id: String,
    #[allow(dead_code)]
    event_type: String,
    processing_result: String,
    error_message: Option<String>,
    received_at: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    billing_accounts: Vec<BillingAccount>,
    organizations: Vec<ClientOrganization>,
    clients: Vec<Client>,
    services: Vec<AgencyService>,
    subscriptions: Vec<ClientSubscription>,
    invoices: Vec<Invoice>,
    invoice_items: Vec<InvoiceItem>,
    invoice_payments: Vec<InvoicePayment>,
    activities: Vec<Activity>,
    webhook_events: Vec<WebhookEventRow>,
}

/// In-memory store for tests and local development
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a billing account (provider onboarding happens outside the pipeline)
    pub async fn add_billing_account(
        &self,
        agency_id: Uuid,
        provider: BillingProvider,
        provider_account_id: &str,
    ) -> BillingAccount {
        let account = BillingAccount {
            id: Uuid::new_v4(),
            agency_id,
            provider,
            provider_account_id: provider_account_id.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner.lock().await.billing_accounts.push(account.clone());
        account
    }

    /// Seed an agency service with a provider price id
    pub async fn add_service(
        &self,
        agency_id: Uuid,
        name: &str,
        provider_price_id: Option<&str>,
    ) -> AgencyService {
        let service = AgencyService {
            id: Uuid::new_v4(),
            agency_id,
            name: name.to_string(),
            provider_price_id: provider_price_id.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner.lock().await.services.push(service.clone());
        service
    }

    // Inspection helpers for tests

    pub async fn subscriptions(&self) -> Vec<ClientSubscription> {
        self.inner.lock().await.subscriptions.clone()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.inner.lock().await.invoices.clone()
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.inner.lock().await.clients.clone()
    }

    pub async fn organizations(&self) -> Vec<ClientOrganization> {
        self.inner.lock().await.organizations.clone()
    }

    pub async fn activities(&self) -> Vec<Activity> {
        self.inner.lock().await.activities.clone()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn billing_account(
        &self,
        provider: BillingProvider,
        provider_account_id: &str,
    ) -> BillingResult<Option<BillingAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .billing_accounts
            .iter()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
            .cloned())
    }

    async fn client(&self, id: Uuid) -> BillingResult<Option<Client>> {
        let inner = self.inner.lock().await;
        Ok(inner.clients.iter().find(|c| c.id == id).cloned())
    }

    async fn client_by_email(
        &self,
        agency_id: Uuid,
        email: &str,
    ) -> BillingResult<Option<Client>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .clients
            .iter()
            .find(|c| c.agency_id == agency_id && c.email == email)
            .cloned())
    }

    async fn create_client(&self, client: NewClient) -> BillingResult<Client> {
        let mut inner = self.inner.lock().await;

        if inner
            .clients
            .iter()
            .any(|c| c.agency_id == client.agency_id && c.email == client.email)
        {
            return Err(BillingError::Conflict(format!(
                "client already exists: {}",
                client.email
            )));
        }

        let organization_id = client.organization_name.as_ref().map(|name| {
            let organization = ClientOrganization {
                id: Uuid::new_v4(),
                agency_id: client.agency_id,
                name: name.clone(),
                created_at: OffsetDateTime::now_utc(),
            };
            let id = organization.id;
            inner.organizations.push(organization);
            id
        });

        let created = Client {
            id: Uuid::new_v4(),
            agency_id: client.agency_id,
            organization_id,
            email: client.email,
            name: client.name,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.clients.push(created.clone());

        Ok(created)
    }

    async fn service_by_provider_price(
        &self,
        agency_id: Uuid,
        price_id: &str,
    ) -> BillingResult<Option<AgencyService>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .services
            .iter()
            .find(|s| s.agency_id == agency_id && s.provider_price_id.as_deref() == Some(price_id))
            .cloned())
    }

    async fn subscription_by_customer(
        &self,
        provider: BillingProvider,
        customer_id: &str,
    ) -> BillingResult<Option<ClientSubscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .iter()
            .find(|s| s.billing_provider == provider && s.billing_customer_id == customer_id)
            .cloned())
    }

    async fn subscription_by_provider_id(
        &self,
        provider: BillingProvider,
        subscription_id: &str,
    ) -> BillingResult<Option<ClientSubscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .iter()
            .find(|s| {
                s.billing_provider == provider && s.billing_subscription_id == subscription_id
            })
            .cloned())
    }

    async fn upsert_subscription(
        &self,
        record: SubscriptionRecord,
    ) -> BillingResult<ClientSubscription> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = inner.subscriptions.iter_mut().find(|s| {
            s.billing_customer_id == record.billing_customer_id
                && s.billing_provider == record.billing_provider
        }) {
            existing.billing_subscription_id = record.billing_subscription_id;
            existing.status = record.status;
            existing.active = record.active;
            existing.current_period_start = record.current_period_start;
            existing.current_period_end = record.current_period_end;
            existing.trial_start = record.trial_start;
            existing.trial_end = record.trial_end;
            existing.deleted_on = None;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let subscription = ClientSubscription {
            id: Uuid::new_v4(),
            agency_id: record.agency_id,
            client_id: record.client_id,
            billing_customer_id: record.billing_customer_id,
            billing_provider: record.billing_provider,
            billing_subscription_id: record.billing_subscription_id,
            status: record.status,
            active: record.active,
            current_period_start: record.current_period_start,
            current_period_end: record.current_period_end,
            trial_start: record.trial_start,
            trial_end: record.trial_end,
            deleted_on: None,
            created_at: now,
            updated_at: now,
        };
        inner.subscriptions.push(subscription.clone());

        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        change: SubscriptionChange,
    ) -> BillingResult<ClientSubscription> {
        let mut inner = self.inner.lock().await;

        let subscription = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(id.to_string()))?;

        subscription.status = change.status;
        subscription.active = change.active;
        subscription.current_period_start = change.current_period_start;
        subscription.current_period_end = change.current_period_end;
        subscription.trial_start = change.trial_start;
        subscription.trial_end = change.trial_end;
        subscription.updated_at = OffsetDateTime::now_utc();

        Ok(subscription.clone())
    }

    async fn soft_delete_subscription(
        &self,
        id: Uuid,
        status: &str,
        deleted_on: OffsetDateTime,
    ) -> BillingResult<ClientSubscription> {
        let mut inner = self.inner.lock().await;

        let subscription = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(id.to_string()))?;

        subscription.status = status.to_string();
        subscription.active = false;
        subscription.deleted_on = Some(deleted_on);
        subscription.updated_at = OffsetDateTime::now_utc();

        Ok(subscription.clone())
    }

    async fn invoice_by_provider_id(
        &self,
        provider: BillingProvider,
        provider_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .invoices
            .iter()
            .find(|i| i.provider == provider && i.provider_id == provider_id)
            .cloned())
    }

    async fn upsert_invoice(
        &self,
        record: InvoiceRecord,
        items: Vec<InvoiceItemRecord>,
    ) -> BillingResult<Invoice> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        let invoice = match inner
            .invoices
            .iter_mut()
            .find(|i| i.provider == record.provider && i.provider_id == record.provider_id)
        {
            Some(existing) => {
                existing.status = record.status;
                existing.total_cents = record.total_cents;
                existing.amount_due_cents = record.amount_due_cents;
                existing.amount_paid_cents = record.amount_paid_cents;
                existing.paid_at = record.paid_at.or(existing.paid_at);
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let invoice = Invoice {
                    id: Uuid::new_v4(),
                    agency_id: record.agency_id,
                    client_id: record.client_id,
                    subscription_id: record.subscription_id,
                    provider: record.provider,
                    provider_id: record.provider_id,
                    status: record.status,
                    currency: record.currency,
                    total_cents: record.total_cents,
                    amount_due_cents: record.amount_due_cents,
                    amount_paid_cents: record.amount_paid_cents,
                    description: record.description,
                    checkout_url: None,
                    issued_at: record.issued_at,
                    due_date: record.due_date,
                    paid_at: record.paid_at,
                    created_at: now,
                    updated_at: now,
                };
                inner.invoices.push(invoice.clone());
                invoice
            }
        };

        for item in items {
            let duplicate = item.provider_line_id.as_ref().is_some_and(|line_id| {
                inner.invoice_items.iter().any(|existing| {
                    existing.invoice_id == invoice.id
                        && existing.provider_line_id.as_ref() == Some(line_id)
                })
            });
            if duplicate {
                continue;
            }
            inner.invoice_items.push(InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id: invoice.id,
                service_id: item.service_id,
                provider_line_id: item.provider_line_id,
                description: item.description,
                quantity: item.quantity,
                unit_amount_cents: item.unit_amount_cents,
                amount_cents: item.amount_cents,
                period_start: item.period_start,
                period_end: item.period_end,
                created_at: now,
            });
        }

        Ok(invoice)
    }

    async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;

        let invoice = inner
            .invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| BillingError::InvoiceNotFound(id.to_string()))?;

        invoice.status = status;
        invoice.paid_at = paid_at;
        invoice.updated_at = OffsetDateTime::now_utc();

        Ok(())
    }

    async fn set_invoice_checkout_url(&self, id: Uuid, checkout_url: &str) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;

        let invoice = inner
            .invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| BillingError::InvoiceNotFound(id.to_string()))?;

        invoice.checkout_url = Some(checkout_url.to_string());
        invoice.updated_at = OffsetDateTime::now_utc();

        Ok(())
    }

    async fn invoice_items(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoiceItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .invoice_items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn insert_invoice_payment(
        &self,
        record: InvoicePaymentRecord,
    ) -> BillingResult<InvoicePayment> {
        let mut inner = self.inner.lock().await;

        let payment = InvoicePayment {
            id: Uuid::new_v4(),
            invoice_id: record.invoice_id,
            provider_payment_id: record.provider_payment_id,
            amount_cents: record.amount_cents,
            currency: record.currency,
            paid_at: record.paid_at,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.invoice_payments.push(payment.clone());

        Ok(payment)
    }

    async fn invoice_payments(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoicePayment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .invoice_payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn append_activity(&self, record: ActivityRecord) -> BillingResult<Uuid> {
        let mut inner = self.inner.lock().await;

        let activity = Activity {
            id: Uuid::new_v4(),
            agency_id: record.agency_id,
            activity_type: record.activity_type,
            data: record.data,
            provider_event_id: record.provider_event_id,
            provider_invoice_id: record.provider_invoice_id,
            provider_subscription_id: record.provider_subscription_id,
            provider_customer_id: record.provider_customer_id,
            created_at: OffsetDateTime::now_utc(),
        };
        let id = activity.id;
        inner.activities.push(activity);

        Ok(id)
    }

    async fn claim_webhook_event(
        &self,
        provider: BillingProvider,
        event_id: &str,
        event_type: &str,
    ) -> BillingResult<bool> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = inner
            .webhook_events
            .iter_mut()
            .find(|e| e.provider == provider && e.event_id == event_id)
        {
            let stuck = existing.processing_result == "processing"
                && existing.received_at < now - Duration::minutes(30);
            if existing.processing_result == "error" || stuck {
                existing.processing_result = "processing".to_string();
                existing.received_at = now;
                return Ok(true);
            }
            return Ok(false);
        }

        inner.webhook_events.push(WebhookEventRow {
            provider,
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            processing_result: "processing".to_string(),
            error_message: None,
            received_at: now,
        });

        Ok(true)
    }

    async fn finish_webhook_event(
        &self,
        provider: BillingProvider,
        event_id: &str,
        outcome: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(event) = inner
            .webhook_events
            .iter_mut()
            .find(|e| e.provider == provider && e.event_id == event_id)
        {
            event.processing_result = outcome.to_string();
            event.error_message = error_message.map(str::to_string);
        }

        Ok(())
    }
}
