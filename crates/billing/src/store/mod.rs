//! Storage abstraction for reconciliation state
//!
//! All reconciliation handlers go through [`BillingStore`] rather than an
//! ambient database client. The trait assumes only point lookups by unique
//! key, upserts with a named conflict target, and soft delete via a nullable
//! timestamp column. The Postgres implementation is the production store; an
//! in-memory implementation backs tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use agencydesk_shared::{
    AgencyService, BillingAccount, BillingProvider, Client, ClientSubscription, Invoice,
    InvoiceItem, InvoicePayment, InvoiceStatus,
};

use crate::error::BillingResult;

pub use memory::MemoryStore;
pub use postgres::PgBillingStore;

/// A client to create lazily on first contact, with an optional organization
#[derive(Debug, Clone)]
pub struct NewClient {
    pub agency_id: Uuid,
    pub organization_name: Option<String>,
    pub email: String,
    pub name: Option<String>,
}

/// Subscription state to upsert on (billing_customer_id, billing_provider)
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub agency_id: Uuid,
    pub client_id: Uuid,
    pub billing_customer_id: String,
    pub billing_provider: BillingProvider,
    pub billing_subscription_id: String,
    pub status: String,
    pub active: bool,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
}

/// In-place mutation of an existing subscription row
#[derive(Debug, Clone)]
pub struct SubscriptionChange {
    pub status: String,
    pub active: bool,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
}

/// Invoice state to upsert on (provider, provider_id)
#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub agency_id: Uuid,
    pub client_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub provider: BillingProvider,
    pub provider_id: String,
    pub status: InvoiceStatus,
    pub currency: String,
    pub total_cents: i64,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub description: Option<String>,
    pub issued_at: Option<OffsetDateTime>,
    pub due_date: Option<OffsetDateTime>,
    pub paid_at: Option<OffsetDateTime>,
}

/// A line item inserted alongside an invoice upsert
#[derive(Debug, Clone)]
pub struct InvoiceItemRecord {
    pub service_id: Option<Uuid>,
    pub provider_line_id: Option<String>,
    pub description: String,
    pub quantity: i32,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
}

/// A payment recorded against an invoice
#[derive(Debug, Clone)]
pub struct InvoicePaymentRecord {
    pub invoice_id: Uuid,
    pub provider_payment_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub paid_at: OffsetDateTime,
}

/// An append-only activity row
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub agency_id: Uuid,
    pub activity_type: String,
    pub data: serde_json::Value,
    pub provider_event_id: Option<String>,
    pub provider_invoice_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
}

/// Storage operations needed by the reconciliation pipeline
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Tenancy

    /// Look up the billing account linking a provider-side account to a tenant
    async fn billing_account(
        &self,
        provider: BillingProvider,
        provider_account_id: &str,
    ) -> BillingResult<Option<BillingAccount>>;

    // Clients

    async fn client(&self, id: Uuid) -> BillingResult<Option<Client>>;

    async fn client_by_email(&self, agency_id: Uuid, email: &str)
        -> BillingResult<Option<Client>>;

    /// Create a client, and its organization when `organization_name` is set
    async fn create_client(&self, client: NewClient) -> BillingResult<Client>;

    /// Match a billable service of the agency by provider price id
    async fn service_by_provider_price(
        &self,
        agency_id: Uuid,
        price_id: &str,
    ) -> BillingResult<Option<AgencyService>>;

    // Subscriptions

    async fn subscription_by_customer(
        &self,
        provider: BillingProvider,
        customer_id: &str,
    ) -> BillingResult<Option<ClientSubscription>>;

    async fn subscription_by_provider_id(
        &self,
        provider: BillingProvider,
        subscription_id: &str,
    ) -> BillingResult<Option<ClientSubscription>>;

    /// Insert-or-update on the (billing_customer_id, billing_provider)
    /// conflict target; an upsert clears any previous soft delete
    async fn upsert_subscription(
        &self,
        record: SubscriptionRecord,
    ) -> BillingResult<ClientSubscription>;

    async fn update_subscription(
        &self,
        id: Uuid,
        change: SubscriptionChange,
    ) -> BillingResult<ClientSubscription>;

    /// Soft delete: set active=false and deleted_on; the row stays
    async fn soft_delete_subscription(
        &self,
        id: Uuid,
        status: &str,
        deleted_on: OffsetDateTime,
    ) -> BillingResult<ClientSubscription>;

    // Invoices

    async fn invoice_by_provider_id(
        &self,
        provider: BillingProvider,
        provider_id: &str,
    ) -> BillingResult<Option<Invoice>>;

    /// Insert-or-update on the (provider, provider_id) conflict target.
    /// Items are inserted idempotently on (invoice_id, provider_line_id).
    async fn upsert_invoice(
        &self,
        record: InvoiceRecord,
        items: Vec<InvoiceItemRecord>,
    ) -> BillingResult<Invoice>;

    async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<()>;

    async fn set_invoice_checkout_url(&self, id: Uuid, checkout_url: &str) -> BillingResult<()>;

    async fn invoice_items(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoiceItem>>;

    async fn insert_invoice_payment(
        &self,
        record: InvoicePaymentRecord,
    ) -> BillingResult<InvoicePayment>;

    async fn invoice_payments(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoicePayment>>;

    // Activity log

    async fn append_activity(&self, record: ActivityRecord) -> BillingResult<Uuid>;

    // Webhook delivery claims

    /// Atomically claim a (provider, event_id) delivery for processing.
    /// Returns false when the event was already processed successfully or is
    /// being processed by another request. A previously failed claim, or one
    /// stuck in processing past the recovery window, is re-claimed.
    async fn claim_webhook_event(
        &self,
        provider: BillingProvider,
        event_id: &str,
        event_type: &str,
    ) -> BillingResult<bool>;

    /// Record the processing outcome on the claim row
    async fn finish_webhook_event(
        &self,
        provider: BillingProvider,
        event_id: &str,
        outcome: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()>;
}
