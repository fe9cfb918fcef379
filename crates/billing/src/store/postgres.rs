//! Postgres-backed billing store

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use agencydesk_shared::{
    AgencyService, BillingAccount, BillingProvider, Client, ClientSubscription, Invoice,
    InvoiceItem, InvoicePayment, InvoiceStatus,
};

use crate::error::{BillingError, BillingResult};

use super::{
    ActivityRecord, BillingStore, InvoiceItemRecord, InvoicePaymentRecord, InvoiceRecord,
    NewClient, SubscriptionChange, SubscriptionRecord,
};

/// How long a claim may sit in 'processing' before another request may
/// recover it
const CLAIM_RECOVERY_MINUTES: i32 = 30;

/// Production store over a Postgres pool
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn billing_account(
        &self,
        provider: BillingProvider,
        provider_account_id: &str,
    ) -> BillingResult<Option<BillingAccount>> {
        let account = sqlx::query_as(
            "SELECT * FROM billing_accounts WHERE provider = $1 AND provider_account_id = $2",
        )
        .bind(provider.as_str())
        .bind(provider_account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn client(&self, id: Uuid) -> BillingResult<Option<Client>> {
        let client = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(client)
    }

    async fn client_by_email(
        &self,
        agency_id: Uuid,
        email: &str,
    ) -> BillingResult<Option<Client>> {
        let client = sqlx::query_as("SELECT * FROM clients WHERE agency_id = $1 AND email = $2")
            .bind(agency_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(client)
    }

    async fn create_client(&self, client: NewClient) -> BillingResult<Client> {
        let mut tx = self.pool.begin().await?;

        let organization_id = match &client.organization_name {
            Some(name) => {
                let (org_id,): (Uuid,) = sqlx::query_as(
                    r#"
                    INSERT INTO client_organizations (id, agency_id, name, created_at)
                    VALUES ($1, $2, $3, NOW())
                    RETURNING id
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(client.agency_id)
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;
                Some(org_id)
            }
            None => None,
        };

        let created: Client = sqlx::query_as(
            r#"
            INSERT INTO clients (id, agency_id, organization_id, email, name, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.agency_id)
        .bind(organization_id)
        .bind(&client.email)
        .bind(&client.name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn service_by_provider_price(
        &self,
        agency_id: Uuid,
        price_id: &str,
    ) -> BillingResult<Option<AgencyService>> {
        let service = sqlx::query_as(
            "SELECT * FROM agency_services WHERE agency_id = $1 AND provider_price_id = $2",
        )
        .bind(agency_id)
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(service)
    }

    async fn subscription_by_customer(
        &self,
        provider: BillingProvider,
        customer_id: &str,
    ) -> BillingResult<Option<ClientSubscription>> {
        let subscription = sqlx::query_as(
            r#"
            SELECT * FROM client_subscriptions
            WHERE billing_customer_id = $1 AND billing_provider = $2
            "#,
        )
        .bind(customer_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn subscription_by_provider_id(
        &self,
        provider: BillingProvider,
        subscription_id: &str,
    ) -> BillingResult<Option<ClientSubscription>> {
        let subscription = sqlx::query_as(
            r#"
            SELECT * FROM client_subscriptions
            WHERE billing_provider = $1 AND billing_subscription_id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn upsert_subscription(
        &self,
        record: SubscriptionRecord,
    ) -> BillingResult<ClientSubscription> {
        let subscription = sqlx::query_as(
            r#"
            INSERT INTO client_subscriptions (
                id, agency_id, client_id, billing_customer_id, billing_provider,
                billing_subscription_id, status, active,
                current_period_start, current_period_end, trial_start, trial_end,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
            ON CONFLICT (billing_customer_id, billing_provider) DO UPDATE SET
                billing_subscription_id = EXCLUDED.billing_subscription_id,
                status = EXCLUDED.status,
                active = EXCLUDED.active,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                trial_start = EXCLUDED.trial_start,
                trial_end = EXCLUDED.trial_end,
                deleted_on = NULL,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.agency_id)
        .bind(record.client_id)
        .bind(&record.billing_customer_id)
        .bind(record.billing_provider.as_str())
        .bind(&record.billing_subscription_id)
        .bind(&record.status)
        .bind(record.active)
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.trial_start)
        .bind(record.trial_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        change: SubscriptionChange,
    ) -> BillingResult<ClientSubscription> {
        let subscription: Option<ClientSubscription> = sqlx::query_as(
            r#"
            UPDATE client_subscriptions SET
                status = $1,
                active = $2,
                current_period_start = $3,
                current_period_end = $4,
                trial_start = $5,
                trial_end = $6,
                updated_at = NOW()
            WHERE id = $7
            RETURNING *
            "#,
        )
        .bind(&change.status)
        .bind(change.active)
        .bind(change.current_period_start)
        .bind(change.current_period_end)
        .bind(change.trial_start)
        .bind(change.trial_end)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        subscription.ok_or_else(|| BillingError::SubscriptionNotFound(id.to_string()))
    }

    async fn soft_delete_subscription(
        &self,
        id: Uuid,
        status: &str,
        deleted_on: OffsetDateTime,
    ) -> BillingResult<ClientSubscription> {
        let subscription: Option<ClientSubscription> = sqlx::query_as(
            r#"
            UPDATE client_subscriptions SET
                status = $1,
                active = FALSE,
                deleted_on = $2,
                updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(deleted_on)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        subscription.ok_or_else(|| BillingError::SubscriptionNotFound(id.to_string()))
    }

    async fn invoice_by_provider_id(
        &self,
        provider: BillingProvider,
        provider_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let invoice =
            sqlx::query_as("SELECT * FROM invoices WHERE provider = $1 AND provider_id = $2")
                .bind(provider.as_str())
                .bind(provider_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(invoice)
    }

    async fn upsert_invoice(
        &self,
        record: InvoiceRecord,
        items: Vec<InvoiceItemRecord>,
    ) -> BillingResult<Invoice> {
        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (
                id, agency_id, client_id, subscription_id, provider, provider_id,
                status, currency, total_cents, amount_due_cents, amount_paid_cents,
                description, issued_at, due_date, paid_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW(), NOW())
            ON CONFLICT (provider, provider_id) DO UPDATE SET
                status = EXCLUDED.status,
                total_cents = EXCLUDED.total_cents,
                amount_due_cents = EXCLUDED.amount_due_cents,
                amount_paid_cents = EXCLUDED.amount_paid_cents,
                paid_at = COALESCE(EXCLUDED.paid_at, invoices.paid_at),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.agency_id)
        .bind(record.client_id)
        .bind(record.subscription_id)
        .bind(record.provider.as_str())
        .bind(&record.provider_id)
        .bind(record.status.as_str())
        .bind(&record.currency)
        .bind(record.total_cents)
        .bind(record.amount_due_cents)
        .bind(record.amount_paid_cents)
        .bind(&record.description)
        .bind(record.issued_at)
        .bind(record.due_date)
        .bind(record.paid_at)
        .fetch_one(&self.pool)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    id, invoice_id, service_id, provider_line_id, description,
                    quantity, unit_amount_cents, amount_cents,
                    period_start, period_end, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
                ON CONFLICT (invoice_id, provider_line_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice.id)
            .bind(item.service_id)
            .bind(&item.provider_line_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_amount_cents)
            .bind(item.amount_cents)
            .bind(item.period_start)
            .bind(item.period_end)
            .execute(&self.pool)
            .await?;
        }

        Ok(invoice)
    }

    async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices SET status = $1, paid_at = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(paid_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_invoice_checkout_url(&self, id: Uuid, checkout_url: &str) -> BillingResult<()> {
        sqlx::query("UPDATE invoices SET checkout_url = $1, updated_at = NOW() WHERE id = $2")
            .bind(checkout_url)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn invoice_items(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoiceItem>> {
        let items =
            sqlx::query_as("SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY created_at")
                .bind(invoice_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(items)
    }

    async fn insert_invoice_payment(
        &self,
        record: InvoicePaymentRecord,
    ) -> BillingResult<InvoicePayment> {
        let payment = sqlx::query_as(
            r#"
            INSERT INTO invoice_payments (
                id, invoice_id, provider_payment_id, amount_cents, currency, paid_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.invoice_id)
        .bind(&record.provider_payment_id)
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.paid_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn invoice_payments(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoicePayment>> {
        let payments = sqlx::query_as(
            "SELECT * FROM invoice_payments WHERE invoice_id = $1 ORDER BY created_at",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    async fn append_activity(&self, record: ActivityRecord) -> BillingResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO activities (
                id, agency_id, activity_type, data,
                provider_event_id, provider_invoice_id,
                provider_subscription_id, provider_customer_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.agency_id)
        .bind(&record.activity_type)
        .bind(&record.data)
        .bind(&record.provider_event_id)
        .bind(&record.provider_invoice_id)
        .bind(&record.provider_subscription_id)
        .bind(&record.provider_customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_webhook_event(
        &self,
        provider: BillingProvider,
        event_id: &str,
        event_type: &str,
    ) -> BillingResult<bool> {
        // INSERT ... ON CONFLICT ... RETURNING: only one concurrent request
        // can claim a delivery. Failed claims and claims stuck in processing
        // past the recovery window may be re-claimed.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events
                (id, provider, provider_event_id, event_type, processing_result, received_at)
            VALUES ($1, $2, $3, $4, 'processing', NOW())
            ON CONFLICT (provider, provider_event_id) DO UPDATE SET
                processing_result = 'processing',
                received_at = NOW()
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.received_at < NOW() - ($5 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(provider.as_str())
        .bind(event_id)
        .bind(event_type)
        .bind(CLAIM_RECOVERY_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn finish_webhook_event(
        &self,
        provider: BillingProvider,
        event_id: &str,
        outcome: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing_result = $1, error_message = $2
            WHERE provider = $3 AND provider_event_id = $4
            "#,
        )
        .bind(outcome)
        .bind(error_message)
        .bind(provider.as_str())
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
