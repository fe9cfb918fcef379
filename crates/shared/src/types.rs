//! Core entity types for the Agencydesk platform
//!
//! These rows are shared between the billing pipeline and the API server.
//! Provider identity and invoice status are stored as lowercase text in the
//! database and parsed back into the enums below.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Error returned when a stored enum value cannot be parsed
#[derive(Debug, thiserror::Error)]
#[error("unrecognized {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Payments provider originating billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingProvider {
    Stripe,
    Treli,
}

impl BillingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingProvider::Stripe => "stripe",
            BillingProvider::Treli => "treli",
        }
    }
}

impl std::fmt::Display for BillingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingProvider {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(BillingProvider::Stripe),
            "treli" => Ok(BillingProvider::Treli),
            other => Err(ParseEnumError {
                kind: "billing provider",
                value: other.to_string(),
            }),
        }
    }
}

/// Internal invoice status
///
/// Provider status strings are mapped onto this fixed set at reconciliation
/// time; unmapped provider statuses fall back to `Draft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Overdue,
    Voided,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Voided => "voided",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "issued" => Ok(InvoiceStatus::Issued),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "voided" => Ok(InvoiceStatus::Voided),
            other => Err(ParseEnumError {
                kind: "invoice status",
                value: other.to_string(),
            }),
        }
    }
}

/// A tenant of the platform: an agency managing its own end-clients
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agency {
    pub id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// Links an agency to a provider-side account
///
/// One row per (provider, provider_account_id); created during provider
/// onboarding and used by the resolver to map inbound events to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingAccount {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub provider: BillingProvider,
    pub provider_account_id: String,
    pub created_at: OffsetDateTime,
}

/// An end-customer company of an agency
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientOrganization {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// An end-customer contact of an agency, matched by email
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub email: String,
    pub name: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A billable service offering of an agency
///
/// Invoice items link back to a service when the provider price id matches.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgencyService {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub name: String,
    pub provider_price_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A client's subscription as mirrored from the provider
///
/// At most one row exists per (billing_customer_id, billing_provider); the
/// status string is the provider's own status, mirrored verbatim. Deletion is
/// a soft delete: `active` goes false and `deleted_on` is set, the row stays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSubscription {
    pub id: Uuid,
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
    pub deleted_on: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// An invoice, keyed by (provider, provider_id) for idempotent reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
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
    pub checkout_url: Option<String>,
    pub issued_at: Option<OffsetDateTime>,
    pub due_date: Option<OffsetDateTime>,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A line item on an invoice
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub service_id: Option<Uuid>,
    pub provider_line_id: Option<String>,
    pub description: String,
    pub quantity: i32,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A payment recorded against an invoice
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoicePayment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub provider_payment_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub paid_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// An append-only audit record of a reconciliation action
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub activity_type: String,
    pub data: serde_json::Value,
    pub provider_event_id: Option<String>,
    pub provider_invoice_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
}

fn decode_enum<T>(row: &PgRow, column: &'static str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: ParseEnumError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> sqlx::FromRow<'r, PgRow> for BillingAccount {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            agency_id: row.try_get("agency_id")?,
            provider: decode_enum(row, "provider")?,
            provider_account_id: row.try_get("provider_account_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for ClientSubscription {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            agency_id: row.try_get("agency_id")?,
            client_id: row.try_get("client_id")?,
            billing_customer_id: row.try_get("billing_customer_id")?,
            billing_provider: decode_enum(row, "billing_provider")?,
            billing_subscription_id: row.try_get("billing_subscription_id")?,
            status: row.try_get("status")?,
            active: row.try_get("active")?,
            current_period_start: row.try_get("current_period_start")?,
            current_period_end: row.try_get("current_period_end")?,
            trial_start: row.try_get("trial_start")?,
            trial_end: row.try_get("trial_end")?,
            deleted_on: row.try_get("deleted_on")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Invoice {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            agency_id: row.try_get("agency_id")?,
            client_id: row.try_get("client_id")?,
            subscription_id: row.try_get("subscription_id")?,
            provider: decode_enum(row, "provider")?,
            provider_id: row.try_get("provider_id")?,
            status: decode_enum(row, "status")?,
            currency: row.try_get("currency")?,
            total_cents: row.try_get("total_cents")?,
            amount_due_cents: row.try_get("amount_due_cents")?,
            amount_paid_cents: row.try_get("amount_paid_cents")?,
            description: row.try_get("description")?,
            checkout_url: row.try_get("checkout_url")?,
            issued_at: row.try_get("issued_at")?,
            due_date: row.try_get("due_date")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trip() {
        assert_eq!(BillingProvider::Stripe.as_str(), "stripe");
        assert_eq!(BillingProvider::Treli.as_str(), "treli");
        assert_eq!("stripe".parse::<BillingProvider>().ok(), Some(BillingProvider::Stripe));
        assert!("paypal".parse::<BillingProvider>().is_err());
    }

    #[test]
    fn test_invoice_status_round_trip() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Issued,
            InvoiceStatus::Paid,
            InvoiceStatus::Overdue,
            InvoiceStatus::Voided,
        ] {
            assert_eq!(status.as_str().parse::<InvoiceStatus>().ok(), Some(status));
        }
        assert!("open".parse::<InvoiceStatus>().is_err());
    }
}
