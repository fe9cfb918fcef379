//! Normalized webhook events
//!
//! Provider payloads are decoded and narrowed into this tagged union at the
//! ingress boundary. Handlers only ever see these types; a payload that does
//! not decode is rejected with a typed error before reaching any handler.

use time::OffsetDateTime;

use agencydesk_shared::BillingProvider;

/// A verified, decoded webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: BillingProvider,
    /// Provider-side event id, used for delivery deduplication
    pub event_id: String,
    /// Provider-side account id identifying the tenant, when present
    pub account_id: Option<String>,
    /// Provider-reported creation time of the event
    pub created: Option<OffsetDateTime>,
    pub kind: EventKind,
}

/// The reconciliation-relevant event types
#[derive(Debug, Clone)]
pub enum EventKind {
    SubscriptionCreated(SubscriptionPayload),
    SubscriptionUpdated(SubscriptionPayload),
    SubscriptionDeleted(SubscriptionPayload),
    InvoiceCreated(InvoicePayload),
    InvoiceUpdated(InvoicePayload),
    PaymentSucceeded(PaymentPayload),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SubscriptionCreated(_) => "subscription.created",
            EventKind::SubscriptionUpdated(_) => "subscription.updated",
            EventKind::SubscriptionDeleted(_) => "subscription.deleted",
            EventKind::InvoiceCreated(_) => "invoice.created",
            EventKind::InvoiceUpdated(_) => "invoice.updated",
            EventKind::PaymentSucceeded(_) => "payment.succeeded",
        }
    }
}

/// Subscription lifecycle payload
#[derive(Debug, Clone)]
pub struct SubscriptionPayload {
    pub subscription_id: String,
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    /// Provider status string, mirrored verbatim (the provider is authoritative)
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
}

/// Invoice lifecycle payload
#[derive(Debug, Clone)]
pub struct InvoicePayload {
    pub invoice_id: String,
    pub customer_id: String,
    pub customer_email: Option<String>,
    pub subscription_id: Option<String>,
    /// Provider status string; mapped onto the internal enum at reconciliation
    pub status: String,
    pub currency: String,
    pub total_cents: i64,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub description: Option<String>,
    pub issued_at: Option<i64>,
    pub due_date: Option<i64>,
    pub lines: Vec<InvoiceLinePayload>,
}

/// A line on an invoice payload
#[derive(Debug, Clone)]
pub struct InvoiceLinePayload {
    pub line_id: Option<String>,
    pub description: Option<String>,
    pub quantity: i32,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub price_id: Option<String>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
}

/// A successful payment
///
/// Carries the subscription period fields when the payment belongs to a
/// subscription cycle; their absence routes the event to the one-time path.
#[derive(Debug, Clone)]
pub struct PaymentPayload {
    pub payment_id: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    /// Provider invoice id, when the payment settles an existing invoice
    pub invoice_id: Option<String>,
    pub description: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
}

impl PaymentPayload {
    /// A payment with no subscription period at all is a one-off purchase.
    /// Any single period field present routes it to the subscription path.
    pub fn is_one_time(&self) -> bool {
        self.current_period_start.is_none()
            && self.current_period_end.is_none()
            && self.trial_start.is_none()
            && self.trial_end.is_none()
    }
}

/// Convert an optional provider unix timestamp into an `OffsetDateTime`,
/// dropping values outside the representable range.
pub fn unix_timestamp_opt(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> PaymentPayload {
        PaymentPayload {
            payment_id: "pay_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            customer_email: Some("client@example.com".to_string()),
            customer_name: None,
            invoice_id: None,
            description: None,
            amount_cents: 5_000,
            currency: "usd".to_string(),
            current_period_start: None,
            current_period_end: None,
            trial_start: None,
            trial_end: None,
        }
    }

    #[test]
    fn test_one_time_when_all_period_fields_absent() {
        assert!(payment().is_one_time());
    }

    #[test]
    fn test_subscription_path_when_any_period_field_present() {
        let mut p = payment();
        p.current_period_start = Some(1_700_000_000);
        assert!(!p.is_one_time());

        let mut p = payment();
        p.current_period_end = Some(1_700_000_000);
        assert!(!p.is_one_time());

        let mut p = payment();
        p.trial_start = Some(1_700_000_000);
        assert!(!p.is_one_time());

        let mut p = payment();
        p.trial_end = Some(1_700_000_000);
        assert!(!p.is_one_time());
    }

    #[test]
    fn test_unix_timestamp_conversion() {
        assert!(unix_timestamp_opt(Some(1_700_000_000)).is_some());
        assert!(unix_timestamp_opt(None).is_none());
        assert!(unix_timestamp_opt(Some(i64::MAX)).is_none());
    }
}
