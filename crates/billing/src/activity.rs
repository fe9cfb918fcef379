//! Activity log
//!
//! Append-only audit records for every reconciliation action. Activities
//! answer "why does this invoice look like this?" questions and carry the
//! provider correlation ids needed to trace a row back to its webhook events.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::{ActivityRecord, BillingStore};

/// Types of reconciliation activities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    ClientCreated,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    InvoiceCreated,
    InvoiceUpdated,
    InvoicePaymentRecorded,
    OneTimePurchase,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityType::ClientCreated => "CLIENT_CREATED",
            ActivityType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            ActivityType::SubscriptionUpdated => "SUBSCRIPTION_UPDATED",
            ActivityType::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            ActivityType::InvoiceCreated => "INVOICE_CREATED",
            ActivityType::InvoiceUpdated => "INVOICE_UPDATED",
            ActivityType::InvoicePaymentRecorded => "INVOICE_PAYMENT_RECORDED",
            ActivityType::OneTimePurchase => "ONE_TIME_PURCHASE",
        };
        write!(f, "{}", s)
    }
}

/// Builder for activity records
pub struct ActivityBuilder {
    agency_id: Uuid,
    activity_type: ActivityType,
    data: serde_json::Value,
    provider_event_id: Option<String>,
    provider_invoice_id: Option<String>,
    provider_subscription_id: Option<String>,
    provider_customer_id: Option<String>,
}

impl ActivityBuilder {
    pub fn new(agency_id: Uuid, activity_type: ActivityType) -> Self {
        Self {
            agency_id,
            activity_type,
            data: serde_json::json!({}),
            provider_event_id: None,
            provider_invoice_id: None,
            provider_subscription_id: None,
            provider_customer_id: None,
        }
    }

    /// Set the event data
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Set the provider event id
    pub fn provider_event(mut self, event_id: impl Into<String>) -> Self {
        self.provider_event_id = Some(event_id.into());
        self
    }

    /// Set the provider invoice id
    pub fn invoice(mut self, invoice_id: impl Into<String>) -> Self {
        self.provider_invoice_id = Some(invoice_id.into());
        self
    }

    /// Set the provider subscription id
    pub fn subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.provider_subscription_id = Some(subscription_id.into());
        self
    }

    /// Set the provider customer id
    pub fn customer(mut self, customer_id: impl Into<String>) -> Self {
        self.provider_customer_id = Some(customer_id.into());
        self
    }

    fn build(self) -> ActivityRecord {
        ActivityRecord {
            agency_id: self.agency_id,
            activity_type: self.activity_type.to_string(),
            data: self.data,
            provider_event_id: self.provider_event_id,
            provider_invoice_id: self.provider_invoice_id,
            provider_subscription_id: self.provider_subscription_id,
            provider_customer_id: self.provider_customer_id,
        }
    }
}

/// Service for appending activity records
#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<dyn BillingStore>,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn log(&self, builder: ActivityBuilder) -> BillingResult<Uuid> {
        self.store.append_activity(builder.build()).await
    }

    /// Log without failing the caller: an activity write must never abort the
    /// reconciliation it documents.
    pub async fn log_best_effort(&self, builder: ActivityBuilder) {
        let activity_type = builder.activity_type;
        if let Err(e) = self.log(builder).await {
            tracing::warn!(
                activity_type = %activity_type,
                error = %e,
                "Failed to append activity record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_display() {
        assert_eq!(
            ActivityType::SubscriptionCreated.to_string(),
            "SUBSCRIPTION_CREATED"
        );
        assert_eq!(ActivityType::InvoiceUpdated.to_string(), "INVOICE_UPDATED");
        assert_eq!(
            ActivityType::OneTimePurchase.to_string(),
            "ONE_TIME_PURCHASE"
        );
    }

    #[test]
    fn test_builder() {
        let agency_id = Uuid::new_v4();
        let record = ActivityBuilder::new(agency_id, ActivityType::InvoiceCreated)
            .data(serde_json::json!({"total_cents": 4200}))
            .provider_event("evt_1")
            .invoice("in_1")
            .customer("cus_1")
            .build();

        assert_eq!(record.agency_id, agency_id);
        assert_eq!(record.activity_type, "INVOICE_CREATED");
        assert_eq!(record.provider_event_id.as_deref(), Some("evt_1"));
        assert_eq!(record.provider_invoice_id.as_deref(), Some("in_1"));
        assert_eq!(record.provider_customer_id.as_deref(), Some("cus_1"));
        assert!(record.provider_subscription_id.is_none());
    }
}
