//! Subscription reconciliation
//!
//! Mirrors provider subscription state into `client_subscriptions`. Status
//! strings come from the provider verbatim; there is no internal state
//! machine. Upserts on (billing_customer_id, billing_provider) keep
//! redeliveries from duplicating rows, and deletion is always a soft delete.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::activity::{ActivityBuilder, ActivityLogger, ActivityType};
use crate::error::{BillingError, BillingResult};
use crate::event::{unix_timestamp_opt, SubscriptionPayload, WebhookEvent};
use crate::resolver::EntityResolver;
use crate::store::{BillingStore, SubscriptionChange, SubscriptionRecord};

/// Whether a provider status string counts as a provisioned subscription
fn status_is_active(status: &str) -> bool {
    matches!(status, "active" | "trialing")
}

/// Reconciles subscription lifecycle events
pub struct SubscriptionReconciler {
    store: Arc<dyn BillingStore>,
    resolver: EntityResolver,
    activity: ActivityLogger,
}

impl SubscriptionReconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        resolver: EntityResolver,
        activity: ActivityLogger,
    ) -> Self {
        Self {
            store,
            resolver,
            activity,
        }
    }

    pub async fn handle_created(
        &self,
        event: &WebhookEvent,
        payload: &SubscriptionPayload,
    ) -> BillingResult<()> {
        let account = self
            .resolver
            .resolve_agency(event.provider, event.account_id.as_deref())
            .await?;

        // A redelivered creation finds the row from the first delivery and
        // becomes an update; only a first delivery resolves/creates a client.
        let existing = self
            .store
            .subscription_by_customer(event.provider, &payload.customer_id)
            .await?;
        let redelivery = existing.is_some();

        let client_id = match existing {
            Some(subscription) => subscription.client_id,
            None => {
                self.resolver
                    .resolve_or_create_client(
                        account.agency_id,
                        event.provider,
                        Some(&payload.customer_id),
                        payload.customer_email.as_deref(),
                        payload.customer_name.as_deref(),
                    )
                    .await?
                    .id
            }
        };

        let subscription = self
            .store
            .upsert_subscription(SubscriptionRecord {
                agency_id: account.agency_id,
                client_id,
                billing_customer_id: payload.customer_id.clone(),
                billing_provider: event.provider,
                billing_subscription_id: payload.subscription_id.clone(),
                status: payload.status.clone(),
                active: status_is_active(&payload.status),
                current_period_start: unix_timestamp_opt(payload.current_period_start),
                current_period_end: unix_timestamp_opt(payload.current_period_end),
                trial_start: unix_timestamp_opt(payload.trial_start),
                trial_end: unix_timestamp_opt(payload.trial_end),
            })
            .await?;

        let activity_type = if redelivery {
            ActivityType::SubscriptionUpdated
        } else {
            ActivityType::SubscriptionCreated
        };
        self.activity
            .log_best_effort(
                ActivityBuilder::new(account.agency_id, activity_type)
                    .data(serde_json::json!({
                        "status": payload.status,
                        "redelivery": redelivery,
                    }))
                    .provider_event(&event.event_id)
                    .subscription(&payload.subscription_id)
                    .customer(&payload.customer_id),
            )
            .await;

        tracing::info!(
            agency_id = %account.agency_id,
            subscription_id = %subscription.id,
            billing_subscription_id = %payload.subscription_id,
            status = %payload.status,
            redelivery = redelivery,
            "Subscription created"
        );

        Ok(())
    }

    pub async fn handle_updated(
        &self,
        event: &WebhookEvent,
        payload: &SubscriptionPayload,
    ) -> BillingResult<()> {
        let subscription = self
            .store
            .subscription_by_provider_id(event.provider, &payload.subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(payload.subscription_id.clone()))?;

        let updated = self
            .store
            .update_subscription(
                subscription.id,
                SubscriptionChange {
                    status: payload.status.clone(),
                    active: status_is_active(&payload.status),
                    current_period_start: unix_timestamp_opt(payload.current_period_start),
                    current_period_end: unix_timestamp_opt(payload.current_period_end),
                    trial_start: unix_timestamp_opt(payload.trial_start),
                    trial_end: unix_timestamp_opt(payload.trial_end),
                },
            )
            .await?;

        self.activity
            .log_best_effort(
                ActivityBuilder::new(subscription.agency_id, ActivityType::SubscriptionUpdated)
                    .data(serde_json::json!({
                        "status": payload.status,
                        "previous_status": subscription.status,
                    }))
                    .provider_event(&event.event_id)
                    .subscription(&payload.subscription_id)
                    .customer(&payload.customer_id),
            )
            .await;

        if payload.status == "past_due" {
            tracing::warn!(
                agency_id = %subscription.agency_id,
                billing_subscription_id = %payload.subscription_id,
                "Subscription is past due"
            );
        }

        tracing::info!(
            agency_id = %subscription.agency_id,
            subscription_id = %updated.id,
            status = %payload.status,
            "Subscription updated"
        );

        Ok(())
    }

    pub async fn handle_deleted(
        &self,
        event: &WebhookEvent,
        payload: &SubscriptionPayload,
    ) -> BillingResult<()> {
        let subscription = self
            .store
            .subscription_by_provider_id(event.provider, &payload.subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(payload.subscription_id.clone()))?;

        let deleted = self
            .store
            .soft_delete_subscription(subscription.id, &payload.status, OffsetDateTime::now_utc())
            .await?;

        self.activity
            .log_best_effort(
                ActivityBuilder::new(subscription.agency_id, ActivityType::SubscriptionCanceled)
                    .data(serde_json::json!({
                        "previous_status": subscription.status,
                        "status": payload.status,
                    }))
                    .provider_event(&event.event_id)
                    .subscription(&payload.subscription_id)
                    .customer(&payload.customer_id),
            )
            .await;

        tracing::info!(
            agency_id = %subscription.agency_id,
            subscription_id = %deleted.id,
            billing_subscription_id = %payload.subscription_id,
            "Subscription cancelled (soft deleted)"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_active() {
        assert!(status_is_active("active"));
        assert!(status_is_active("trialing"));
        assert!(!status_is_active("past_due"));
        assert!(!status_is_active("canceled"));
        assert!(!status_is_active("incomplete"));
    }
}
