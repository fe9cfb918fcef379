//! Billing webhook endpoint
//!
//! Accepts POST deliveries from the configured payment providers. The
//! response status drives provider-side redelivery: retryable reconciliation
//! failures return 500 so the provider redelivers; fatal ones are logged,
//! recorded on the claim row, and acknowledged so redelivery noise stops.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};

use agencydesk_billing::{BillingError, SignedDelivery};

use crate::error::ApiError;
use crate::state::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const TRELI_SIGNATURE_HEADER: &str = "treli-signature";

/// Handle billing webhook events
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    tracing::info!(body_len = body.len(), "Billing webhook received");

    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let delivery = SignedDelivery {
        body: &body,
        stripe_signature: headers
            .get(STRIPE_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok()),
        treli_signature: headers
            .get(TRELI_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok()),
    };

    // Verify and decode
    let event = match billing.router.decode(delivery) {
        Ok(event) => event,
        Err(BillingError::EventNotSupported(event_type)) => {
            // No handler configured; acknowledge so the provider stops resending
            tracing::info!(event_type = %event_type, "Unhandled webhook event type");
            return Ok(StatusCode::OK);
        }
        Err(e @ BillingError::UnknownProvider) => {
            tracing::warn!("Webhook delivery without a recognized signature header");
            return Err(ApiError::BadRequest(e.to_string()));
        }
        Err(e @ BillingError::SignatureInvalid) => {
            tracing::warn!("Webhook signature verification failed");
            return Err(ApiError::BadRequest(e.to_string()));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Webhook payload rejected");
            return Err(ApiError::BadRequest(e.to_string()));
        }
    };

    tracing::info!(
        provider = %event.provider,
        event_id = %event.event_id,
        event_type = event.kind.name(),
        "Webhook event verified"
    );

    // Reconcile
    match billing.webhooks.handle_event(event).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) if e.is_retryable() => {
            // Non-2xx makes the provider redeliver; its schedule is the outer
            // retry loop for rows that were not yet visible
            tracing::error!(error = %e, "Webhook reconciliation failed (will rely on redelivery)");
            Err(ApiError::Database(e.to_string()))
        }
        Err(e) => {
            // Redelivery cannot fix a fatal error; the claim row holds the details
            tracing::error!(error = %e, "Webhook reconciliation failed (not retryable)");
            Ok(StatusCode::OK)
        }
    }
}
