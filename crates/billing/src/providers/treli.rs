//! Treli webhook verification and decoding
//!
//! Treli signs the raw body with hex-encoded HMAC-SHA256 in the
//! `treli-signature` header. Event payloads use a flat envelope with the
//! payload under `data`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use agencydesk_shared::BillingProvider;

use crate::error::{BillingError, BillingResult};
use crate::event::{
    unix_timestamp_opt, EventKind, InvoiceLinePayload, InvoicePayload, PaymentPayload,
    SubscriptionPayload, WebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Verifies and decodes Treli webhook deliveries
pub struct TreliEventDecoder {
    webhook_secret: String,
}

impl TreliEventDecoder {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the signature header and decode the payload into a typed event
    pub fn decode(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        self.verify_signature(payload, signature)?;

        let raw: RawEvent = serde_json::from_str(payload)
            .map_err(|e| BillingError::MalformedEvent(format!("treli event: {e}")))?;

        let kind = decode_kind(&raw)?;

        Ok(WebhookEvent {
            provider: BillingProvider::Treli,
            event_id: raw.id,
            account_id: raw.account_id,
            created: unix_timestamp_opt(raw.created_at),
            kind,
        })
    }

    fn verify_signature(&self, payload: &str, signature: &str) -> BillingResult<()> {
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != signature.trim() {
            tracing::warn!("Treli webhook signature mismatch");
            return Err(BillingError::SignatureInvalid);
        }

        Ok(())
    }
}

fn decode_kind(raw: &RawEvent) -> BillingResult<EventKind> {
    let data = &raw.data;

    match raw.event.as_str() {
        "subscription.created" => Ok(EventKind::SubscriptionCreated(subscription_payload(data)?)),
        "subscription.updated" => Ok(EventKind::SubscriptionUpdated(subscription_payload(data)?)),
        "subscription.cancelled" => Ok(EventKind::SubscriptionDeleted(subscription_payload(data)?)),
        "invoice.created" => Ok(EventKind::InvoiceCreated(invoice_payload(data)?)),
        "invoice.updated" => Ok(EventKind::InvoiceUpdated(invoice_payload(data)?)),
        "payment.succeeded" => Ok(EventKind::PaymentSucceeded(payment_payload(data)?)),
        other => Err(BillingError::EventNotSupported(format!("treli:{other}"))),
    }
}

fn subscription_payload(data: &serde_json::Value) -> BillingResult<SubscriptionPayload> {
    let raw: RawSubscription = serde_json::from_value(data.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("treli subscription: {e}")))?;

    Ok(SubscriptionPayload {
        subscription_id: raw.id,
        customer_id: raw.customer_id,
        customer_email: raw.customer_email,
        customer_name: raw.customer_name,
        status: raw.status,
        current_period_start: raw.current_period_start,
        current_period_end: raw.current_period_end,
        trial_start: raw.trial_start,
        trial_end: raw.trial_end,
    })
}

fn invoice_payload(data: &serde_json::Value) -> BillingResult<InvoicePayload> {
    let raw: RawInvoice = serde_json::from_value(data.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("treli invoice: {e}")))?;

    let lines = raw
        .items
        .unwrap_or_default()
        .into_iter()
        .map(|item| {
            let quantity = item.quantity.unwrap_or(1).max(1);
            let amount = item.amount.unwrap_or(0);
            InvoiceLinePayload {
                line_id: item.id,
                description: item.description,
                quantity,
                unit_amount_cents: item.unit_amount.unwrap_or(amount / i64::from(quantity)),
                amount_cents: amount,
                price_id: item.price_id,
                period_start: item.period_start,
                period_end: item.period_end,
            }
        })
        .collect();

    Ok(InvoicePayload {
        invoice_id: raw.id,
        customer_id: raw.customer_id,
        customer_email: raw.customer_email,
        subscription_id: raw.subscription_id,
        status: raw.status.unwrap_or_else(|| "draft".to_string()),
        currency: raw.currency.unwrap_or_else(|| "usd".to_string()),
        total_cents: raw.total.unwrap_or(0),
        amount_due_cents: raw.amount_due.unwrap_or(0),
        amount_paid_cents: raw.amount_paid.unwrap_or(0),
        description: raw.description,
        issued_at: raw.created_at,
        due_date: raw.due_date,
        lines,
    })
}

fn payment_payload(data: &serde_json::Value) -> BillingResult<PaymentPayload> {
    let raw: RawPayment = serde_json::from_value(data.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("treli payment: {e}")))?;

    Ok(PaymentPayload {
        payment_id: raw.id,
        customer_id: raw.customer_id,
        customer_email: raw.customer_email,
        customer_name: raw.customer_name,
        invoice_id: raw.invoice_id,
        description: raw.description,
        amount_cents: raw.amount.unwrap_or(0),
        currency: raw.currency.unwrap_or_else(|| "usd".to_string()),
        current_period_start: raw.current_period_start,
        current_period_end: raw.current_period_end,
        trial_start: raw.trial_start,
        trial_end: raw.trial_end,
    })
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    event: String,
    account_id: Option<String>,
    created_at: Option<i64>,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    customer_id: String,
    customer_email: Option<String>,
    customer_name: Option<String>,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    id: String,
    customer_id: String,
    customer_email: Option<String>,
    subscription_id: Option<String>,
    status: Option<String>,
    currency: Option<String>,
    total: Option<i64>,
    amount_due: Option<i64>,
    amount_paid: Option<i64>,
    description: Option<String>,
    created_at: Option<i64>,
    due_date: Option<i64>,
    items: Option<Vec<RawInvoiceItem>>,
}

#[derive(Debug, Deserialize)]
struct RawInvoiceItem {
    id: Option<String>,
    description: Option<String>,
    quantity: Option<i32>,
    unit_amount: Option<i64>,
    amount: Option<i64>,
    price_id: Option<String>,
    period_start: Option<i64>,
    period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    id: String,
    customer_id: Option<String>,
    customer_email: Option<String>,
    customer_name: Option<String>,
    invoice_id: Option<String>,
    description: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_decode_verified_payment_event() {
        let decoder = TreliEventDecoder::new("treli_secret");
        let payload = serde_json::json!({
            "id": "evt_tr_1",
            "event": "payment.succeeded",
            "account_id": "tracct_1",
            "created_at": 1_700_000_000,
            "data": {
                "id": "pay_tr_1",
                "customer_id": "trcus_1",
                "customer_email": "cliente@example.com",
                "description": "Sitio web - pago único",
                "amount": 1_200_00,
                "currency": "cop"
            }
        })
        .to_string();
        let signature = sign("treli_secret", &payload);

        let event = decoder.decode(&payload, &signature).unwrap();
        assert_eq!(event.provider, BillingProvider::Treli);
        match event.kind {
            EventKind::PaymentSucceeded(pay) => {
                assert!(pay.is_one_time());
                assert_eq!(pay.currency, "cop");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_subscription_payment_keeps_period() {
        let decoder = TreliEventDecoder::new("treli_secret");
        let payload = serde_json::json!({
            "id": "evt_tr_2",
            "event": "payment.succeeded",
            "account_id": "tracct_1",
            "data": {
                "id": "pay_tr_2",
                "customer_id": "trcus_1",
                "invoice_id": "inv_tr_9",
                "amount": 99_00,
                "currency": "usd",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000
            }
        })
        .to_string();
        let signature = sign("treli_secret", &payload);

        let event = decoder.decode(&payload, &signature).unwrap();
        match event.kind {
            EventKind::PaymentSucceeded(pay) => assert!(!pay.is_one_time()),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_signature() {
        let decoder = TreliEventDecoder::new("treli_secret");
        let payload = r#"{"id":"evt_tr_3","event":"invoice.created","data":{}}"#;

        assert!(matches!(
            decoder.decode(payload, "deadbeef"),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_cancelled_maps_to_deleted() {
        let decoder = TreliEventDecoder::new("treli_secret");
        let payload = serde_json::json!({
            "id": "evt_tr_4",
            "event": "subscription.cancelled",
            "account_id": "tracct_1",
            "data": {
                "id": "sub_tr_1",
                "customer_id": "trcus_1",
                "status": "cancelled"
            }
        })
        .to_string();
        let signature = sign("treli_secret", &payload);

        let event = decoder.decode(&payload, &signature).unwrap();
        assert!(matches!(event.kind, EventKind::SubscriptionDeleted(_)));
    }
}
