//! Stripe webhook verification and decoding
//!
//! Signature verification is done manually against the `t=...,v1=...` HMAC
//! scheme so the inbound path has no SDK version coupling; the payload is then
//! decoded into the normalized event union.

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

/// Maximum accepted age of a signed payload, in seconds
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verifies and decodes Stripe webhook deliveries
pub struct StripeEventDecoder {
    webhook_secret: String,
}

impl StripeEventDecoder {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the signature header and decode the payload into a typed event
    pub fn decode(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        self.verify_signature(payload, signature)?;

        let raw: RawEvent = serde_json::from_str(payload)
            .map_err(|e| BillingError::MalformedEvent(format!("stripe event: {e}")))?;

        let kind = decode_kind(&raw)?;

        Ok(WebhookEvent {
            provider: BillingProvider::Stripe,
            event_id: raw.id,
            account_id: raw.account,
            created: unix_timestamp_opt(raw.created),
            kind,
        })
    }

    /// Verify the `stripe-signature` header: `t=<ts>,v1=<hex hmac>`
    fn verify_signature(&self, payload: &str, signature: &str) -> BillingResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1]),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in stripe signature header");
            BillingError::SignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in stripe signature header");
            BillingError::SignatureInvalid
        })?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| BillingError::Internal(format!("system time error: {e}")))?
            .as_secs() as i64;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Stripe webhook timestamp outside tolerance"
            );
            return Err(BillingError::SignatureInvalid);
        }

        let secret = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Stripe webhook signature mismatch");
            return Err(BillingError::SignatureInvalid);
        }

        Ok(())
    }
}

fn decode_kind(raw: &RawEvent) -> BillingResult<EventKind> {
    let object = &raw.data.object;

    match raw.event_type.as_str() {
        "customer.subscription.created" => {
            Ok(EventKind::SubscriptionCreated(subscription_payload(object)?))
        }
        "customer.subscription.updated" => {
            Ok(EventKind::SubscriptionUpdated(subscription_payload(object)?))
        }
        "customer.subscription.deleted" => {
            Ok(EventKind::SubscriptionDeleted(subscription_payload(object)?))
        }
        "invoice.created" => Ok(EventKind::InvoiceCreated(invoice_payload(object)?)),
        // invoice.paid carries the same object with status already "paid"
        "invoice.updated" | "invoice.finalized" | "invoice.paid" => {
            Ok(EventKind::InvoiceUpdated(invoice_payload(object)?))
        }
        "invoice.payment_succeeded" => {
            Ok(EventKind::PaymentSucceeded(invoice_payment_payload(object)?))
        }
        "payment_intent.succeeded" => {
            Ok(EventKind::PaymentSucceeded(payment_intent_payload(object)?))
        }
        other => Err(BillingError::EventNotSupported(format!("stripe:{other}"))),
    }
}

fn subscription_payload(object: &serde_json::Value) -> BillingResult<SubscriptionPayload> {
    let raw: RawSubscription = serde_json::from_value(object.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("stripe subscription: {e}")))?;

    let metadata = raw.metadata.unwrap_or_default();

    Ok(SubscriptionPayload {
        subscription_id: raw.id,
        customer_id: raw.customer,
        // The subscription object carries no email; checkout metadata does
        customer_email: metadata.get("client_email").cloned(),
        customer_name: metadata.get("client_name").cloned(),
        status: raw.status,
        current_period_start: raw.current_period_start,
        current_period_end: raw.current_period_end,
        trial_start: raw.trial_start,
        trial_end: raw.trial_end,
    })
}

fn invoice_payload(object: &serde_json::Value) -> BillingResult<InvoicePayload> {
    let raw: RawInvoice = serde_json::from_value(object.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("stripe invoice: {e}")))?;

    let lines = raw
        .lines
        .map(|l| l.data)
        .unwrap_or_default()
        .into_iter()
        .map(|line| {
            let quantity = line.quantity.unwrap_or(1).max(1);
            let amount = line.amount.unwrap_or(0);
            let unit_amount = line
                .price
                .as_ref()
                .and_then(|p| p.unit_amount)
                .unwrap_or(amount / i64::from(quantity));
            InvoiceLinePayload {
                line_id: line.id,
                description: line.description,
                quantity,
                unit_amount_cents: unit_amount,
                amount_cents: amount,
                price_id: line.price.map(|p| p.id),
                period_start: line.period.as_ref().and_then(|p| p.start),
                period_end: line.period.as_ref().and_then(|p| p.end),
            }
        })
        .collect();

    Ok(InvoicePayload {
        invoice_id: raw.id,
        customer_id: raw.customer,
        customer_email: raw.customer_email,
        subscription_id: raw.subscription,
        status: raw.status.unwrap_or_else(|| "draft".to_string()),
        currency: raw.currency.unwrap_or_else(|| "usd".to_string()),
        total_cents: raw.total.unwrap_or(0),
        amount_due_cents: raw.amount_due.unwrap_or(0),
        amount_paid_cents: raw.amount_paid.unwrap_or(0),
        description: raw.description,
        issued_at: raw.created,
        due_date: raw.due_date,
        lines,
    })
}

/// A payment reported through `invoice.payment_succeeded`: the subscription
/// period rides on the invoice's first line.
fn invoice_payment_payload(object: &serde_json::Value) -> BillingResult<PaymentPayload> {
    let raw: RawInvoice = serde_json::from_value(object.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("stripe invoice: {e}")))?;

    let period = raw
        .lines
        .as_ref()
        .and_then(|l| l.data.first())
        .and_then(|line| line.period.clone());

    Ok(PaymentPayload {
        payment_id: raw
            .charge
            .clone()
            .unwrap_or_else(|| format!("inpay_{}", raw.id)),
        customer_id: Some(raw.customer),
        customer_email: raw.customer_email,
        customer_name: None,
        invoice_id: Some(raw.id),
        description: raw.description,
        amount_cents: raw.amount_paid.unwrap_or(0),
        currency: raw.currency.unwrap_or_else(|| "usd".to_string()),
        current_period_start: period.as_ref().and_then(|p| p.start),
        current_period_end: period.as_ref().and_then(|p| p.end),
        trial_start: None,
        trial_end: None,
    })
}

fn payment_intent_payload(object: &serde_json::Value) -> BillingResult<PaymentPayload> {
    let raw: RawPaymentIntent = serde_json::from_value(object.clone())
        .map_err(|e| BillingError::MalformedEvent(format!("stripe payment_intent: {e}")))?;

    Ok(PaymentPayload {
        payment_id: raw.id,
        customer_id: raw.customer,
        customer_email: raw.receipt_email,
        customer_name: None,
        invoice_id: raw.invoice,
        description: raw.description,
        amount_cents: raw.amount_received.or(raw.amount).unwrap_or(0),
        currency: raw.currency.unwrap_or_else(|| "usd".to_string()),
        current_period_start: None,
        current_period_end: None,
        trial_start: None,
        trial_end: None,
    })
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: Option<i64>,
    /// Connect account the event originated from
    account: Option<String>,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    customer: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
    metadata: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    id: String,
    customer: String,
    customer_email: Option<String>,
    subscription: Option<String>,
    status: Option<String>,
    currency: Option<String>,
    total: Option<i64>,
    amount_due: Option<i64>,
    amount_paid: Option<i64>,
    description: Option<String>,
    charge: Option<String>,
    created: Option<i64>,
    due_date: Option<i64>,
    lines: Option<RawInvoiceLines>,
}

#[derive(Debug, Deserialize)]
struct RawInvoiceLines {
    data: Vec<RawInvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct RawInvoiceLine {
    id: Option<String>,
    description: Option<String>,
    quantity: Option<i32>,
    amount: Option<i64>,
    price: Option<RawPrice>,
    period: Option<RawPeriod>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    id: String,
    unit_amount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPeriod {
    start: Option<i64>,
    end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPaymentIntent {
    id: String,
    customer: Option<String>,
    receipt_email: Option<String>,
    description: Option<String>,
    amount: Option<i64>,
    amount_received: Option<i64>,
    currency: Option<String>,
    invoice: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &str) -> String {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let signed_payload = format!("{}.{}", ts, payload);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    fn subscription_event_json() -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": "customer.subscription.created",
            "created": 1_700_000_000,
            "account": "acct_agency",
            "data": {
                "object": {
                    "id": "sub_1",
                    "customer": "cus_1",
                    "status": "trialing",
                    "current_period_start": 1_700_000_000,
                    "current_period_end": 1_702_592_000,
                    "trial_start": 1_700_000_000,
                    "trial_end": 1_701_209_600,
                    "metadata": {"client_email": "client@example.com"}
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_decode_verified_subscription_event() {
        let decoder = StripeEventDecoder::new("whsec_testsecret");
        let payload = subscription_event_json();
        let signature = sign("testsecret", &payload);

        let event = decoder.decode(&payload, &signature).unwrap();
        assert_eq!(event.provider, BillingProvider::Stripe);
        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.account_id.as_deref(), Some("acct_agency"));
        match event.kind {
            EventKind::SubscriptionCreated(sub) => {
                assert_eq!(sub.subscription_id, "sub_1");
                assert_eq!(sub.customer_id, "cus_1");
                assert_eq!(sub.status, "trialing");
                assert_eq!(sub.customer_email.as_deref(), Some("client@example.com"));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_signature() {
        let decoder = StripeEventDecoder::new("whsec_testsecret");
        let payload = subscription_event_json();
        let signature = sign("wrongsecret", &payload);

        assert!(matches!(
            decoder.decode(&payload, &signature),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_rejects_stale_timestamp() {
        let decoder = StripeEventDecoder::new("whsec_testsecret");
        let payload = subscription_event_json();
        let ts = 1_000_000_000u64; // long past tolerance
        let signed_payload = format!("{}.{}", ts, payload);
        let mut mac = HmacSha256::new_from_slice(b"testsecret").unwrap();
        mac.update(signed_payload.as_bytes());
        let signature = format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()));

        assert!(matches!(
            decoder.decode(&payload, &signature),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_unsupported_event_type() {
        let decoder = StripeEventDecoder::new("whsec_testsecret");
        let payload = serde_json::json!({
            "id": "evt_2",
            "type": "product.created",
            "data": {"object": {}}
        })
        .to_string();
        let signature = sign("testsecret", &payload);

        assert!(matches!(
            decoder.decode(&payload, &signature),
            Err(BillingError::EventNotSupported(_))
        ));
    }

    #[test]
    fn test_malformed_object_is_rejected() {
        let decoder = StripeEventDecoder::new("whsec_testsecret");
        // subscription object missing required fields
        let payload = serde_json::json!({
            "id": "evt_3",
            "type": "customer.subscription.created",
            "data": {"object": {"status": "active"}}
        })
        .to_string();
        let signature = sign("testsecret", &payload);

        assert!(matches!(
            decoder.decode(&payload, &signature),
            Err(BillingError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_payment_intent_decodes_to_one_time_payment() {
        let decoder = StripeEventDecoder::new("whsec_testsecret");
        let payload = serde_json::json!({
            "id": "evt_4",
            "type": "payment_intent.succeeded",
            "account": "acct_agency",
            "data": {
                "object": {
                    "id": "pi_1",
                    "customer": "cus_1",
                    "receipt_email": "client@example.com",
                    "description": "Logo refresh package",
                    "amount": 250_00,
                    "amount_received": 250_00,
                    "currency": "usd"
                }
            }
        })
        .to_string();
        let signature = sign("testsecret", &payload);

        let event = decoder.decode(&payload, &signature).unwrap();
        match event.kind {
            EventKind::PaymentSucceeded(pay) => {
                assert!(pay.is_one_time());
                assert_eq!(pay.amount_cents, 250_00);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
