//! End-to-end flow: signed payload → router decode → reconciliation

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use agencydesk_billing::{BillingError, SignedDelivery, WebhookRouter};
use agencydesk_billing::providers::{StripeEventDecoder, TreliEventDecoder};

use common::{pipeline, ACCOUNT_ID};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_SECRET: &str = "stripe_webhook_secret";
const TRELI_SECRET: &str = "treli_webhook_secret";

fn stripe_sign(payload: &str) -> String {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let signed_payload = format!("{}.{}", ts, payload);
    let mut mac = HmacSha256::new_from_slice(STRIPE_SECRET.as_bytes()).unwrap();
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

fn treli_sign(payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(TRELI_SECRET.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn router() -> WebhookRouter {
    WebhookRouter::new(
        Some(StripeEventDecoder::new(STRIPE_SECRET)),
        Some(TreliEventDecoder::new(TRELI_SECRET)),
    )
}

#[tokio::test]
async fn stripe_delivery_reconciles_end_to_end() {
    let p = pipeline().await;
    let router = router();

    let payload = serde_json::json!({
        "id": "evt_e2e_1",
        "type": "customer.subscription.created",
        "account": ACCOUNT_ID,
        "data": {
            "object": {
                "id": "sub_e2e_1",
                "customer": "cus_e2e_1",
                "status": "active",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "metadata": {"client_email": "owner@acme.example"}
            }
        }
    })
    .to_string();

    let event = router
        .decode(SignedDelivery {
            body: &payload,
            stripe_signature: Some(&stripe_sign(&payload)),
            treli_signature: None,
        })
        .unwrap();

    p.handler.handle_event(event).await.unwrap();

    let subscriptions = p.store.subscriptions().await;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].billing_subscription_id, "sub_e2e_1");
    assert!(subscriptions[0].active);

    let clients = p.store.clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].email, "owner@acme.example");
}

#[tokio::test]
async fn treli_delivery_reconciles_end_to_end() {
    let p = pipeline().await;
    let router = router();

    let payload = serde_json::json!({
        "id": "evt_tr_e2e_1",
        "event": "payment.succeeded",
        "account_id": ACCOUNT_ID,
        "data": {
            "id": "pay_tr_e2e_1",
            "customer_id": "trcus_e2e_1",
            "customer_email": "duena@cafe.example",
            "customer_name": "Café Bogotá",
            "description": "Campaña de lanzamiento",
            "amount": 320_000_00,
            "currency": "cop"
        }
    })
    .to_string();

    let event = router
        .decode(SignedDelivery {
            body: &payload,
            stripe_signature: None,
            treli_signature: Some(&treli_sign(&payload)),
        })
        .unwrap();

    p.handler.handle_event(event).await.unwrap();

    let invoices = p.store.invoices().await;
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].currency, "cop");
    assert!(invoices[0].paid_at.is_some());
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let router = router();

    let payload = serde_json::json!({
        "id": "evt_e2e_2",
        "type": "customer.subscription.created",
        "data": {"object": {"id": "sub_x", "customer": "cus_x", "status": "active"}}
    })
    .to_string();
    let signature = stripe_sign(&payload);
    let tampered = payload.replace("sub_x", "sub_y");

    assert!(matches!(
        router.decode(SignedDelivery {
            body: &tampered,
            stripe_signature: Some(&signature),
            treli_signature: None,
        }),
        Err(BillingError::SignatureInvalid)
    ));
}

#[tokio::test]
async fn unsigned_delivery_is_rejected() {
    let router = router();

    assert!(matches!(
        router.decode(SignedDelivery {
            body: "{}",
            stripe_signature: None,
            treli_signature: None,
        }),
        Err(BillingError::UnknownProvider)
    ));
}
