//! One-time payment reconciliation
//!
//! The absence of all four period/trial fields routes a payment to the
//! one-time path: an invoice pre-marked paid, one line item, a payment row,
//! a detached checkout-link task, and an activity record.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use agencydesk_billing::{BillingStore, EventKind};
use agencydesk_shared::InvoiceStatus;

use common::{one_time_payment_payload, pipeline, pipeline_with_links, stripe_event, StubLinks};

/// Poll the store until the detached checkout-link task lands, or time out
async fn wait_for_checkout_url(p: &common::TestPipeline) -> Option<String> {
    for _ in 0..100 {
        if let Some(url) = p.store.invoices().await[0].checkout_url.clone() {
            return Some(url);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

#[tokio::test]
async fn one_time_payment_creates_paid_invoice_with_payment_and_item() {
    let p = pipeline().await;

    p.handler
        .handle_event(stripe_event(
            "evt_1",
            EventKind::PaymentSucceeded(one_time_payment_payload("pi_1", "cus_9")),
        ))
        .await
        .unwrap();

    let invoices = p.store.invoices().await;
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert!(invoice.paid_at.is_some());
    assert_eq!(invoice.total_cents, 45_000);
    assert_eq!(invoice.amount_paid_cents, 45_000);
    assert_eq!(invoice.amount_due_cents, 0);

    let items = p.store.invoice_items(invoice.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].amount_cents, 45_000);
    assert_eq!(items[0].quantity, 1);

    let payments = p.store.invoice_payments(invoice.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].provider_payment_id.as_deref(), Some("pi_1"));

    // The first successful payment lazily created the client graph
    let clients = p.store.clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].email, "cus_9@example.com");
    assert_eq!(p.store.organizations().await.len(), 1);

    let activities = p.store.activities().await;
    assert!(activities
        .iter()
        .any(|a| a.activity_type == "ONE_TIME_PURCHASE"));
    assert!(activities.iter().any(|a| a.activity_type == "CLIENT_CREATED"));
}

#[tokio::test]
async fn checkout_link_lands_without_blocking_the_ack() {
    let p = pipeline().await;

    p.handler
        .handle_event(stripe_event(
            "evt_1",
            EventKind::PaymentSucceeded(one_time_payment_payload("pi_1", "cus_9")),
        ))
        .await
        .unwrap();

    let url = wait_for_checkout_url(&p).await;
    assert_eq!(url.as_deref(), Some("https://pay.example.com/link_1"));
    assert!(p.links.calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn checkout_link_is_retried_on_transient_failure() {
    let p = pipeline_with_links(StubLinks::failing_first("https://pay.example.com/link_2", 2)).await;

    p.handler
        .handle_event(stripe_event(
            "evt_1",
            EventKind::PaymentSucceeded(one_time_payment_payload("pi_2", "cus_9")),
        ))
        .await
        .unwrap();

    let url = wait_for_checkout_url(&p).await;
    assert_eq!(url.as_deref(), Some("https://pay.example.com/link_2"));
    assert_eq!(p.links.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn payment_with_any_period_field_takes_the_subscription_path() {
    let p = pipeline().await;

    // No invoice exists, so the subscription path must fail the lookup after
    // its retries; the one-time path would instead have created an invoice.
    let mut payload = one_time_payment_payload("pi_3", "cus_9");
    payload.trial_end = Some(1_701_209_600);
    payload.invoice_id = Some("in_absent".to_string());

    let result = p
        .handler
        .handle_event(stripe_event("evt_1", EventKind::PaymentSucceeded(payload)))
        .await;

    assert!(result.is_err(), "subscription path hits the invoice lookup");
    assert!(p.store.invoices().await.is_empty());
}

#[tokio::test]
async fn redelivered_one_time_payment_does_not_duplicate_the_invoice() {
    let p = pipeline().await;

    p.handler
        .handle_event(stripe_event(
            "evt_1",
            EventKind::PaymentSucceeded(one_time_payment_payload("pi_1", "cus_9")),
        ))
        .await
        .unwrap();
    // Redelivery with a fresh event id: upsert on (provider, provider_id)
    p.handler
        .handle_event(stripe_event(
            "evt_2",
            EventKind::PaymentSucceeded(one_time_payment_payload("pi_1", "cus_9")),
        ))
        .await
        .unwrap();

    let invoices = p.store.invoices().await;
    assert_eq!(invoices.len(), 1);

    let items = p.store.invoice_items(invoices[0].id).await.unwrap();
    assert_eq!(items.len(), 1, "line item insert must be idempotent");
}
