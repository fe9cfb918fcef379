//! Outbound provider clients
//!
//! The inbound webhook path verifies and decodes payloads itself; these
//! clients cover the outbound calls the pipeline makes back to the providers,
//! currently checkout-link creation for one-off purchases.

use async_trait::async_trait;
use serde::Deserialize;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
};

use agencydesk_shared::BillingProvider;

use crate::error::{BillingError, BillingResult};

/// Configuration for the Stripe client
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Create a payment-mode checkout session for a one-off purchase and
    /// return its URL.
    pub async fn create_checkout_link(&self, request: &CheckoutLinkRequest) -> BillingResult<String> {
        let success_url = format!("{}/billing/success", self.config.app_base_url);
        let cancel_url = format!("{}/billing/cancel", self.config.app_base_url);

        let line_item = CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: parse_currency(&request.currency),
                unit_amount: Some(request.amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.description.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        };

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![line_item]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            customer_email: request.customer_email.as_deref(),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.inner(), params).await?;

        session
            .url
            .ok_or_else(|| BillingError::ProviderApi("checkout session has no url".to_string()))
    }
}

fn parse_currency(code: &str) -> stripe::Currency {
    match code.to_lowercase().as_str() {
        "usd" => stripe::Currency::USD,
        "eur" => stripe::Currency::EUR,
        "cop" => stripe::Currency::COP,
        "mxn" => stripe::Currency::MXN,
        "brl" => stripe::Currency::BRL,
        _ => stripe::Currency::USD,
    }
}

/// Configuration for the Treli client
#[derive(Debug, Clone)]
pub struct TreliConfig {
    pub api_key: String,
    /// Treli webhook signing secret
    pub webhook_secret: String,
    pub api_base_url: String,
}

impl TreliConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            api_key: std::env::var("TRELI_API_KEY")
                .map_err(|_| BillingError::Config("TRELI_API_KEY not set".to_string()))?,
            webhook_secret: std::env::var("TRELI_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("TRELI_WEBHOOK_SECRET not set".to_string()))?,
            api_base_url: std::env::var("TRELI_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.treli.co/v1".to_string()),
        })
    }
}

/// Thin HTTP wrapper over the Treli API
#[derive(Clone)]
pub struct TreliClient {
    http: reqwest::Client,
    config: TreliConfig,
}

#[derive(Debug, Deserialize)]
struct TreliCheckoutLinkResponse {
    url: String,
}

impl TreliClient {
    pub fn new(config: TreliConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &TreliConfig {
        &self.config
    }

    /// Create a payment link for a one-off purchase and return its URL
    pub async fn create_checkout_link(&self, request: &CheckoutLinkRequest) -> BillingResult<String> {
        let response = self
            .http
            .post(format!("{}/checkout/links", self.config.api_base_url))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "amount": request.amount_cents,
                "currency": request.currency,
                "description": request.description,
                "customer_email": request.customer_email,
            }))
            .send()
            .await?
            .error_for_status()?;

        let link: TreliCheckoutLinkResponse = response.json().await?;
        Ok(link.url)
    }
}

/// A request to create a hosted checkout link
#[derive(Debug, Clone)]
pub struct CheckoutLinkRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
}

/// Capability to create checkout links, keyed by provider
///
/// The one-time reconciler depends on this trait rather than a concrete SDK;
/// tests substitute a stub.
#[async_trait]
pub trait CheckoutLinks: Send + Sync {
    async fn create_checkout_link(
        &self,
        provider: BillingProvider,
        request: &CheckoutLinkRequest,
    ) -> BillingResult<String>;
}

/// Dispatches checkout-link creation to whichever providers are configured
#[derive(Clone, Default)]
pub struct ProviderGateways {
    pub stripe: Option<StripeClient>,
    pub treli: Option<TreliClient>,
}

#[async_trait]
impl CheckoutLinks for ProviderGateways {
    async fn create_checkout_link(
        &self,
        provider: BillingProvider,
        request: &CheckoutLinkRequest,
    ) -> BillingResult<String> {
        match provider {
            BillingProvider::Stripe => {
                let client = self.stripe.as_ref().ok_or_else(|| {
                    BillingError::Config("stripe client not configured".to_string())
                })?;
                client.create_checkout_link(request).await
            }
            BillingProvider::Treli => {
                let client = self.treli.as_ref().ok_or_else(|| {
                    BillingError::Config("treli client not configured".to_string())
                })?;
                client.create_checkout_link(request).await
            }
        }
    }
}
