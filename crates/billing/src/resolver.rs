//! Entity resolution
//!
//! Maps provider-side identifiers onto the internal tenant/client graph:
//! billing account → agency, then customer → client. Clients are created
//! lazily, matched by email, on the first successful event that references
//! them.

use std::sync::Arc;

use uuid::Uuid;

use agencydesk_shared::{BillingAccount, BillingProvider, Client};

use crate::activity::{ActivityBuilder, ActivityLogger, ActivityType};
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, NewClient};

/// Resolves provider identifiers to internal entities
#[derive(Clone)]
pub struct EntityResolver {
    store: Arc<dyn BillingStore>,
    activity: ActivityLogger,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn BillingStore>, activity: ActivityLogger) -> Self {
        Self { store, activity }
    }

    /// Resolve the tenant owning a provider-side account id.
    ///
    /// A missing account is retryable: onboarding writes may not yet be
    /// visible when the provider's first events arrive.
    pub async fn resolve_agency(
        &self,
        provider: BillingProvider,
        account_id: Option<&str>,
    ) -> BillingResult<BillingAccount> {
        let account_id = account_id.ok_or(BillingError::MissingField("provider account id"))?;

        self.store
            .billing_account(provider, account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(format!("{provider}/{account_id}")))
    }

    /// Resolve the client a provider customer belongs to, creating one when
    /// no match exists.
    ///
    /// Resolution order: an existing subscription for the customer wins, then
    /// an email match within the agency; otherwise a new client (and its
    /// organization, when a name is known) is created and logged.
    pub async fn resolve_or_create_client(
        &self,
        agency_id: Uuid,
        provider: BillingProvider,
        customer_id: Option<&str>,
        email: Option<&str>,
        name: Option<&str>,
    ) -> BillingResult<Client> {
        if let Some(customer_id) = customer_id {
            if let Some(subscription) = self
                .store
                .subscription_by_customer(provider, customer_id)
                .await?
            {
                if let Some(client) = self.store.client(subscription.client_id).await? {
                    return Ok(client);
                }
            }
        }

        let email = email.ok_or(BillingError::MissingField("customer email"))?;

        if let Some(client) = self.store.client_by_email(agency_id, email).await? {
            return Ok(client);
        }

        let client = self
            .store
            .create_client(NewClient {
                agency_id,
                organization_name: name.map(str::to_string),
                email: email.to_string(),
                name: name.map(str::to_string),
            })
            .await?;

        self.activity
            .log_best_effort(
                ActivityBuilder::new(agency_id, ActivityType::ClientCreated)
                    .data(serde_json::json!({
                        "client_id": client.id,
                        "email": client.email,
                    }))
                    .customer(customer_id.unwrap_or_default()),
            )
            .await;

        tracing::info!(
            agency_id = %agency_id,
            client_id = %client.id,
            provider = %provider,
            "Created client from billing event"
        );

        Ok(client)
    }
}
