//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use agencydesk_billing::ReconciliationService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// The billing reconciliation pipeline (None when no provider secrets are set)
    pub billing: Option<Arc<ReconciliationService>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = match ReconciliationService::from_env(pool.clone()) {
            Ok(service) => {
                tracing::info!("Billing reconciliation pipeline initialized");
                Some(Arc::new(service))
            }
            Err(e) => {
                tracing::warn!("Billing reconciliation not configured: {}", e);
                None
            }
        };

        Self {
            pool,
            config,
            billing,
        }
    }
}
