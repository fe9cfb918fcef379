//! Billing error types
//!
//! Every error carries a retryable/fatal classification. Transient conditions
//! (rows not yet visible, database I/O, provider API failures) are retryable;
//! validation and signature failures are not, and propagate immediately.

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    #[error("No recognized billing provider signature header")]
    UnknownProvider,

    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),

    #[error("Webhook event type not supported: {0}")]
    EventNotSupported(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Billing account not found: {0}")]
    AccountNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether a retry can plausibly succeed.
    ///
    /// Not-found errors during cross-entity resolution are retryable: the
    /// referenced rows may not yet be visible because provider delivery can
    /// outrun the writes from an earlier event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::AccountNotFound(_)
                | BillingError::SubscriptionNotFound(_)
                | BillingError::InvoiceNotFound(_)
                | BillingError::ProviderApi(_)
                | BillingError::Database(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // PostgreSQL unique violation: a constraint conflict, not transient
            if db_err.code().as_deref() == Some("23505") {
                return BillingError::Conflict(db_err.to_string());
            }
        }
        BillingError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::ProviderApi(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::ProviderApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BillingError::AccountNotFound("acct_1".into()).is_retryable());
        assert!(BillingError::SubscriptionNotFound("sub_1".into()).is_retryable());
        assert!(BillingError::InvoiceNotFound("in_1".into()).is_retryable());
        assert!(BillingError::Database("connection reset".into()).is_retryable());
        assert!(BillingError::ProviderApi("timeout".into()).is_retryable());

        assert!(!BillingError::SignatureInvalid.is_retryable());
        assert!(!BillingError::UnknownProvider.is_retryable());
        assert!(!BillingError::MalformedEvent("bad json".into()).is_retryable());
        assert!(!BillingError::EventNotSupported("product.created".into()).is_retryable());
        assert!(!BillingError::MissingField("customer email").is_retryable());
        assert!(!BillingError::Conflict("duplicate key".into()).is_retryable());
        assert!(!BillingError::Config("unset".into()).is_retryable());
    }
}
