//! Agencydesk API Library
//!
//! This crate contains the HTTP ingress components for Agencydesk: the
//! billing webhook endpoint, health probes, configuration, and state.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;
