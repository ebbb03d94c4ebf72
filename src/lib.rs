//! Tenant Gateway Library
//!
//! Serves many branded sites from one deployment. Each request is mapped to a
//! tenant by its `Host` header, protected areas are gated behind a session
//! verified by the backend identity service, and a handful of API endpoints
//! are forwarded to the backend under the tenant's data partition.
//!
//! # Request pipeline
//!
//! - **Tenant resolution**: host -> [`tenant::TenantDescriptor`], never fails
//! - **Route classification**: path -> public or protected
//! - **Session verification**: one `GET /api/auth/me` per protected request
//! - **Forwarding**: login, admin bootstrap, session check and posts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod tenant;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
