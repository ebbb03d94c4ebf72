//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::AuthGateway;
use super::proxy::TenantProxy;
use super::router::{AppState, create_router, create_router_with_pages};
use crate::config::Config;
use crate::tenant::TenantRegistry;
use crate::{Error, Result};

/// Tenant gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared request state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway. Builds every read-only table up front.
    pub fn new(config: Config) -> Result<Self> {
        let tenants = Arc::new(TenantRegistry::from_config(&config.tenants)?);
        let gateway = Arc::new(AuthGateway::from_config(&config, Arc::clone(&tenants))?);
        let proxy = TenantProxy::from_config(&config)?;

        info!(
            tenants = tenants.len(),
            default_tenant = %tenants.default_tenant().id,
            "Tenant registry ready"
        );

        let state = Arc::new(AppState {
            gateway,
            tenants,
            proxy,
            max_body_size: config.server.max_body_size,
            request_timeout: config.server.request_timeout,
        });

        Ok(Self { config, state })
    }

    /// Router with the built-in page context handler
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Router around caller-supplied pages
    pub fn router_with_pages(&self, pages: Router) -> Router {
        create_router_with_pages(Arc::clone(&self.state), pages)
    }

    /// Run the gateway until Ctrl-C / SIGTERM
    pub async fn run(self) -> Result<()> {
        let app = self.router();
        self.serve(app).await
    }

    /// Serve `app` on the configured address
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("TENANT GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(backend = %self.config.backend.base_url, verify_timeout = ?self.config.backend.verify_timeout, "Identity service");
        info!(login = %self.config.routes.login_path, "Login redirect target");
        for rule in &self.config.routes.protected {
            info!("  protected {} (except {:?})", rule.prefix, rule.except);
        }
        if self.config.proxy.trust_database_header {
            warn!("X-Site-Database is honoured from any caller on /api/auth/* and /api/posts/*");
        }
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
