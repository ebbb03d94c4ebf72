//! Tenant Gateway - host-based tenant resolution and session gating

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tenant_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    routes::RouteClassifier,
    setup_tracing,
    tenant::TenantRegistry,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Resolve { ref host, ref path }) => run_resolve(&config, host, path),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> tenant_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    if let Some(ref url) = cli.backend_url {
        config.backend.base_url.clone_from(url);
    }
    config.validate()?;
    Ok(config)
}

/// Print the tenant and route class for a host/path pair
fn run_resolve(config: &Config, host: &str, path: &str) -> ExitCode {
    let tenants = match TenantRegistry::from_config(&config.tenants) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    let routes = RouteClassifier::from_config(&config.routes);

    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    let tenant = tenants.resolve_with_query(host, query);
    let class = routes.classify(path);

    let report = serde_json::json!({
        "host": host,
        "path": path,
        "tenant": &*tenant,
        "route": class,
        "login_path": config.routes.login_path,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to serialize to JSON: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        backend = %config.backend.base_url,
        "Starting tenant gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
