//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-tenant site gateway
#[derive(Parser, Debug)]
#[command(name = "tenant-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TENANT_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TENANT_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TENANT_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Backend API base URL (identity service and forwarded endpoints)
    #[arg(long, env = "TENANT_GATEWAY_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TENANT_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TENANT_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Show how a host and path would be handled
    Resolve {
        /// Host header value, e.g. `acme.com:4321`
        #[arg(long)]
        host: String,

        /// Request path
        #[arg(long, default_value = "/")]
        path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["tenant-gateway"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_resolve_subcommand() {
        let cli = Cli::try_parse_from([
            "tenant-gateway",
            "resolve",
            "--host",
            "acme.com",
            "--path",
            "/admin",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Resolve { host, path }) => {
                assert_eq!(host, "acme.com");
                assert_eq!(path, "/admin");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
