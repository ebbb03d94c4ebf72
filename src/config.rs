//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity service / content API
    pub backend: BackendConfig,
    /// Tenant table
    pub tenants: TenantsConfig,
    /// Route protection rules
    pub routes: RoutesConfig,
    /// API forwarding endpoints
    pub proxy: ProxyConfig,
    /// Session cookie
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4321,
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Backend API configuration.
///
/// The same backend serves session verification (`/api/auth/me`) and the
/// forwarded auth and content endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://localhost:3001`
    pub base_url: String,
    /// Upper bound on a single session verification call
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,
    /// Upper bound on a forwarded API call
    #[serde(with = "humantime_serde")]
    pub proxy_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            verify_timeout: Duration::from_secs(5),
            proxy_timeout: Duration::from_secs(30),
        }
    }
}

/// Tenant table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    /// Tenant id answering unknown hosts
    pub default_tenant: String,
    /// JSON site map (`host -> site`) read once at startup
    pub sites_file: Option<String>,
    /// Inline site map (`host -> site`)
    pub sites: HashMap<String, SiteConfig>,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            default_tenant: "default".to_string(),
            sites_file: None,
            sites: HashMap::new(),
        }
    }
}

/// One site entry, keyed by host in the site map
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SiteConfig {
    /// Tenant id
    pub id: String,
    /// Asset directory (defaults to `id`)
    pub directory: Option<String>,
    /// Backend partition key (defaults to `id`)
    pub database: Option<String>,
    /// Theme name, passed through to pages
    pub theme: Option<String>,
    /// Enabled features, passed through to pages
    pub features: Vec<String>,
}

/// Route protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// Where unauthenticated requests to protected paths are sent
    pub login_path: String,
    /// Protected areas, evaluated in order
    pub protected: Vec<ProtectedRouteConfig>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            login_path: "/blog/editor/login".to_string(),
            protected: vec![
                ProtectedRouteConfig {
                    prefix: "/blog/editor".to_string(),
                    except: vec!["/blog/editor/login".to_string()],
                },
                ProtectedRouteConfig {
                    prefix: "/admin".to_string(),
                    except: Vec::new(),
                },
            ],
        }
    }
}

/// A protected prefix with carved-out public sub-paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtectedRouteConfig {
    /// Path prefix to protect
    pub prefix: String,
    /// Paths under the prefix that stay public
    #[serde(default)]
    pub except: Vec<String>,
}

/// API forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Partition key used when neither the header nor a resolved tenant supplies one
    pub default_database: String,
    /// Honour a caller-supplied `X-Site-Database` header.
    ///
    /// Any client can set this header. Disable it when the forwarding
    /// endpoints are reachable from outside a trusted origin.
    pub trust_database_header: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_database: "codersinflow".to_string(),
            trust_database_header: true,
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session token
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "auth-token".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (TENANT_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("TENANT_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.backend.base_url = Self::expand_string(&re, &self.backend.base_url);
        if let Some(file) = self.tenants.sites_file.as_mut() {
            *file = expand_home(&Self::expand_string(&re, file));
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Reject configurations the gateway cannot serve
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend.base_url).map_err(|e| {
            Error::Config(format!("Invalid backend.base_url '{}': {e}", self.backend.base_url))
        })?;

        if !self.routes.login_path.starts_with('/') {
            return Err(Error::Config(format!(
                "routes.login_path must be absolute: {}",
                self.routes.login_path
            )));
        }

        for rule in &self.routes.protected {
            if !rule.prefix.starts_with('/') {
                return Err(Error::Config(format!(
                    "protected prefix must be absolute: {}",
                    rule.prefix
                )));
            }
        }

        if self.session.cookie_name.is_empty() {
            return Err(Error::Config("session.cookie_name is empty".to_string()));
        }

        Ok(())
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Human-readable serde for `Duration` ("500ms", "5s", "2m", or bare seconds)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "500ms", "5s", "2m" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns the integer parse error for malformed input.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
