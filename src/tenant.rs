//! Tenant resolution from the inbound `Host` header
//!
//! The registry is built once at startup from the inline site map and an
//! optional JSON site file, and is read-only afterwards. Resolution is total:
//! unknown, empty or malformed hosts all land on the default tenant.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::{SiteConfig, TenantsConfig};
use crate::{Error, Result};

/// Query parameters that may name a site explicitly
const SITE_OVERRIDE_PARAMS: [&str; 3] = ["site", "website", "tenant"];

/// Suffix used for local development hosts (`acme.localhost`)
const DEV_HOST_SUFFIX: &str = ".localhost";

/// Bare loopback hosts served by the first `.com` site
const LOOPBACK_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Immutable description of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantDescriptor {
    /// Unique tenant id
    pub id: String,
    /// Host key this descriptor was registered under
    pub host: String,
    /// Asset directory for pages
    pub directory: String,
    /// Backend partition key
    pub database: String,
    /// Theme name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Enabled features
    pub features: Vec<String>,
}

impl TenantDescriptor {
    /// Tenant used when nothing is configured
    #[must_use]
    pub fn builtin_default() -> Self {
        Self {
            id: "default".to_string(),
            host: "default".to_string(),
            directory: "default".to_string(),
            database: "default_db".to_string(),
            theme: Some("light".to_string()),
            features: vec!["blog".to_string()],
        }
    }

    fn from_site(host: &str, site: &SiteConfig) -> Result<Self> {
        if site.id.trim().is_empty() {
            return Err(Error::Config(format!("site '{host}' has no id")));
        }
        Ok(Self {
            id: site.id.clone(),
            host: host.to_string(),
            directory: site.directory.clone().unwrap_or_else(|| site.id.clone()),
            database: site.database.clone().unwrap_or_else(|| site.id.clone()),
            theme: site.theme.clone(),
            features: site.features.clone(),
        })
    }
}

/// Host -> tenant lookup table
#[derive(Debug)]
pub struct TenantRegistry {
    /// Lowercased host keys
    by_host: HashMap<String, Arc<TenantDescriptor>>,
    /// First descriptor per tenant id, by sorted host key
    by_id: HashMap<String, Arc<TenantDescriptor>>,
    /// First `.com` site by sorted host key, answers bare loopback hosts
    loopback: Option<Arc<TenantDescriptor>>,
    default: Arc<TenantDescriptor>,
}

impl TenantRegistry {
    /// Build a registry from `host -> site` entries.
    ///
    /// `default_id` selects the fallback tenant; when no site carries that id
    /// the `default` host key is used, then the built-in default.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if a site has an empty id.
    pub fn new(sites: &BTreeMap<String, SiteConfig>, default_id: &str) -> Result<Self> {
        let mut by_host = HashMap::with_capacity(sites.len());
        let mut by_id: HashMap<String, Arc<TenantDescriptor>> = HashMap::new();

        for (host, site) in sites {
            let host = host.trim().to_ascii_lowercase();
            let descriptor = Arc::new(TenantDescriptor::from_site(&host, site)?);
            by_id
                .entry(descriptor.id.clone())
                .or_insert_with(|| Arc::clone(&descriptor));
            by_host.insert(host, descriptor);
        }

        let loopback = by_host
            .keys()
            .filter(|host| host.ends_with(".com"))
            .min()
            .and_then(|host| by_host.get(host))
            .cloned();

        let default = by_id
            .get(default_id)
            .or_else(|| by_host.get("default"))
            .cloned()
            .unwrap_or_else(|| Arc::new(TenantDescriptor::builtin_default()));

        Ok(Self {
            by_host,
            by_id,
            loopback,
            default,
        })
    }

    /// Build the registry from configuration, reading `sites_file` if set.
    /// Inline sites override file entries with the same host.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the site file cannot be read or parsed.
    pub fn from_config(config: &TenantsConfig) -> Result<Self> {
        let mut sites = BTreeMap::new();

        if let Some(ref file) = config.sites_file {
            sites.extend(load_sites_file(Path::new(file))?);
        }
        sites.extend(config.sites.iter().map(|(k, v)| (k.clone(), v.clone())));

        if sites.is_empty() {
            debug!("No sites configured, serving the built-in default tenant");
            return Self::new(&builtin_sites(), &config.default_tenant);
        }

        Self::new(&sites, &config.default_tenant)
    }

    /// Resolve a `Host` header value to a tenant. Never fails.
    #[must_use]
    pub fn resolve(&self, host: &str) -> Arc<TenantDescriptor> {
        let Some(domain) = normalize_host(host) else {
            return Arc::clone(&self.default);
        };

        if let Some(tenant) = self.by_host.get(&domain) {
            return Arc::clone(tenant);
        }

        if let Some(label) = domain.strip_suffix(DEV_HOST_SUFFIX) {
            if let Some(tenant) = self.by_id.get(label) {
                return Arc::clone(tenant);
            }
        }

        if LOOPBACK_HOSTS.contains(&domain.as_str()) {
            return self
                .loopback
                .as_ref()
                .map_or_else(|| Arc::clone(&self.default), Arc::clone);
        }

        if let Some(tenant) = self.by_host.get(&format!("www.{domain}")) {
            return Arc::clone(tenant);
        }

        Arc::clone(&self.default)
    }

    /// Resolve with an optional `?site=` / `?website=` / `?tenant=` override.
    ///
    /// The override only applies when it names a registered host key
    /// (`.com` is appended to bare names).
    #[must_use]
    pub fn resolve_with_query(&self, host: &str, query: Option<&str>) -> Arc<TenantDescriptor> {
        if let Some(tenant) = query.and_then(|q| self.site_override(q)) {
            return tenant;
        }
        self.resolve(host)
    }

    fn site_override(&self, query: &str) -> Option<Arc<TenantDescriptor>> {
        let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        let value = SITE_OVERRIDE_PARAMS
            .iter()
            .find_map(|name| params.get(*name).filter(|v| !v.is_empty()))?;

        let mut key = value.trim().to_ascii_lowercase();
        if !key.contains('.') {
            key.push_str(".com");
        }
        self.by_host.get(&key).cloned()
    }

    /// The fallback tenant
    #[must_use]
    pub fn default_tenant(&self) -> Arc<TenantDescriptor> {
        Arc::clone(&self.default)
    }

    /// Number of registered host keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    /// Whether no host keys are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

/// Lowercase, strip port, trailing dot and a leading `www.`.
/// Returns `None` for empty or obviously malformed input.
fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
        return None;
    }

    let without_port = if host.starts_with('[') {
        // [::1]:4321
        host.split_once(']').map(|(addr, _)| format!("{addr}]"))?
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
            Some(_) => return None,
            None => host.to_string(),
        }
    };

    let mut domain = without_port.to_ascii_lowercase();
    if domain.ends_with('.') {
        domain.pop();
    }
    if let Some(rest) = domain.strip_prefix("www.") {
        domain = rest.to_string();
    }

    if domain.is_empty() { None } else { Some(domain) }
}

fn load_sites_file(path: &Path) -> Result<BTreeMap<String, SiteConfig>> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read sites file {}: {e}", path.display()))
    })?;

    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse sites file {}: {e}", path.display()))
    })
}

fn builtin_sites() -> BTreeMap<String, SiteConfig> {
    let site = SiteConfig {
        id: "default".to_string(),
        directory: Some("default".to_string()),
        database: Some("default_db".to_string()),
        theme: Some("light".to_string()),
        features: vec!["blog".to_string()],
    };
    ["127.0.0.1", "localhost", "default"]
        .into_iter()
        .map(|host| (host.to_string(), site.clone()))
        .collect()
}
