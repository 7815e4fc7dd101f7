//! Configuration types for dnsync
//!
//! [`Settings`] is assembled from environment variables through a lookup
//! function, so tests never have to touch the process environment.
//! The runtime-mutable subset lives in [`RuntimeConfig`] and is persisted
//! in the durable store's `config.json`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::record::{RecordType, parse_bool};

/// Which discovery monitor drives reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Desired state from the reverse proxy's routing configuration
    #[default]
    Proxy,
    /// Desired state from container labels
    Direct,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Proxy => "proxy",
            OperationMode::Direct => "direct",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" | "traefik" => Ok(OperationMode::Proxy),
            "direct" => Ok(OperationMode::Direct),
            other => Err(Error::config(format!(
                "Unknown operation mode '{}'. Valid modes: proxy, direct",
                other
            ))),
        }
    }
}

/// Main dnsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub operation_mode: OperationMode,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval: u64,

    /// Delete orphaned records once the grace period elapsed
    #[serde(default)]
    pub cleanup_orphaned: bool,

    /// Grace period in seconds
    #[serde(default = "default_cleanup_grace_period_secs")]
    pub cleanup_grace_period: u64,

    /// Provider record cache lifetime in milliseconds
    #[serde(default = "default_cache_refresh_interval_ms")]
    pub cache_refresh_interval: u64,

    /// Upper bound on any single provider call, in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout: u64,

    pub provider: ProviderConfig,

    #[serde(default)]
    pub defaults: RecordDefaults,

    #[serde(default)]
    pub labels: LabelConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    /// Directory holding the durable store files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Capacity of the domain event broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Settings {
    /// Settings with defaults for the given provider
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            operation_mode: OperationMode::default(),
            poll_interval: default_poll_interval_ms(),
            cleanup_orphaned: false,
            cleanup_grace_period: default_cleanup_grace_period_secs(),
            cache_refresh_interval: default_cache_refresh_interval_ms(),
            provider_timeout: default_provider_timeout_secs(),
            provider,
            defaults: RecordDefaults::default(),
            labels: LabelConfig::default(),
            proxy: ProxyConfig::default(),
            docker: DockerConfig::default(),
            data_dir: default_data_dir(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider_type = get("DNS_PROVIDER").unwrap_or_else(|| "cloudflare".to_string());
        let provider = match provider_type.to_ascii_lowercase().as_str() {
            "cloudflare" => ProviderConfig::Cloudflare {
                api_token: get("CLOUDFLARE_TOKEN").unwrap_or_default(),
                zone: get("CLOUDFLARE_ZONE").unwrap_or_default(),
                zone_id: get("CLOUDFLARE_ZONE_ID"),
            },
            "digitalocean" => ProviderConfig::Digitalocean {
                api_token: get("DO_TOKEN").unwrap_or_default(),
                domain: get("DO_DOMAIN").unwrap_or_default(),
            },
            other => {
                return Err(Error::config(format!(
                    "DNS_PROVIDER '{}' is not supported. Supported providers: cloudflare, digitalocean",
                    other
                )));
            }
        };

        let mut settings = Settings::new(provider);

        if let Some(mode) = get("OPERATION_MODE") {
            settings.operation_mode = mode.parse()?;
        }
        if let Some(v) = get("POLL_INTERVAL") {
            settings.poll_interval = parse_number("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("CLEANUP_ORPHANED") {
            settings.cleanup_orphaned = parse_flag("CLEANUP_ORPHANED", &v)?;
        }
        if let Some(v) = get("CLEANUP_GRACE_PERIOD") {
            settings.cleanup_grace_period = parse_number("CLEANUP_GRACE_PERIOD", &v)?;
        }
        if let Some(v) = get("DNS_CACHE_REFRESH_INTERVAL") {
            settings.cache_refresh_interval = parse_number("DNS_CACHE_REFRESH_INTERVAL", &v)?;
        }
        if let Some(v) = get("PROVIDER_TIMEOUT") {
            settings.provider_timeout = parse_number("PROVIDER_TIMEOUT", &v)?;
        }

        if let Some(v) = get("DNS_DEFAULT_TYPE") {
            settings.defaults.record_type = v.parse()?;
        }
        settings.defaults.content = get("DNS_DEFAULT_CONTENT");
        if let Some(v) = get("DNS_DEFAULT_TTL") {
            settings.defaults.ttl = Some(parse_number("DNS_DEFAULT_TTL", &v)?);
        }
        if let Some(v) = get("DNS_DEFAULT_PROXIED") {
            settings.defaults.proxied = parse_flag("DNS_DEFAULT_PROXIED", &v)?;
        }
        if let Some(v) = get("DNS_DEFAULT_MANAGE") {
            settings.defaults.manage = parse_flag("DNS_DEFAULT_MANAGE", &v)?;
        }
        if let Some(v) = get("PUBLIC_IP") {
            settings.defaults.public_ipv4 = Some(
                v.parse()
                    .map_err(|_| Error::config(format!("PUBLIC_IP is not an IPv4 address: {}", v)))?,
            );
        }
        if let Some(v) = get("PUBLIC_IPV6") {
            settings.defaults.public_ipv6 = Some(
                v.parse()
                    .map_err(|_| Error::config(format!("PUBLIC_IPV6 is not an IPv6 address: {}", v)))?,
            );
        }

        if let Some(v) = get("DNS_LABEL_PREFIX") {
            settings.labels.dns_prefix = v;
        }
        if let Some(v) = get("TRAEFIK_LABEL_PREFIX") {
            settings.labels.proxy_prefix = v;
        }

        if let Some(v) = get("TRAEFIK_API_URL") {
            settings.proxy.api_url = v;
        }
        settings.proxy.username = get("TRAEFIK_API_USERNAME");
        settings.proxy.password = get("TRAEFIK_API_PASSWORD");

        if let Some(v) = get("DOCKER_API_URL") {
            settings.docker.api_url = v;
        }
        if let Some(v) = get("DOCKER_POLL_INTERVAL") {
            settings.docker.poll_interval = parse_number("DOCKER_POLL_INTERVAL", &v)?;
        }

        if let Some(v) = get("DATA_DIR") {
            settings.data_dir = PathBuf::from(v);
        }

        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.provider.validate()?;

        if self.poll_interval < 1000 {
            return Err(Error::config(format!(
                "POLL_INTERVAL must be at least 1000 ms. Got: {}",
                self.poll_interval
            )));
        }
        if self.provider_timeout == 0 {
            return Err(Error::config("PROVIDER_TIMEOUT must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("Event channel capacity must be > 0"));
        }
        if self.labels.dns_prefix.is_empty() {
            return Err(Error::config("DNS_LABEL_PREFIX cannot be empty"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_refresh_interval)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout)
    }

    /// Runtime-mutable subset, as persisted in `config.json`
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            operation_mode: Some(self.operation_mode),
            poll_interval: Some(self.poll_interval),
            cleanup_orphaned: Some(self.cleanup_orphaned),
            cleanup_grace_period: Some(self.cleanup_grace_period),
            cache_refresh_interval: Some(self.cache_refresh_interval),
            legacy_migration_completed: false,
        }
    }

    /// Overlay persisted runtime values on top of these settings
    pub fn apply_runtime(&mut self, runtime: &RuntimeConfig) {
        if let Some(mode) = runtime.operation_mode {
            self.operation_mode = mode;
        }
        if let Some(v) = runtime.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = runtime.cleanup_orphaned {
            self.cleanup_orphaned = v;
        }
        if let Some(v) = runtime.cleanup_grace_period {
            self.cleanup_grace_period = v;
        }
        if let Some(v) = runtime.cache_refresh_interval {
            self.cache_refresh_interval = v;
        }
    }
}

/// DNS provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Cloudflare provider
    Cloudflare {
        /// Cloudflare API token
        api_token: String,
        /// Zone name (e.g. "example.com")
        zone: String,
        /// Zone ID (optional, looked up from the zone name otherwise)
        zone_id: Option<String>,
    },

    /// DigitalOcean provider
    Digitalocean {
        /// DigitalOcean API token
        api_token: String,
        /// Domain managed in DigitalOcean
        domain: String,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Zone the provider manages
        zone: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

// Tokens stay out of logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderConfig::Cloudflare { zone, zone_id, .. } => f
                .debug_struct("Cloudflare")
                .field("api_token", &"<REDACTED>")
                .field("zone", zone)
                .field("zone_id", zone_id)
                .finish(),
            ProviderConfig::Digitalocean { domain, .. } => f
                .debug_struct("Digitalocean")
                .field("api_token", &"<REDACTED>")
                .field("domain", domain)
                .finish(),
            ProviderConfig::Custom { factory, zone, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("zone", zone)
                .finish(),
        }
    }
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderConfig::Cloudflare { api_token, zone, .. } => {
                if api_token.is_empty() {
                    return Err(Error::config("CLOUDFLARE_TOKEN is required for the cloudflare provider"));
                }
                if zone.is_empty() {
                    return Err(Error::config("CLOUDFLARE_ZONE is required for the cloudflare provider"));
                }
                Ok(())
            }
            ProviderConfig::Digitalocean { api_token, domain } => {
                if api_token.is_empty() {
                    return Err(Error::config("DO_TOKEN is required for the digitalocean provider"));
                }
                if domain.is_empty() {
                    return Err(Error::config("DO_DOMAIN is required for the digitalocean provider"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, zone, .. } => {
                if factory.is_empty() {
                    return Err(Error::config("Custom provider factory cannot be empty"));
                }
                if zone.is_empty() {
                    return Err(Error::config("Custom provider zone cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { .. } => "cloudflare",
            ProviderConfig::Digitalocean { .. } => "digitalocean",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }

    /// Zone the provider manages
    pub fn zone(&self) -> &str {
        match self {
            ProviderConfig::Cloudflare { zone, .. } => zone,
            ProviderConfig::Digitalocean { domain, .. } => domain,
            ProviderConfig::Custom { zone, .. } => zone,
        }
    }
}

/// Values applied to desired entries that omit them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDefaults {
    #[serde(default = "default_record_type")]
    pub record_type: RecordType,
    /// Content for types that have no natural default
    #[serde(default)]
    pub content: Option<String>,
    /// TTL override; the provider default applies when unset
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default = "default_true")]
    pub proxied: bool,
    /// Manage hostnames without an explicit manage label
    #[serde(default = "default_true")]
    pub manage: bool,
    #[serde(default)]
    pub public_ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub public_ipv6: Option<Ipv6Addr>,
}

impl Default for RecordDefaults {
    fn default() -> Self {
        Self {
            record_type: default_record_type(),
            content: None,
            ttl: None,
            proxied: true,
            manage: true,
            public_ipv4: None,
            public_ipv6: None,
        }
    }
}

/// Label prefixes used by the discovery monitors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelConfig {
    #[serde(default = "default_dns_prefix")]
    pub dns_prefix: String,
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            dns_prefix: default_dns_prefix(),
            proxy_prefix: default_proxy_prefix(),
        }
    }
}

/// Reverse-proxy API access
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_url: default_proxy_api_url(),
            username: None,
            password: None,
        }
    }
}

/// Container runtime API access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default = "default_docker_api_url")]
    pub api_url: String,
    /// How often the container list is diffed for lifecycle events (ms)
    #[serde(default = "default_docker_poll_interval_ms")]
    pub poll_interval: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            api_url: default_docker_api_url(),
            poll_interval: default_docker_poll_interval_ms(),
        }
    }
}

/// Settings an operator may change while the daemon runs.
///
/// Stored as the `config.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_mode: Option<OperationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_orphaned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_grace_period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_refresh_interval: Option<u64>,
    #[serde(default)]
    pub legacy_migration_completed: bool,
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::config(format!("{} must be a non-negative integer. Got: {}", key, raw)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    parse_bool(raw).ok_or_else(|| Error::config(format!("{} must be true or false. Got: {}", key, raw)))
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_cleanup_grace_period_secs() -> u64 {
    900
}

fn default_cache_refresh_interval_ms() -> u64 {
    3_600_000
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/config/data")
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_record_type() -> RecordType {
    RecordType::Cname
}

fn default_true() -> bool {
    true
}

fn default_dns_prefix() -> String {
    "dns.".to_string()
}

fn default_proxy_prefix() -> String {
    "traefik.".to_string()
}

fn default_proxy_api_url() -> String {
    "http://traefik:8080/api".to_string()
}

fn default_docker_api_url() -> String {
    "http://localhost:2375".to_string()
}

fn default_docker_poll_interval_ms() -> u64 {
    5_000
}
