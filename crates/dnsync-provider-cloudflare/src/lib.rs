// # Cloudflare DNS Provider
//
// Cloudflare API v4 implementation of `DnsProvider` for dnsync.
//
// ## Behavior
//
// - Lists, creates, updates and deletes records of one zone
// - Zone ID is configured or looked up once from the zone name
// - HTTP timeout of 30 seconds on every request
// - Status mapping: 401/403 and other 4xx are permanent, 404 is not-found,
//   409, 429 and 5xx are transient
// - Proxy flag supported for A, AAAA and CNAME; proxied records report
//   TTL 1 ("automatic")
//
// ## Trust Level: Untrusted (DNS Provider)
//
// - ✅ HTTP calls to the Cloudflare API only
// - ❌ No retries, no caching, no background tasks (owned by dnsync-core)
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - Provider creation fails fast if the token is empty
//
// ## API Reference
//
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?page=..&per_page=..`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use dnsync_core::config::ProviderConfig;
use dnsync_core::record::{DnsRecord, RecordType, normalize_hostname};
use dnsync_core::traits::{DnsProvider, DnsProviderFactory, ProviderRecord};
use dnsync_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Records per listing page
const PAGE_SIZE: u32 = 100;

/// TTL value Cloudflare uses for "automatic"
const AUTO_TTL: u32 = 1;

const PROVIDER: &str = "cloudflare";

/// Cloudflare DNS provider for one zone
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct CloudflareProvider {
    /// ⚠️ NEVER log this value
    api_token: String,
    zone: String,
    zone_id: OnceCell<String>,
    api_base: String,
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("zone", &self.zone)
            .field("zone_id", &self.zone_id.get())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a provider for `zone`.
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `zone`: Zone name (e.g. "example.com")
    /// - `zone_id`: Optional zone ID; looked up from `zone` on first use otherwise
    pub fn new(api_token: impl Into<String>, zone: &str, zone_id: Option<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }
        let zone = normalize_hostname(zone);
        if zone.is_empty() {
            return Err(Error::config("Cloudflare zone cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let zone_id = match zone_id.filter(|id| !id.is_empty()) {
            Some(id) => OnceCell::new_with(Some(id)),
            None => OnceCell::new(),
        };

        Ok(Self {
            api_token,
            zone,
            zone_id,
            api_base: CLOUDFLARE_API_BASE.to_string(),
            client,
        })
    }

    /// Point the provider at another API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Zone ID, looked up once by zone name
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn zone_id(&self) -> Result<&str> {
        let id = self
            .zone_id
            .get_or_try_init(|| async {
                tracing::debug!(zone = %self.zone, "Looking up Cloudflare zone ID");
                let url = format!("{}/zones", self.api_base);
                let request = self.client.get(&url).query(&[("name", self.zone.as_str())]);
                let (zones, _): (Vec<ApiZone>, _) = self.send(request, "zone lookup").await?;
                let zone = zones
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::permanent(PROVIDER, format!("Zone not found: {}", self.zone)))?;
                tracing::debug!(zone = %self.zone, zone_id = %zone.id, "Found zone ID");
                Ok::<_, Error>(zone.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Send an authenticated request and unwrap the API envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<(T, Option<ResultInfo>)> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::transient(PROVIDER, format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status(status.as_u16(), what, &body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::permanent(PROVIDER, format!("Failed to parse {} response: {}", what, e)))?;

        if !envelope.success {
            return Err(Error::permanent(
                PROVIDER,
                format!("{} rejected: {}", what, envelope.error_summary()),
            ));
        }
        let result = envelope
            .result
            .ok_or_else(|| Error::permanent(PROVIDER, format!("{} response has no result", what)))?;
        Ok((result, envelope.result_info))
    }

    fn to_provider_record(&self, api: ApiRecord) -> Option<ProviderRecord> {
        let record_type: RecordType = match api.record_type.parse() {
            Ok(t) => t,
            Err(_) => {
                tracing::trace!(name = %api.name, record_type = %api.record_type, "Skipping unsupported record type");
                return None;
            }
        };
        let data = api.data.unwrap_or_default();

        let content = match record_type {
            RecordType::Srv => data.target.clone().unwrap_or(api.content),
            RecordType::Caa => data.value.clone().unwrap_or(api.content),
            _ => api.content,
        };

        let mut record = DnsRecord::new(PROVIDER, &self.zone, &api.name, record_type, content, api.ttl)
            .with_proxied(api.proxied);
        record.priority = api.priority.or(data.priority);
        record.weight = data.weight;
        record.port = data.port;
        record.flags = data.flags;
        record.tag = data.tag;

        Some(ProviderRecord::new(api.id, record))
    }

    async fn write_record(
        &self,
        request: reqwest::RequestBuilder,
        record: &DnsRecord,
        what: &str,
    ) -> Result<ProviderRecord> {
        let (created, _): (ApiRecord, _) = self.send(request.json(&RecordBody::from(record)), what).await?;
        let id = created.id.clone();
        Ok(self
            .to_provider_record(created)
            .unwrap_or_else(|| ProviderRecord::new(id, record.clone())))
    }
}

/// Map an HTTP error status to the provider error taxonomy
fn map_status(status: u16, what: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::permanent(
            PROVIDER,
            format!(
                "Authentication failed: Invalid API token or insufficient permissions. Status: {}",
                status
            ),
        ),
        404 => Error::not_found(format!("{}: Cloudflare returned 404", what)),
        409 => Error::transient(
            PROVIDER,
            format!("Conflict: Record is being updated by another process. Status: {}", status),
        ),
        429 => Error::transient(
            PROVIDER,
            format!("Rate limit exceeded. Please retry later. Status: {}", status),
        ),
        500..=599 => Error::transient(
            PROVIDER,
            format!("Cloudflare server error (transient): {} - {}", status, body),
        ),
        _ => Error::permanent(PROVIDER, format!("{} failed: {} - {}", what, status, body)),
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn zone(&self) -> &str {
        &self.zone
    }

    fn default_ttl(&self) -> u32 {
        AUTO_TTL
    }

    fn supports_proxied(&self, record_type: RecordType) -> bool {
        matches!(record_type, RecordType::A | RecordType::Aaaa | RecordType::Cname)
    }

    fn normalize(&self, record: &mut DnsRecord) {
        if !self.supports_proxied(record.record_type) {
            record.proxied = false;
        }
        if record.proxied {
            record.ttl = AUTO_TTL;
        }
    }

    async fn list_records(&self) -> Result<Vec<ProviderRecord>> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let request = self
                .client
                .get(&url)
                .query(&[("page", page), ("per_page", PAGE_SIZE)]);
            let (batch, info): (Vec<ApiRecord>, _) = self.send(request, "record listing").await?;
            records.extend(batch.into_iter().filter_map(|r| self.to_provider_record(r)));

            match info {
                Some(info) if info.page < info.total_pages => page = info.page + 1,
                _ => break,
            }
        }

        tracing::debug!(zone = %self.zone, count = records.len(), "Listed Cloudflare records");
        Ok(records)
    }

    async fn create_record(&self, record: &DnsRecord) -> Result<ProviderRecord> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let created = self
            .write_record(self.client.post(&url), record, "record creation")
            .await?;
        tracing::info!(hostname = %record.hostname, record_type = %record.record_type, id = %created.id, "Cloudflare record created");
        Ok(created)
    }

    async fn update_record(&self, id: &str, record: &DnsRecord) -> Result<ProviderRecord> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, id);
        let updated = self
            .write_record(self.client.put(&url), record, "record update")
            .await?;
        tracing::info!(hostname = %record.hostname, record_type = %record.record_type, id, "Cloudflare record updated");
        Ok(updated)
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let zone_id = self.zone_id().await?;
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, id);
        let _: (serde_json::Value, _) = self.send(self.client.delete(&url), "record deletion").await?;
        tracing::info!(id, "Cloudflare record deleted");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

impl<T> Envelope<T> {
    fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "no error details".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("[{}] {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ApiZone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    #[serde(default)]
    content: String,
    ttl: u32,
    #[serde(default)]
    proxied: bool,
    priority: Option<u16>,
    data: Option<ApiRecordData>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ApiRecordData {
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

/// Request body for create and update
#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    ttl: u32,
    proxied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<ApiRecordData>,
}

impl<'a> From<&'a DnsRecord> for RecordBody<'a> {
    fn from(record: &'a DnsRecord) -> Self {
        let data = match record.record_type {
            RecordType::Srv => Some(ApiRecordData {
                priority: record.priority,
                weight: record.weight,
                port: record.port,
                target: Some(record.content.clone()),
                ..ApiRecordData::default()
            }),
            RecordType::Caa => Some(ApiRecordData {
                flags: Some(record.flags.unwrap_or(0)),
                tag: record.tag.clone(),
                value: Some(record.content.clone()),
                ..ApiRecordData::default()
            }),
            _ => None,
        };

        Self {
            record_type: record.record_type.as_str(),
            name: &record.hostname,
            content: data.is_none().then_some(record.content.as_str()),
            ttl: record.ttl,
            proxied: record.proxied,
            priority: match record.record_type {
                RecordType::Mx => record.priority,
                _ => None,
            },
            data,
        }
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            ProviderConfig::Cloudflare {
                api_token,
                zone,
                zone_id,
            } => {
                if api_token.is_empty() {
                    return Err(Error::config("Cloudflare API token is required"));
                }
                Ok(Box::new(CloudflareProvider::new(
                    api_token.clone(),
                    zone,
                    zone_id.clone(),
                )?))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use dnsync_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// dnsync_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &dnsync_core::ProviderRegistry) {
    registry.register_provider("cloudflare", Box::new(CloudflareFactory));
}
