// # DigitalOcean DNS Provider
//
// DigitalOcean API v2 implementation of `DnsProvider` for dnsync.
//
// ## Behavior
//
// - Records are addressed relative to the domain; the apex is `@`
// - Hostname targets (CNAME, MX, SRV) are sent with a trailing dot and
//   reported without one
// - Listing follows `links.pages.next` until exhausted
// - TTL below 30 seconds is raised to 30 (API minimum)
// - Status mapping matches the Cloudflare provider: 404 is not-found,
//   429 and 5xx are transient, other 4xx are permanent
//
// ## API Reference
//
// - List: GET `/domains/:domain/records?per_page=..`
// - Create: POST `/domains/:domain/records`
// - Update: PUT `/domains/:domain/records/:id`
// - Delete: DELETE `/domains/:domain/records/:id`

use async_trait::async_trait;
use dnsync_core::config::ProviderConfig;
use dnsync_core::record::{DnsRecord, RecordType, normalize_hostname};
use dnsync_core::traits::{DnsProvider, DnsProviderFactory, ProviderRecord};
use dnsync_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com/v2";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const PAGE_SIZE: u32 = 200;

/// DigitalOcean's default TTL for new records
const DEFAULT_TTL: u32 = 1800;

const MIN_TTL: u32 = 30;

const PROVIDER: &str = "digitalocean";

/// DigitalOcean DNS provider for one domain
pub struct DigitaloceanProvider {
    /// ⚠️ NEVER log this value
    api_token: String,
    domain: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for DigitaloceanProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitaloceanProvider")
            .field("api_token", &"<REDACTED>")
            .field("domain", &self.domain)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl DigitaloceanProvider {
    pub fn new(api_token: impl Into<String>, domain: &str) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("DigitalOcean API token cannot be empty"));
        }
        let domain = normalize_hostname(domain);
        if domain.is_empty() {
            return Err(Error::config("DigitalOcean domain cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            domain,
            api_base: DIGITALOCEAN_API_BASE.to_string(),
            client,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn records_url(&self) -> String {
        format!("{}/domains/{}/records", self.api_base, self.domain)
    }

    /// Name relative to the domain, `@` for the apex
    fn relative_name(&self, hostname: &str) -> String {
        if hostname == self.domain {
            return "@".to_string();
        }
        hostname
            .strip_suffix(&format!(".{}", self.domain))
            .unwrap_or(hostname)
            .to_string()
    }

    fn absolute_name(&self, name: &str) -> String {
        match name {
            "@" | "" => self.domain.clone(),
            name => format!("{}.{}", name, self.domain),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::transient(PROVIDER, format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| format!("{} ({})", e.message, e.id))
            .unwrap_or(body);
        Err(map_status(status.as_u16(), what, &message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        self.send(request, what)
            .await?
            .json()
            .await
            .map_err(|e| Error::permanent(PROVIDER, format!("Failed to parse {} response: {}", what, e)))
    }

    fn to_provider_record(&self, api: ApiRecord) -> Option<ProviderRecord> {
        let record_type: RecordType = api.record_type.parse().ok()?;
        let content = match record_type {
            RecordType::Cname | RecordType::Mx | RecordType::Srv => {
                match api.data.as_str() {
                    "@" => self.domain.clone(),
                    data => data.trim_end_matches('.').to_string(),
                }
            }
            _ => api.data,
        };

        let mut record = DnsRecord::new(
            PROVIDER,
            &self.domain,
            &self.absolute_name(&api.name),
            record_type,
            content,
            api.ttl,
        );
        record.priority = api.priority;
        record.weight = api.weight;
        record.port = api.port;
        record.flags = api.flags;
        record.tag = api.tag;

        Some(ProviderRecord::new(api.id.to_string(), record))
    }

    fn body<'a>(&self, record: &'a DnsRecord) -> RecordBody<'a> {
        let data = match record.record_type {
            RecordType::Cname | RecordType::Mx | RecordType::Srv => {
                format!("{}.", record.content.trim_end_matches('.'))
            }
            _ => record.content.clone(),
        };

        RecordBody {
            record_type: record.record_type.as_str(),
            name: self.relative_name(&record.hostname),
            data,
            ttl: record.ttl,
            priority: record.priority,
            port: record.port,
            weight: record.weight,
            flags: record.flags,
            tag: record.tag.as_deref(),
        }
    }

    fn returned(&self, envelope: SingleRecord, sent: &DnsRecord) -> ProviderRecord {
        let id = envelope.domain_record.id.to_string();
        self.to_provider_record(envelope.domain_record)
            .unwrap_or_else(|| ProviderRecord::new(id, sent.clone()))
    }
}

fn map_status(status: u16, what: &str, message: &str) -> Error {
    match status {
        401 | 403 => Error::permanent(
            PROVIDER,
            format!("Authentication failed: Invalid API token. Status: {}", status),
        ),
        404 => Error::not_found(format!("{}: {}", what, message)),
        429 => Error::transient(PROVIDER, format!("Rate limit exceeded. Status: {}", status)),
        500..=599 => Error::transient(
            PROVIDER,
            format!("DigitalOcean server error (transient): {} - {}", status, message),
        ),
        _ => Error::permanent(PROVIDER, format!("{} failed: {} - {}", what, status, message)),
    }
}

#[async_trait]
impl DnsProvider for DigitaloceanProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn zone(&self) -> &str {
        &self.domain
    }

    fn default_ttl(&self) -> u32 {
        DEFAULT_TTL
    }

    fn normalize(&self, record: &mut DnsRecord) {
        record.proxied = false;
        record.ttl = record.ttl.max(MIN_TTL);
    }

    async fn list_records(&self) -> Result<Vec<ProviderRecord>> {
        let mut records = Vec::new();
        let mut next = Some(self.records_url());
        let mut first = true;

        while let Some(url) = next {
            let mut request = self.client.get(&url);
            if first {
                request = request.query(&[("per_page", PAGE_SIZE)]);
                first = false;
            }
            let page: RecordPage = self.send_json(request, "record listing").await?;
            records.extend(
                page.domain_records
                    .into_iter()
                    .filter_map(|r| self.to_provider_record(r)),
            );
            next = page.links.and_then(|l| l.pages).and_then(|p| p.next);
        }

        tracing::debug!(domain = %self.domain, count = records.len(), "Listed DigitalOcean records");
        Ok(records)
    }

    async fn create_record(&self, record: &DnsRecord) -> Result<ProviderRecord> {
        let request = self.client.post(self.records_url()).json(&self.body(record));
        let created: SingleRecord = self.send_json(request, "record creation").await?;
        let created = self.returned(created, record);
        tracing::info!(hostname = %record.hostname, record_type = %record.record_type, id = %created.id, "DigitalOcean record created");
        Ok(created)
    }

    async fn update_record(&self, id: &str, record: &DnsRecord) -> Result<ProviderRecord> {
        let url = format!("{}/{}", self.records_url(), id);
        let request = self.client.put(&url).json(&self.body(record));
        let updated: SingleRecord = self.send_json(request, "record update").await?;
        tracing::info!(hostname = %record.hostname, record_type = %record.record_type, id, "DigitalOcean record updated");
        Ok(self.returned(updated, record))
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}", self.records_url(), id);
        self.send(self.client.delete(&url), "record deletion").await?;
        tracing::info!(id, "DigitalOcean record deleted");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    id: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    domain_records: Vec<ApiRecord>,
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    pages: Option<Pages>,
}

#[derive(Debug, Deserialize)]
struct Pages {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SingleRecord {
    domain_record: ApiRecord,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: u64,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    #[serde(default)]
    data: String,
    ttl: u32,
    priority: Option<u16>,
    port: Option<u16>,
    weight: Option<u16>,
    flags: Option<u8>,
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: String,
    data: String,
    ttl: u32,
    priority: Option<u16>,
    port: Option<u16>,
    weight: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

/// Factory for creating DigitalOcean providers
pub struct DigitaloceanFactory;

impl DnsProviderFactory for DigitaloceanFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            ProviderConfig::Digitalocean { api_token, domain } => {
                Ok(Box::new(DigitaloceanProvider::new(api_token.clone(), domain)?))
            }
            _ => Err(Error::config("Invalid config for DigitalOcean provider")),
        }
    }
}

/// Register the DigitalOcean provider with a registry
pub fn register(registry: &dnsync_core::ProviderRegistry) {
    registry.register_provider("digitalocean", Box::new(DigitaloceanFactory));
}
