// # DNS Provider Trait
//
// Normalized interface over a third-party DNS management API.
//
// ## Implementations
//
// - Cloudflare: `dnsync-provider-cloudflare` crate
// - DigitalOcean: `dnsync-provider-digitalocean` crate
//
// Providers speak only [`DnsRecord`] and the two provider error kinds
// (`Error::TransientProvider`, `Error::PermanentProvider`). Zone lookup,
// record id formats and pagination stay inside the implementation.
//
// ## Usage
//
// ```rust,ignore
// use dnsync_core::DnsProvider;
//
// let records = provider.list_records().await?;
// let created = provider.create_record(&record).await?;
// provider.delete_record(&created.id).await?;
// ```

use async_trait::async_trait;

use crate::record::{DnsRecord, RecordType};

/// A record as it exists at the provider, with the provider's id for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    /// Provider-assigned record id
    pub id: String,
    pub record: DnsRecord,
}

impl ProviderRecord {
    pub fn new(id: impl Into<String>, record: DnsRecord) -> Self {
        Self {
            id: id.into(),
            record,
        }
    }
}

/// Trait for DNS provider implementations
///
/// # Trust Level: Untrusted
///
/// Providers perform HTTP calls to their own endpoints and nothing else.
/// They must not:
/// - spawn tasks or retry (the next reconciliation cycle is the retry)
/// - cache records (owned by `ProviderClient`)
/// - touch the durable store or decide whether a change is needed
///
/// Errors must be classified: network failures, timeouts, rate limits and
/// 5xx are `Error::transient`, everything the provider rejects is
/// `Error::permanent`.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Provider name used in record identity keys (e.g., "cloudflare")
    fn provider_name(&self) -> &'static str;

    /// Zone (domain) this provider instance manages
    fn zone(&self) -> &str;

    /// TTL applied when a desired entry omits one
    fn default_ttl(&self) -> u32 {
        300
    }

    /// Whether the provider has a proxy flag for this record type
    fn supports_proxied(&self, _record_type: RecordType) -> bool {
        false
    }

    /// Adjust a desired record to the shape the provider will report back.
    ///
    /// Called before diffing so provider-imposed values never count as drift.
    fn normalize(&self, record: &mut DnsRecord) {
        if !self.supports_proxied(record.record_type) {
            record.proxied = false;
        }
    }

    /// List every record in the zone
    async fn list_records(&self) -> Result<Vec<ProviderRecord>, crate::Error>;

    /// Create a record, returning it with its new provider id
    async fn create_record(&self, record: &DnsRecord) -> Result<ProviderRecord, crate::Error>;

    /// Replace the record with id `id`
    async fn update_record(
        &self,
        id: &str,
        record: &DnsRecord,
    ) -> Result<ProviderRecord, crate::Error>;

    /// Delete the record with id `id`
    async fn delete_record(&self, id: &str) -> Result<(), crate::Error>;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider instance from configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
