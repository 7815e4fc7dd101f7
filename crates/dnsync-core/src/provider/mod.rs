//! Cached client over a [`DnsProvider`]
//!
//! The client owns the local view of the zone's records. `list_records`
//! serves the cache until it is older than the configured TTL; successful
//! mutations patch the cache in place so the next listing reflects them
//! without a remote call. Every provider call is bounded by a timeout, and
//! an elapsed timeout surfaces as a transient provider error.

use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{DomainEvent, EventBus};
use crate::record::{DnsRecord, RecordKey, RecordType};
use crate::traits::{DnsProvider, ProviderRecord};

#[derive(Debug, Default)]
struct RecordCache {
    records: Vec<ProviderRecord>,
    last_updated: Option<Instant>,
}

/// Provider access with a record cache and per-call timeout
pub struct ProviderClient {
    provider: Box<dyn DnsProvider>,
    cache: RwLock<RecordCache>,
    cache_ttl: Duration,
    call_timeout: Duration,
    events: EventBus,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider.provider_name())
            .field("zone", &self.provider.zone())
            .field("cache_ttl", &self.cache_ttl)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl ProviderClient {
    pub fn new(
        provider: Box<dyn DnsProvider>,
        cache_ttl: Duration,
        call_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            provider,
            cache: RwLock::new(RecordCache::default()),
            cache_ttl,
            call_timeout,
            events,
        }
    }

    pub fn name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn zone(&self) -> &str {
        self.provider.zone()
    }

    pub fn default_ttl(&self) -> u32 {
        self.provider.default_ttl()
    }

    pub fn supports_proxied(&self, record_type: RecordType) -> bool {
        self.provider.supports_proxied(record_type)
    }

    pub fn normalize(&self, record: &mut DnsRecord) {
        self.provider.normalize(record)
    }

    /// Records in the zone, from cache while it is fresh
    pub async fn list_records(&self) -> Result<Vec<ProviderRecord>> {
        {
            let cache = self.cache.read().await;
            if let Some(updated) = cache.last_updated
                && updated.elapsed() < self.cache_ttl
            {
                return Ok(cache.records.clone());
            }
        }
        self.force_refresh().await
    }

    /// Reload the cache from the provider
    pub async fn force_refresh(&self) -> Result<Vec<ProviderRecord>> {
        let records = self.call("list", self.provider.list_records()).await?;

        let mut cache = self.cache.write().await;
        cache.records = records.clone();
        cache.last_updated = Some(Instant::now());
        drop(cache);

        debug!(provider = self.name(), count = records.len(), "Record cache refreshed");
        self.events.emit(DomainEvent::RecordsRefreshed {
            count: records.len(),
        });
        Ok(records)
    }

    /// When the cache was last loaded from the provider
    pub async fn last_updated(&self) -> Option<Instant> {
        self.cache.read().await.last_updated
    }

    /// Drop the cache so the next listing goes to the provider
    pub async fn invalidate(&self) {
        self.cache.write().await.last_updated = None;
    }

    /// Provider record with identity `key`, if present
    pub async fn find(&self, key: &RecordKey) -> Result<Option<ProviderRecord>> {
        Ok(self
            .list_records()
            .await?
            .into_iter()
            .find(|r| &r.record.key() == key))
    }

    pub async fn create_record(&self, record: &DnsRecord) -> Result<ProviderRecord> {
        self.check(record)?;
        let created = self.call("create", self.provider.create_record(record)).await?;

        let mut cache = self.cache.write().await;
        let key = created.record.key();
        cache.records.retain(|r| r.id != created.id && r.record.key() != key);
        cache.records.push(created.clone());
        drop(cache);

        info!(provider = self.name(), hostname = %record.hostname, record_type = %record.record_type, id = %created.id, "Record created");
        Ok(created)
    }

    pub async fn update_record(&self, id: &str, record: &DnsRecord) -> Result<ProviderRecord> {
        self.check(record)?;
        let updated = self.call("update", self.provider.update_record(id, record)).await?;

        let mut cache = self.cache.write().await;
        cache.records.retain(|r| r.id != id && r.id != updated.id);
        cache.records.push(updated.clone());
        drop(cache);

        info!(provider = self.name(), hostname = %record.hostname, record_type = %record.record_type, id = %updated.id, "Record updated");
        Ok(updated)
    }

    /// Delete a record. A record already gone at the provider counts as deleted.
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        match self.call("delete", self.provider.delete_record(id)).await {
            Ok(()) => {}
            Err(Error::NotFound(msg)) => {
                debug!(provider = self.name(), id, message = %msg, "Record already absent at provider");
            }
            Err(e) => return Err(e),
        }

        self.cache.write().await.records.retain(|r| r.id != id);
        info!(provider = self.name(), id, "Record deleted");
        Ok(())
    }

    fn check(&self, record: &DnsRecord) -> Result<()> {
        record
            .validate()
            .map_err(|e| Error::permanent(self.name(), e.to_string()))
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::transient(
                self.name(),
                format!(
                    "{} timed out after {} ms",
                    operation,
                    self.call_timeout.as_millis()
                ),
            )),
        }
    }
}
