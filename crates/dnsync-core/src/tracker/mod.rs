//! Record Tracker
//!
//! Durable registry of the records this system owns, plus the operator's
//! preserved and managed hostname lists. Each mutating call is one
//! transaction against the [`DurableStore`]; a failed call leaves durable
//! state untouched and returns the error.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::{
    DnsRecord, ManagedBy, ManagedHostname, RecordKey, RecordType, TrackedRecord,
    normalize_hostname,
};
use crate::store::{DurableStore, Schema};

/// Whether preserved entry `pattern` covers `hostname`.
///
/// `*.example.com` covers every name below `example.com` but not the apex.
pub fn preserved_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = normalize_hostname(pattern);
    let hostname = normalize_hostname(hostname);
    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname.ends_with(&format!(".{}", suffix)),
        None => pattern == hostname,
    }
}

#[derive(Debug, Clone)]
pub struct RecordTracker {
    store: Arc<DurableStore>,
}

impl RecordTracker {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// Every tracked record
    pub async fn get_tracked(&self) -> Result<Vec<TrackedRecord>> {
        self.store.read_as(Schema::Records).await
    }

    pub async fn get(&self, key: &RecordKey) -> Result<Option<TrackedRecord>> {
        Ok(self
            .get_tracked()
            .await?
            .into_iter()
            .find(|r| &r.key() == key))
    }

    pub async fn is_tracked(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Track `record` as of now
    pub async fn track(
        &self,
        record: DnsRecord,
        provider_id: Option<String>,
        source_container_id: Option<String>,
    ) -> Result<TrackedRecord> {
        self.track_at(record, provider_id, source_container_id, Utc::now())
            .await
    }

    /// Insert or refresh the tracked entry for `record`.
    ///
    /// An existing entry keeps its `createdAt` and ownership marker, takes
    /// the new record data and is un-orphaned.
    pub async fn track_at(
        &self,
        record: DnsRecord,
        provider_id: Option<String>,
        source_container_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TrackedRecord> {
        let key = record.key();
        self.store
            .modify(Schema::Records, |records: &mut Vec<TrackedRecord>| {
                if let Some(existing) = records.iter_mut().find(|r| r.key() == key) {
                    existing.record = record;
                    existing.updated_at = now;
                    existing.orphaned_at = None;
                    if provider_id.is_some() {
                        existing.provider_id = provider_id;
                    }
                    if source_container_id.is_some() {
                        existing.source_container_id = source_container_id;
                    }
                    return Ok(existing.clone());
                }
                let tracked = TrackedRecord::new(record, provider_id, source_container_id, now);
                records.push(tracked.clone());
                Ok(tracked)
            })
            .await
    }

    /// Stop tracking `key`. Returns whether it was tracked.
    pub async fn untrack(&self, key: &RecordKey) -> Result<bool> {
        let removed = self
            .store
            .modify(Schema::Records, |records: &mut Vec<TrackedRecord>| {
                let before = records.len();
                records.retain(|r| &r.key() != key);
                Ok(records.len() != before)
            })
            .await?;
        if removed {
            debug!(key = %key, "Record untracked");
        }
        Ok(removed)
    }

    /// Stamp `orphanedAt = now` on every listed record not yet orphaned
    pub async fn mark_orphaned(&self, keys: &[RecordKey], now: DateTime<Utc>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys: HashSet<&RecordKey> = keys.iter().collect();
        self.store
            .modify(Schema::Records, |records: &mut Vec<TrackedRecord>| {
                let mut marked = 0;
                for record in records.iter_mut() {
                    if record.orphaned_at.is_none() && keys.contains(&record.key()) {
                        record.orphaned_at = Some(now);
                        marked += 1;
                    }
                }
                Ok(marked)
            })
            .await
    }

    /// Clear the orphan timestamp of every listed record
    pub async fn clear_orphaned(&self, keys: &[RecordKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys: HashSet<&RecordKey> = keys.iter().collect();
        self.store
            .modify(Schema::Records, |records: &mut Vec<TrackedRecord>| {
                let mut cleared = 0;
                for record in records.iter_mut() {
                    if record.orphaned_at.is_some() && keys.contains(&record.key()) {
                        record.orphaned_at = None;
                        cleared += 1;
                    }
                }
                Ok(cleared)
            })
            .await
    }

    /// Change the ownership marker of a tracked record
    pub async fn set_managed_by(&self, key: &RecordKey, managed_by: ManagedBy) -> Result<()> {
        self.store
            .modify(Schema::Records, |records: &mut Vec<TrackedRecord>| {
                let record = records
                    .iter_mut()
                    .find(|r| &r.key() == key)
                    .ok_or_else(|| Error::not_found(key.to_string()))?;
                record.managed_by = managed_by;
                Ok(())
            })
            .await
    }

    pub async fn list_preserved(&self) -> Result<Vec<String>> {
        self.store.read_as(Schema::PreservedHostnames).await
    }

    /// Add a preserved hostname (or `*.` wildcard). Returns whether it was new.
    pub async fn add_preserved(&self, hostname: &str) -> Result<bool> {
        let hostname = normalize_hostname(hostname);
        if hostname.is_empty() {
            return Err(Error::validation("Preserved hostname cannot be empty"));
        }
        let added = self
            .store
            .modify(Schema::PreservedHostnames, |list: &mut Vec<String>| {
                if list.contains(&hostname) {
                    return Ok(false);
                }
                list.push(hostname.clone());
                Ok(true)
            })
            .await?;
        if added {
            info!(hostname = %hostname, "Hostname preserved");
        }
        Ok(added)
    }

    pub async fn remove_preserved(&self, hostname: &str) -> Result<bool> {
        let hostname = normalize_hostname(hostname);
        self.store
            .modify(Schema::PreservedHostnames, |list: &mut Vec<String>| {
                let before = list.len();
                list.retain(|h| h != &hostname);
                Ok(list.len() != before)
            })
            .await
    }

    /// Whether `hostname` is exempt from automatic cleanup
    pub async fn is_preserved(&self, hostname: &str) -> Result<bool> {
        Ok(self
            .list_preserved()
            .await?
            .iter()
            .any(|pattern| preserved_matches(pattern, hostname)))
    }

    pub async fn list_managed(&self) -> Result<Vec<ManagedHostname>> {
        self.store.read_as(Schema::ManagedHostnames).await
    }

    /// Add or replace the managed entry for the same hostname and type
    pub async fn add_managed(&self, managed: ManagedHostname) -> Result<()> {
        let mut managed = managed;
        managed.hostname = normalize_hostname(&managed.hostname);
        let hostname = managed.hostname.clone();
        self.store
            .modify(Schema::ManagedHostnames, |list: &mut Vec<ManagedHostname>| {
                list.retain(|m| !(m.hostname == managed.hostname && m.record_type == managed.record_type));
                list.push(managed);
                Ok(())
            })
            .await?;
        info!(hostname = %hostname, "Managed hostname saved");
        Ok(())
    }

    /// Remove managed entries for `hostname`, of one type or all types
    pub async fn remove_managed(&self, hostname: &str, record_type: Option<RecordType>) -> Result<bool> {
        let hostname = normalize_hostname(hostname);
        self.store
            .modify(Schema::ManagedHostnames, |list: &mut Vec<ManagedHostname>| {
                let before = list.len();
                list.retain(|m| {
                    m.hostname != hostname || record_type.is_some_and(|t| t != m.record_type)
                });
                Ok(list.len() != before)
            })
            .await
    }
}
