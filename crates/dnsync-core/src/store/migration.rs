//! One-time import of legacy state
//!
//! Older deployments kept tracked records in a `dns-records.json` at the
//! configuration root and declared preserved and managed hostnames through
//! environment variables:
//!
//! - `PRESERVED_HOSTNAMES`: comma-separated hostnames
//! - `MANAGED_HOSTNAMES`: comma-separated `hostname:type:content:ttl:proxied`
//!
//! The import runs once; completion is recorded in `config.json` as
//! `legacyMigrationCompleted`. Entries already present are never duplicated.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::record::{DnsRecord, ManagedHostname, RecordKey, TrackedRecord, normalize_hostname};
use crate::store::{DurableStore, Schema};

/// Where legacy state is read from
#[derive(Debug, Clone, Default)]
pub struct LegacySources {
    /// Root-level `dns-records.json`, if any
    pub records_file: Option<PathBuf>,
    /// Raw `PRESERVED_HOSTNAMES` value
    pub preserved: Option<String>,
    /// Raw `MANAGED_HOSTNAMES` value
    pub managed: Option<String>,
}

impl LegacySources {
    /// Legacy sources for a store in `data_dir`: the records file one
    /// directory up, the hostnames from the given variable lookup
    pub fn from_lookup<F>(data_dir: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            records_file: data_dir.parent().map(|root| root.join("dns-records.json")),
            preserved: lookup("PRESERVED_HOSTNAMES"),
            managed: lookup("MANAGED_HOSTNAMES"),
        }
    }
}

/// What a migration run imported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Migration had already completed earlier
    pub skipped: bool,
    pub records: usize,
    pub preserved: usize,
    pub managed: usize,
}

/// Import legacy state into `store` unless that already happened
pub async fn migrate_legacy(store: &DurableStore, sources: &LegacySources) -> Result<MigrationReport> {
    let runtime: RuntimeConfig = store.read_as(Schema::Config).await?;
    if runtime.legacy_migration_completed {
        return Ok(MigrationReport {
            skipped: true,
            ..MigrationReport::default()
        });
    }

    let mut report = MigrationReport::default();

    if let Some(path) = &sources.records_file
        && path.parent() != Some(store.dir())
    {
        let legacy = read_legacy_records(path).await;
        if !legacy.is_empty() {
            report.records = store
                .modify(Schema::Records, |records: &mut Vec<TrackedRecord>| {
                    let mut keys: HashSet<RecordKey> = records.iter().map(|r| r.key()).collect();
                    let before = records.len();
                    for record in legacy {
                        if keys.insert(record.key()) {
                            records.push(record);
                        }
                    }
                    Ok(records.len() - before)
                })
                .await?;
        }
    }

    if let Some(raw) = &sources.preserved {
        let hostnames: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(normalize_hostname)
            .collect();
        report.preserved = store
            .modify(Schema::PreservedHostnames, |list: &mut Vec<String>| {
                let before = list.len();
                for hostname in hostnames {
                    if !list.contains(&hostname) {
                        list.push(hostname);
                    }
                }
                Ok(list.len() - before)
            })
            .await?;
    }

    if let Some(raw) = &sources.managed {
        let mut parsed = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match ManagedHostname::parse_tuple(entry) {
                Ok(managed) => parsed.push(managed),
                Err(e) => warn!(entry, error = %e, "Skipping invalid MANAGED_HOSTNAMES entry"),
            }
        }
        report.managed = store
            .modify(Schema::ManagedHostnames, |list: &mut Vec<ManagedHostname>| {
                let before = list.len();
                for managed in parsed {
                    let exists = list
                        .iter()
                        .any(|m| m.hostname == managed.hostname && m.record_type == managed.record_type);
                    if !exists {
                        list.push(managed);
                    }
                }
                Ok(list.len() - before)
            })
            .await?;
    }

    store
        .modify(Schema::Config, |config: &mut RuntimeConfig| {
            config.legacy_migration_completed = true;
            Ok(())
        })
        .await?;

    info!(
        records = report.records,
        preserved = report.preserved,
        managed = report.managed,
        "Legacy migration complete"
    );
    Ok(report)
}

/// Read a legacy records file: an array of records or an object keyed by
/// identity key. Unreadable files and malformed entries are skipped.
async fn read_legacy_records(path: &Path) -> Vec<TrackedRecord> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read legacy records file");
            return Vec::new();
        }
    };
    let value: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Legacy records file is not valid JSON");
            return Vec::new();
        }
    };

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        _ => Vec::new(),
    };

    let now = Utc::now();
    items
        .into_iter()
        .filter_map(|item| {
            let parsed = serde_json::from_value::<TrackedRecord>(item.clone()).or_else(|_| {
                serde_json::from_value::<DnsRecord>(item)
                    .map(|record| TrackedRecord::new(record, None, None, now))
            });
            match parsed {
                Ok(tracked) if tracked.record.validate().is_ok() => Some(tracked),
                _ => {
                    warn!(path = %path.display(), "Skipping malformed legacy record");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_migration_runs_once_without_duplicates() {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        std::fs::write(
            root.path().join("dns-records.json"),
            serde_json::to_vec(&json!([{
                "hostname": "legacy.example.com",
                "type": "A",
                "content": "1.2.3.4",
                "ttl": 300,
                "provider": "cloudflare",
                "zone": "example.com"
            }]))
            .unwrap(),
        )
        .unwrap();

        let store = DurableStore::open(&data_dir).await.unwrap();
        store
            .write(Schema::PreservedHostnames, json!(["keep.example.com"]))
            .await
            .unwrap();

        let sources = LegacySources {
            records_file: Some(root.path().join("dns-records.json")),
            preserved: Some("keep.example.com, *.internal.example.com".into()),
            managed: Some("api.example.com:A:10.0.0.1:120:false,broken".into()),
        };

        let report = migrate_legacy(&store, &sources).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.preserved, 1);
        assert_eq!(report.managed, 1);

        let preserved: Vec<String> = store.read_as(Schema::PreservedHostnames).await.unwrap();
        assert_eq!(preserved, vec!["keep.example.com", "*.internal.example.com"]);

        let again = migrate_legacy(&store, &sources).await.unwrap();
        assert!(again.skipped);
        let records: Vec<TrackedRecord> = store.read_as(Schema::Records).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_sources_still_mark_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::open(dir.path().join("data")).await.unwrap();

        let report = migrate_legacy(&store, &LegacySources::default()).await.unwrap();
        assert!(!report.skipped);

        let runtime: RuntimeConfig = store.read_as(Schema::Config).await.unwrap();
        assert!(runtime.legacy_migration_completed);
    }
}
