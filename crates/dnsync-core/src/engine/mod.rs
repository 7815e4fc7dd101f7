//! Reconciliation engine
//!
//! One call to [`ReconciliationEngine::reconcile`] is one cycle:
//!
//! ```text
//!  desired entries ──┐
//!  managed entries ──┴─> resolve defaults ─> diff against provider ─┬─> create / update
//!                                              (tracked keys only)   ├─> mark / clear orphans
//!                                                                    └─> delete eligible orphans
//! ```
//!
//! ## Invariants
//!
//! - Only tracked records are updated or deleted. An untracked provider
//!   record identical to a desired entry is adopted; one that differs is
//!   reported and left alone.
//! - A failure on one record is logged and counted, never aborting the
//!   rest of the cycle. The cycle always ends with a [`CycleSummary`].
//! - Orphans are deleted only with cleanup enabled, after the grace
//!   period, when neither preserved nor marked `external`.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{RecordDefaults, Settings};
use crate::error::{Error, Result};
use crate::events::{CycleSummary, DomainEvent, EventBus};
use crate::provider::ProviderClient;
use crate::record::{
    DesiredEntry, DnsRecord, ManagedBy, OrphanState, RecordKey, RecordType, TrackedRecord,
    hostname_in_zone, normalize_hostname,
};
use crate::tracker::{RecordTracker, preserved_matches};
use crate::traits::ProviderRecord;

/// When orphaned records may be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanPolicy {
    pub cleanup_orphaned: bool,
    pub grace_period: Duration,
}

impl OrphanPolicy {
    pub fn new(cleanup_orphaned: bool, grace_period_secs: u64) -> Self {
        Self {
            cleanup_orphaned,
            grace_period: Duration::seconds(grace_period_secs as i64),
        }
    }
}

/// A resolved desired record and the container that asked for it
#[derive(Debug, Clone)]
struct Desired {
    record: DnsRecord,
    source_container_id: Option<String>,
}

/// Applies desired state to the provider and keeps the tracker in step
pub struct ReconciliationEngine {
    provider: Arc<ProviderClient>,
    tracker: Arc<RecordTracker>,
    events: EventBus,
    defaults: RecordDefaults,
    policy: RwLock<OrphanPolicy>,
}

impl ReconciliationEngine {
    pub fn new(
        provider: Arc<ProviderClient>,
        tracker: Arc<RecordTracker>,
        events: EventBus,
        defaults: RecordDefaults,
        policy: OrphanPolicy,
    ) -> Self {
        Self {
            provider,
            tracker,
            events,
            defaults,
            policy: RwLock::new(policy),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        provider: Arc<ProviderClient>,
        tracker: Arc<RecordTracker>,
        events: EventBus,
    ) -> Self {
        Self::new(
            provider,
            tracker,
            events,
            settings.defaults.clone(),
            OrphanPolicy::new(settings.cleanup_orphaned, settings.cleanup_grace_period),
        )
    }

    pub fn provider(&self) -> &Arc<ProviderClient> {
        &self.provider
    }

    pub fn tracker(&self) -> &Arc<RecordTracker> {
        &self.tracker
    }

    pub fn policy(&self) -> OrphanPolicy {
        *self.policy.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change cleanup settings; applies from the next cycle
    pub fn set_policy(&self, policy: OrphanPolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Run one reconciliation cycle now
    pub async fn reconcile(&self, desired: Vec<DesiredEntry>) -> CycleSummary {
        self.reconcile_at(desired, Utc::now()).await
    }

    /// Run one reconciliation cycle with `now` as the cycle timestamp
    pub async fn reconcile_at(&self, desired: Vec<DesiredEntry>, now: DateTime<Utc>) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let orphans_before = self.orphan_keys().await;
        let desired = self.collect_desired(desired, &mut summary).await;
        let desired_keys: HashSet<RecordKey> = desired.iter().map(|d| d.record.key()).collect();

        let actual = match self.provider.list_records().await {
            Ok(records) => records,
            Err(e) => {
                error!(provider = self.provider.name(), error = %e, "Cannot list provider records, skipping cycle");
                summary.errors += 1;
                return self.finish(summary, orphans_before, now).await;
            }
        };
        let actual = index_by_key(actual);

        let tracked = match self.tracked_in_zone().await {
            Ok(tracked) => tracked,
            Err(e) => {
                error!(error = %e, "Cannot read tracked records, skipping cycle");
                summary.errors += 1;
                return self.finish(summary, orphans_before, now).await;
            }
        };
        let tracked: HashMap<RecordKey, TrackedRecord> =
            tracked.into_iter().map(|t| (t.key(), t)).collect();

        let mut reappeared = Vec::new();
        for entry in &desired {
            let key = entry.record.key();
            let tracked_entry = tracked.get(&key);
            if tracked_entry.is_some_and(TrackedRecord::is_orphaned) {
                reappeared.push(key.clone());
            }
            self.apply_desired(entry, tracked_entry, actual.get(&key), now, &mut summary)
                .await;
        }
        if let Err(e) = self.tracker.clear_orphaned(&reappeared).await {
            error!(error = %e, "Failed to clear orphan state of reappeared records");
            summary.errors += 1;
        }

        self.process_orphans(&tracked, &desired_keys, &actual, now, &mut summary)
            .await;

        self.finish(summary, orphans_before, now).await
    }

    /// Resolve an entry against the defaults and the provider's zone.
    ///
    /// `Ok(None)` means the hostname is outside the zone and is skipped.
    pub fn resolve(&self, entry: &DesiredEntry) -> Result<Option<DnsRecord>> {
        let zone = normalize_hostname(self.provider.zone());
        let hostname = normalize_hostname(&entry.hostname);
        if hostname.is_empty() {
            return Err(Error::validation("Desired entry has an empty hostname"));
        }
        if !hostname_in_zone(&hostname, &zone) {
            warn!(hostname = %hostname, zone = %zone, "Hostname outside the provider zone, skipping");
            return Ok(None);
        }

        let explicit_content = entry
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let mut record_type = entry.record_type.unwrap_or(self.defaults.record_type);

        if record_type == RecordType::Cname
            && hostname == zone
            && explicit_content.is_none()
            && self.defaults.public_ipv4.is_some()
        {
            debug!(hostname = %hostname, "Apex CNAME converted to A record");
            record_type = RecordType::A;
        }

        let content = match explicit_content {
            Some(content) => content.to_string(),
            None => self.default_content(record_type, &zone, &hostname)?,
        };
        if record_type == RecordType::Cname && normalize_hostname(&content) == hostname {
            return Err(Error::validation(format!(
                "CNAME {} would point at itself; set content or PUBLIC_IP",
                hostname
            )));
        }

        let ttl = entry
            .ttl
            .or(self.defaults.ttl)
            .unwrap_or_else(|| self.provider.default_ttl());
        let proxied = self.provider.supports_proxied(record_type)
            && entry.proxied.unwrap_or(self.defaults.proxied);

        let mut record = DnsRecord::new(self.provider.name(), &zone, &hostname, record_type, content, ttl)
            .with_proxied(proxied);
        record.priority = entry.priority;
        record.weight = entry.weight;
        record.port = entry.port;
        record.flags = entry.flags;
        record.tag = entry.tag.clone();

        self.provider.normalize(&mut record);
        record.validate()?;
        Ok(Some(record))
    }

    /// Delete one tracked record now, ignoring grace period and preservation
    pub async fn force_delete(&self, key: &RecordKey) -> Result<()> {
        let tracked = self
            .tracker
            .get(key)
            .await?
            .ok_or_else(|| Error::not_found(format!("No tracked record {}", key)))?;

        let orphans_before = self.orphan_keys().await;
        match self.provider.find(key).await? {
            Some(existing) => {
                self.provider.delete_record(&existing.id).await?;
                self.tracker.untrack(key).await?;
                info!(key = %key, "Record force-deleted");
                self.events.emit(DomainEvent::RecordDeleted {
                    record: tracked.record,
                });
            }
            None => {
                self.tracker.untrack(key).await?;
                warn!(key = %key, "Record already absent at provider, untracked");
            }
        }

        self.emit_orphans_if_changed(orphans_before, Utc::now()).await;
        Ok(())
    }

    /// Delete every eligible orphan now, ignoring the grace period.
    ///
    /// Preserved hostnames and `external` records are still kept.
    pub async fn cleanup_orphans_now(&self) -> Result<CycleSummary> {
        let now = Utc::now();
        let mut summary = CycleSummary::default();
        let orphans_before = self.orphan_keys().await;

        let actual = index_by_key(self.provider.list_records().await?);
        let preserved = self.tracker.list_preserved().await?;

        for tracked in self.tracked_in_zone().await? {
            if !tracked.is_orphaned() || !self.is_deletable(&tracked, &preserved) {
                continue;
            }
            self.delete_orphan(&tracked, actual.get(&tracked.key()), &mut summary)
                .await;
        }

        let orphans = self.emit_orphans_if_changed(orphans_before, now).await;
        summary.orphaned = orphans;
        info!(deleted = summary.deleted, errors = summary.errors, "Forced orphan cleanup finished");
        Ok(summary)
    }

    /// Tracked records of this provider and zone currently pending cleanup
    pub async fn orphans(&self) -> Result<Vec<OrphanState>> {
        self.orphans_at(Utc::now()).await
    }

    pub async fn orphans_at(&self, now: DateTime<Utc>) -> Result<Vec<OrphanState>> {
        Ok(self
            .tracked_in_zone()
            .await?
            .iter()
            .filter_map(|t| t.orphan_state(now))
            .collect())
    }

    fn default_content(&self, record_type: RecordType, zone: &str, hostname: &str) -> Result<String> {
        let missing = |what: &str| {
            Error::validation(format!(
                "{} record {} has no content and no {} is configured",
                record_type, hostname, what
            ))
        };
        match record_type {
            RecordType::A => self
                .defaults
                .public_ipv4
                .map(|ip| ip.to_string())
                .ok_or_else(|| missing("PUBLIC_IP")),
            RecordType::Aaaa => self
                .defaults
                .public_ipv6
                .map(|ip| ip.to_string())
                .ok_or_else(|| missing("PUBLIC_IPV6")),
            RecordType::Cname => Ok(self
                .defaults
                .content
                .clone()
                .unwrap_or_else(|| zone.to_string())),
            _ => self
                .defaults
                .content
                .clone()
                .ok_or_else(|| missing("DNS_DEFAULT_CONTENT")),
        }
    }

    async fn collect_desired(&self, entries: Vec<DesiredEntry>, summary: &mut CycleSummary) -> Vec<Desired> {
        let managed = match self.tracker.list_managed().await {
            Ok(managed) => managed,
            Err(e) => {
                error!(error = %e, "Cannot read managed hostnames");
                summary.errors += 1;
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut desired = Vec::new();
        for entry in entries.into_iter().chain(managed.iter().map(|m| m.to_desired())) {
            let record = match self.resolve(&entry) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    error!(hostname = %entry.hostname, error = %e, "Invalid desired entry");
                    summary.errors += 1;
                    continue;
                }
            };
            if !seen.insert(record.key()) {
                debug!(key = %record.key(), "Duplicate desired entry dropped");
                continue;
            }
            desired.push(Desired {
                record,
                source_container_id: entry.source_container_id,
            });
        }
        desired
    }

    async fn apply_desired(
        &self,
        entry: &Desired,
        tracked: Option<&TrackedRecord>,
        existing: Option<&ProviderRecord>,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) {
        let record = &entry.record;
        let compare_proxied = self.provider.supports_proxied(record.record_type);

        let Some(existing) = existing else {
            match self.provider.create_record(record).await {
                Ok(created) => {
                    summary.created += 1;
                    self.record_tracked(entry, Some(created.id), now, summary).await;
                    self.events.emit(DomainEvent::RecordCreated {
                        record: record.clone(),
                    });
                }
                Err(e) => log_provider_failure("create", record, &e, summary),
            }
            return;
        };

        if existing.record.same_data(record, compare_proxied) {
            summary.up_to_date += 1;
            match tracked {
                None => {
                    info!(hostname = %record.hostname, record_type = %record.record_type, "Adopting identical untracked record");
                    self.record_tracked(entry, Some(existing.id.clone()), now, summary).await;
                }
                Some(t) if t.provider_id.as_deref() != Some(existing.id.as_str()) => {
                    self.record_tracked(entry, Some(existing.id.clone()), now, summary).await;
                }
                Some(_) => {}
            }
            return;
        }

        if tracked.is_none() {
            warn!(
                hostname = %record.hostname,
                record_type = %record.record_type,
                "Untracked record with different data exists at provider, not touching it"
            );
            summary.errors += 1;
            return;
        }

        match self.provider.update_record(&existing.id, record).await {
            Ok(updated) => {
                summary.updated += 1;
                self.record_tracked(entry, Some(updated.id), now, summary).await;
                self.events.emit(DomainEvent::RecordUpdated {
                    record: record.clone(),
                    previous: existing.record.clone(),
                });
            }
            Err(e) => log_provider_failure("update", record, &e, summary),
        }
    }

    async fn record_tracked(
        &self,
        entry: &Desired,
        provider_id: Option<String>,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) {
        if let Err(e) = self
            .tracker
            .track_at(
                entry.record.clone(),
                provider_id,
                entry.source_container_id.clone(),
                now,
            )
            .await
        {
            error!(
                hostname = %entry.record.hostname,
                error = %e,
                "Provider change applied but tracking failed; next cycle re-derives it"
            );
            summary.errors += 1;
        }
    }

    async fn process_orphans(
        &self,
        tracked: &HashMap<RecordKey, TrackedRecord>,
        desired_keys: &HashSet<RecordKey>,
        actual: &HashMap<RecordKey, ProviderRecord>,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) {
        let policy = self.policy();
        let preserved = match self.tracker.list_preserved().await {
            Ok(preserved) => preserved,
            Err(e) => {
                error!(error = %e, "Cannot read preserved hostnames, skipping orphan cleanup");
                summary.errors += 1;
                return;
            }
        };

        let mut newly_orphaned = Vec::new();
        let mut orphans: Vec<&TrackedRecord> = tracked
            .values()
            .filter(|t| !desired_keys.contains(&t.key()))
            .collect();
        orphans.sort_by_key(|t| t.key());

        for orphan in orphans {
            let orphaned_at = match orphan.orphaned_at {
                Some(at) => at,
                None => {
                    info!(hostname = %orphan.record.hostname, record_type = %orphan.record.record_type, "Record orphaned");
                    newly_orphaned.push(orphan.key());
                    now
                }
            };

            let elapsed = now.signed_duration_since(orphaned_at);
            if !policy.cleanup_orphaned || elapsed < policy.grace_period {
                continue;
            }
            if !self.is_deletable(orphan, &preserved) {
                debug!(hostname = %orphan.record.hostname, "Orphan kept: preserved or external");
                continue;
            }
            self.delete_orphan(orphan, actual.get(&orphan.key()), summary)
                .await;
        }

        // Entries deleted above are untracked already; marking skips them
        if let Err(e) = self.tracker.mark_orphaned(&newly_orphaned, now).await {
            error!(error = %e, "Failed to persist orphan timestamps");
            summary.errors += 1;
        }
    }

    fn is_deletable(&self, tracked: &TrackedRecord, preserved: &[String]) -> bool {
        tracked.managed_by != ManagedBy::External
            && !preserved
                .iter()
                .any(|p| preserved_matches(p, &tracked.record.hostname))
    }

    async fn delete_orphan(
        &self,
        tracked: &TrackedRecord,
        existing: Option<&ProviderRecord>,
        summary: &mut CycleSummary,
    ) {
        let key = tracked.key();
        if let Some(existing) = existing {
            if let Err(e) = self.provider.delete_record(&existing.id).await {
                log_provider_failure("delete", &tracked.record, &e, summary);
                return;
            }
            summary.deleted += 1;
            info!(hostname = %tracked.record.hostname, record_type = %tracked.record.record_type, "Orphaned record deleted");
            self.events.emit(DomainEvent::RecordDeleted {
                record: tracked.record.clone(),
            });
        } else {
            info!(hostname = %tracked.record.hostname, "Orphaned record already gone at provider");
        }

        if let Err(e) = self.tracker.untrack(&key).await {
            error!(key = %key, error = %e, "Record deleted at provider but untracking failed");
            summary.errors += 1;
        }
    }

    async fn tracked_in_zone(&self) -> Result<Vec<TrackedRecord>> {
        let provider = self.provider.name();
        let zone = normalize_hostname(self.provider.zone());
        Ok(self
            .tracker
            .get_tracked()
            .await?
            .into_iter()
            .filter(|t| t.record.provider.eq_ignore_ascii_case(provider) && t.record.zone == zone)
            .collect())
    }

    async fn orphan_keys(&self) -> HashSet<RecordKey> {
        self.tracked_in_zone()
            .await
            .map(|tracked| {
                tracked
                    .iter()
                    .filter(|t| t.is_orphaned())
                    .map(TrackedRecord::key)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Emit `OrphanedUpdated` if the orphan set changed; returns its size
    async fn emit_orphans_if_changed(&self, before: HashSet<RecordKey>, now: DateTime<Utc>) -> usize {
        let orphans = match self.orphans_at(now).await {
            Ok(orphans) => orphans,
            Err(e) => {
                error!(error = %e, "Cannot read orphan state");
                return 0;
            }
        };
        let after: HashSet<RecordKey> = orphans.iter().map(|o| o.key.clone()).collect();
        let count = orphans.len();
        if after != before {
            self.events.emit(DomainEvent::OrphanedUpdated { orphans });
        }
        count
    }

    async fn finish(
        &self,
        mut summary: CycleSummary,
        orphans_before: HashSet<RecordKey>,
        now: DateTime<Utc>,
    ) -> CycleSummary {
        summary.orphaned = self.emit_orphans_if_changed(orphans_before, now).await;

        if summary.has_changes() || summary.errors > 0 {
            info!(
                created = summary.created,
                updated = summary.updated,
                up_to_date = summary.up_to_date,
                deleted = summary.deleted,
                orphaned = summary.orphaned,
                errors = summary.errors,
                "Reconciliation cycle complete"
            );
        } else {
            debug!(up_to_date = summary.up_to_date, orphaned = summary.orphaned, "Reconciliation cycle complete, no changes");
        }
        self.events.emit(DomainEvent::CycleCompleted { summary });
        summary
    }
}

fn index_by_key(records: Vec<ProviderRecord>) -> HashMap<RecordKey, ProviderRecord> {
    let mut index = HashMap::new();
    for record in records {
        index.entry(record.record.key()).or_insert(record);
    }
    index
}

fn log_provider_failure(action: &str, record: &DnsRecord, e: &Error, summary: &mut CycleSummary) {
    summary.errors += 1;
    if e.is_transient() {
        warn!(action, hostname = %record.hostname, record_type = %record.record_type, error = %e, "Transient provider failure, retrying next cycle");
    } else {
        error!(action, hostname = %record.hostname, record_type = %record.record_type, error = %e, "Provider rejected change");
    }
}
