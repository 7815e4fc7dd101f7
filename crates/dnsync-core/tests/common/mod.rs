//! Test doubles and common utilities for contract tests
//!
//! The doubles keep their state behind `Arc`s so a test can hand one copy to
//! the system under test and inspect another.

#![allow(dead_code)]

use async_trait::async_trait;
use dnsync_core::config::{OperationMode, RecordDefaults};
use dnsync_core::engine::{OrphanPolicy, ReconciliationEngine};
use dnsync_core::error::{Error, Result};
use dnsync_core::events::EventBus;
use dnsync_core::monitor::DesiredStateSource;
use dnsync_core::provider::ProviderClient;
use dnsync_core::record::{DesiredEntry, DnsRecord, RecordType};
use dnsync_core::store::DurableStore;
use dnsync_core::tracker::RecordTracker;
use dnsync_core::traits::{
    ContainerEvent, ContainerInfo, ContainerSource, DnsProvider, ProviderRecord, ProxyRoute,
    RouteSource,
};
use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

pub const ZONE: &str = "example.com";
pub const PROVIDER: &str = "mock";

/// Kind of failure injected for a hostname
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transient,
    Permanent,
}

/// An in-memory provider zone that counts calls
pub struct MockDnsProvider {
    records: Arc<Mutex<Vec<ProviderRecord>>>,
    next_id: Arc<AtomicUsize>,
    list_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    failures: Arc<Mutex<HashMap<String, Failure>>>,
    fail_listing: Arc<AtomicBool>,
    /// Applied to every mutating call
    delay: Duration,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicUsize::new(1)),
            list_calls: Arc::new(AtomicUsize::new(0)),
            create_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(HashMap::new())),
            fail_listing: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Create a new MockDnsProvider that shares zone and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            records: Arc::clone(&other.records),
            next_id: Arc::clone(&other.next_id),
            list_calls: Arc::clone(&other.list_calls),
            create_calls: Arc::clone(&other.create_calls),
            update_calls: Arc::clone(&other.update_calls),
            delete_calls: Arc::clone(&other.delete_calls),
            failures: Arc::clone(&other.failures),
            fail_listing: Arc::clone(&other.fail_listing),
            delay: other.delay,
        }
    }

    /// Put a record into the zone directly; returns its id
    pub fn seed(&self, record: DnsRecord) -> String {
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records
            .lock()
            .unwrap()
            .push(ProviderRecord::new(id.clone(), record));
        id
    }

    pub fn records(&self) -> Vec<ProviderRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn find(&self, hostname: &str) -> Option<ProviderRecord> {
        self.records()
            .into_iter()
            .find(|r| r.record.hostname == hostname)
    }

    pub fn fail_hostname(&self, hostname: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(hostname.to_string(), failure);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.create_calls() + self.update_calls() + self.delete_calls()
    }

    fn check_failure(&self, hostname: &str) -> Result<()> {
        match self.failures.lock().unwrap().get(hostname) {
            Some(Failure::Transient) => Err(Error::transient(PROVIDER, "503 service unavailable")),
            Some(Failure::Permanent) => Err(Error::permanent(PROVIDER, "400 invalid record")),
            None => Ok(()),
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn zone(&self) -> &str {
        ZONE
    }

    async fn list_records(&self) -> Result<Vec<ProviderRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::transient(PROVIDER, "connection refused"));
        }
        Ok(self.records())
    }

    async fn create_record(&self, record: &DnsRecord) -> Result<ProviderRecord> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check_failure(&record.hostname)?;
        let id = self.seed(record.clone());
        Ok(ProviderRecord::new(id, record.clone()))
    }

    async fn update_record(&self, id: &str, record: &DnsRecord) -> Result<ProviderRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check_failure(&record.hostname)?;
        let mut records = self.records.lock().unwrap();
        let existing = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        existing.record = record.clone();
        Ok(existing.clone())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let hostname = self.records().into_iter().find(|r| r.id == id).map(|r| r.record.hostname);
        if let Some(hostname) = hostname {
            self.check_failure(&hostname)?;
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(Error::not_found(id.to_string()));
        }
        Ok(())
    }
}

/// A container source whose containers and events are driven by the test
pub struct ControlledContainerSource {
    containers: Arc<Mutex<Vec<ContainerInfo>>>,
    events: broadcast::Sender<ContainerEvent>,
    list_calls: Arc<AtomicUsize>,
    fail_listing: Arc<AtomicBool>,
}

impl ControlledContainerSource {
    pub fn new(containers: Vec<ContainerInfo>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            containers: Arc::new(Mutex::new(containers)),
            events,
            list_calls: Arc::new(AtomicUsize::new(0)),
            fail_listing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *self.containers.lock().unwrap() = containers;
    }

    /// Make `list_containers` fail, as if the runtime API were down
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Emit a lifecycle event to every active watcher
    pub fn emit_event(&self, event: ContainerEvent) {
        let _ = self.events.send(event);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerSource for ControlledContainerSource {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::discovery("container runtime unreachable"));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = ContainerEvent> + Send + 'static>> {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|e| e.ok());
        Box::pin(stream)
    }
}

/// A route source returning a fixed set of routers
pub struct StaticRouteSource {
    routes: Mutex<Vec<ProxyRoute>>,
}

impl StaticRouteSource {
    pub fn new(routes: Vec<ProxyRoute>) -> Self {
        Self {
            routes: Mutex::new(routes),
        }
    }
}

#[async_trait]
impl RouteSource for StaticRouteSource {
    async fn routes(&self) -> Result<Vec<ProxyRoute>> {
        Ok(self.routes.lock().unwrap().clone())
    }
}

/// A desired-state source with scripted output, latency and failures
pub struct ScriptedSource {
    mode: OperationMode,
    entries: Mutex<Vec<DesiredEntry>>,
    delay: Duration,
    fail_init: AtomicBool,
    init_calls: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(mode: OperationMode, entries: Vec<DesiredEntry>) -> Self {
        Self {
            mode,
            entries: Mutex::new(entries),
            delay: Duration::ZERO,
            fail_init: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn set_entries(&self, entries: Vec<DesiredEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DesiredStateSource for ScriptedSource {
    fn mode(&self) -> OperationMode {
        self.mode
    }

    async fn init(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(Error::discovery(format!("{} source unreachable", self.mode)));
        }
        Ok(())
    }

    async fn desired_state(&self) -> Result<Vec<DesiredEntry>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// Engine wired to a mock provider and a store in `dir`
pub struct Harness {
    pub store: Arc<DurableStore>,
    pub tracker: Arc<RecordTracker>,
    pub client: Arc<ProviderClient>,
    pub engine: Arc<ReconciliationEngine>,
    pub events: EventBus,
}

pub async fn harness(dir: &Path, provider: MockDnsProvider, policy: OrphanPolicy) -> Harness {
    harness_with(dir, provider, policy, Duration::from_secs(5)).await
}

pub async fn harness_with(
    dir: &Path,
    provider: MockDnsProvider,
    policy: OrphanPolicy,
    call_timeout: Duration,
) -> Harness {
    let store = Arc::new(DurableStore::open(dir).await.expect("store opens"));
    let events = EventBus::new(256);
    let client = Arc::new(ProviderClient::new(
        Box::new(provider),
        Duration::from_secs(3600),
        call_timeout,
        events.clone(),
    ));
    let tracker = Arc::new(RecordTracker::new(store.clone()));
    let engine = Arc::new(ReconciliationEngine::new(
        client.clone(),
        tracker.clone(),
        events.clone(),
        RecordDefaults::default(),
        policy,
    ));
    Harness {
        store,
        tracker,
        client,
        engine,
        events,
    }
}

/// An A record in the test zone
pub fn a_record(hostname: &str, content: &str) -> DnsRecord {
    DnsRecord::new(PROVIDER, ZONE, hostname, RecordType::A, content, 300)
}

/// A desired A record with explicit content and TTL
pub fn desired_a(hostname: &str, content: &str) -> DesiredEntry {
    DesiredEntry::new(hostname)
        .with_type(RecordType::A)
        .with_content(content)
        .with_ttl(300)
}
