//! Discovery monitors
//!
//! A [`DiscoveryMonitor`] turns a [`DesiredStateSource`] into reconciliation
//! cycles. Two sources exist: [`ProxyDiscovery`] (reverse-proxy routers)
//! and [`DirectDiscovery`] (container labels). Everything past step one of
//! a cycle is shared.
//!
//! ## Scheduling
//!
//! One loop task per monitor multiplexes the poll timer, container
//! lifecycle events and explicit triggers. Cycles therefore never
//! interleave. Events arriving while a cycle runs collapse into a single
//! follow-up cycle. Stopping is checked only between cycles.

pub mod direct;
pub mod labels;
pub mod proxy;

#[cfg(test)]
mod fakes;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::OperationMode;
use crate::engine::ReconciliationEngine;
use crate::error::{Error, Result};
use crate::events::CycleSummary;
use crate::record::DesiredEntry;
use crate::traits::ContainerSource;

pub use direct::DirectDiscovery;
pub use proxy::ProxyDiscovery;

/// Where a monitor gets its desired state from
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    fn mode(&self) -> OperationMode;

    /// Verify the source is reachable
    async fn init(&self) -> Result<()>;

    /// Desired entries as of now
    async fn desired_state(&self) -> Result<Vec<DesiredEntry>>;
}

struct MonitorInner {
    source: Arc<dyn DesiredStateSource>,
    engine: Arc<ReconciliationEngine>,
    /// At most one cycle at a time per monitor
    cycle_guard: Mutex<()>,
    trigger: Notify,
}

impl MonitorInner {
    async fn run_cycle(&self) -> Result<CycleSummary> {
        let _guard = self.cycle_guard.lock().await;
        let desired = self.source.desired_state().await?;
        debug!(mode = %self.source.mode(), entries = desired.len(), "Desired state collected");
        Ok(self.engine.reconcile(desired).await)
    }
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Drives reconciliation from one desired-state source
pub struct DiscoveryMonitor {
    inner: Arc<MonitorInner>,
    containers: Arc<dyn ContainerSource>,
    poll_interval: Duration,
    initialized: AtomicBool,
    handle: Mutex<Option<LoopHandle>>,
}

impl DiscoveryMonitor {
    pub fn new(
        source: Arc<dyn DesiredStateSource>,
        engine: Arc<ReconciliationEngine>,
        containers: Arc<dyn ContainerSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                source,
                engine,
                cycle_guard: Mutex::new(()),
                trigger: Notify::new(),
            }),
            containers,
            poll_interval,
            initialized: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.inner.source.mode()
    }

    /// Check the source is reachable. Must succeed before polling starts.
    pub async fn init(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        self.inner.source.init().await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!(mode = %self.mode(), "Discovery monitor initialized");
        Ok(())
    }

    /// Start the polling loop. The first cycle runs immediately.
    ///
    /// Starting a running monitor is a no-op.
    pub async fn start_polling(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::Other(format!(
                "{} monitor must be initialized before polling",
                self.mode()
            )));
        }

        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.task.is_finished()) {
            debug!(mode = %self.mode(), "Monitor already polling");
            return Ok(());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.inner.clone(),
            self.containers.clone(),
            self.poll_interval,
            stop_rx,
        ));
        *handle = Some(LoopHandle { stop_tx, task });
        info!(mode = %self.mode(), interval_ms = self.poll_interval.as_millis() as u64, "Polling started");
        Ok(())
    }

    /// Stop the polling loop.
    ///
    /// Returns once the loop exited; an in-flight cycle runs to completion
    /// first.
    pub async fn stop_polling(&self) {
        let Some(LoopHandle { stop_tx, task }) = self.handle.lock().await.take() else {
            return;
        };
        let _ = stop_tx.send(true);
        if let Err(e) = task.await {
            warn!(mode = %self.mode(), error = %e, "Polling task ended abnormally");
        }
        info!(mode = %self.mode(), "Polling stopped");
    }

    pub async fn is_polling(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Request an out-of-band cycle from the polling loop.
    ///
    /// Any number of triggers before the loop picks one up yield one cycle.
    pub fn trigger_cycle(&self) {
        self.inner.trigger.notify_one();
    }

    /// Run one cycle on the caller's task, serialized with the loop's cycles
    pub async fn run_cycle_now(&self) -> Result<CycleSummary> {
        self.inner.run_cycle().await
    }
}

async fn run_loop(
    inner: Arc<MonitorInner>,
    containers: Arc<dyn ContainerSource>,
    poll_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mode = inner.source.mode();
    let mut events = containers.watch();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }

            Some(event) = events.next() => {
                debug!(mode = %mode, container = %event.container_id, kind = ?event.kind, "Container event");
                inner.trigger.notify_one();
                continue;
            }

            _ = inner.trigger.notified() => {
                debug!(mode = %mode, "Triggered cycle");
            }

            _ = ticker.tick() => {}
        }

        if *stop_rx.borrow() {
            break;
        }

        match inner.run_cycle().await {
            Ok(summary) => debug!(mode = %mode, ?summary, "Cycle finished"),
            Err(e) => error!(mode = %mode, error = %e, "Cycle skipped: desired state unavailable"),
        }
        ticker.reset();
    }

    debug!(mode = %mode, "Polling loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ContainerEvent, ContainerInfo};
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use tokio_stream::Stream;

    struct FailingSource;

    #[async_trait]
    impl DesiredStateSource for FailingSource {
        fn mode(&self) -> OperationMode {
            OperationMode::Direct
        }

        async fn init(&self) -> Result<()> {
            Err(Error::discovery("unreachable"))
        }

        async fn desired_state(&self) -> Result<Vec<DesiredEntry>> {
            Err(Error::discovery("unreachable"))
        }
    }

    struct NoContainers(AtomicUsize);

    #[async_trait]
    impl ContainerSource for NoContainers {
        async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn watch(&self) -> Pin<Box<dyn Stream<Item = ContainerEvent> + Send + 'static>> {
            Box::pin(tokio_stream::empty())
        }
    }

    #[tokio::test]
    async fn test_polling_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path()).await;
        let monitor = DiscoveryMonitor::new(
            Arc::new(FailingSource),
            engine,
            Arc::new(NoContainers(AtomicUsize::new(0))),
            Duration::from_secs(60),
        );

        assert!(monitor.init().await.is_err());
        assert!(monitor.start_polling().await.is_err());
        assert!(!monitor.is_polling().await);
        // Stopping a monitor that never started is fine
        monitor.stop_polling().await;
    }

    async fn test_engine(dir: &std::path::Path) -> Arc<ReconciliationEngine> {
        use crate::config::RecordDefaults;
        use crate::engine::OrphanPolicy;
        use crate::events::EventBus;
        use crate::provider::ProviderClient;
        use crate::record::DnsRecord;
        use crate::store::DurableStore;
        use crate::tracker::RecordTracker;
        use crate::traits::{DnsProvider, ProviderRecord};

        struct Empty;

        #[async_trait]
        impl DnsProvider for Empty {
            fn provider_name(&self) -> &'static str {
                "empty"
            }
            fn zone(&self) -> &str {
                "example.com"
            }
            async fn list_records(&self) -> Result<Vec<ProviderRecord>> {
                Ok(Vec::new())
            }
            async fn create_record(&self, record: &DnsRecord) -> Result<ProviderRecord> {
                Ok(ProviderRecord::new("1", record.clone()))
            }
            async fn update_record(&self, id: &str, record: &DnsRecord) -> Result<ProviderRecord> {
                Ok(ProviderRecord::new(id, record.clone()))
            }
            async fn delete_record(&self, _id: &str) -> Result<()> {
                Ok(())
            }
        }

        let store = Arc::new(DurableStore::open(dir).await.unwrap());
        let events = EventBus::new(16);
        let provider = Arc::new(ProviderClient::new(
            Box::new(Empty),
            Duration::from_secs(60),
            Duration::from_secs(5),
            events.clone(),
        ));
        Arc::new(ReconciliationEngine::new(
            provider,
            Arc::new(RecordTracker::new(store)),
            events,
            RecordDefaults::default(),
            OrphanPolicy::new(false, 900),
        ))
    }
}
