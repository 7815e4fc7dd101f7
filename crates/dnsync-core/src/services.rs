//! Service registry
//!
//! [`ServiceRegistry::build`] constructs the whole object graph once at
//! startup. Components that need cross-component access receive the
//! registry (or the `Arc`s they need) explicitly.

use std::sync::Arc;
use tracing::info;

use crate::config::{RuntimeConfig, Settings};
use crate::engine::ReconciliationEngine;
use crate::error::Result;
use crate::events::EventBus;
use crate::provider::ProviderClient;
use crate::store::migration::{LegacySources, migrate_legacy};
use crate::store::{DurableStore, Schema};
use crate::switcher::{DiscoveryMonitorFactory, ModeSwitcher};
use crate::tracker::RecordTracker;
use crate::traits::{ContainerSource, DnsProvider, RouteSource};

/// Shared services of a running instance
pub struct ServiceRegistry {
    /// Effective settings: environment overlaid with persisted runtime values
    pub settings: Settings,
    pub store: Arc<DurableStore>,
    pub events: EventBus,
    pub provider: Arc<ProviderClient>,
    pub tracker: Arc<RecordTracker>,
    pub engine: Arc<ReconciliationEngine>,
    pub switcher: Arc<ModeSwitcher>,
}

impl ServiceRegistry {
    /// Open the store, import legacy state and wire every component
    pub async fn build(
        mut settings: Settings,
        provider: Box<dyn DnsProvider>,
        containers: Arc<dyn ContainerSource>,
        routes: Option<Arc<dyn RouteSource>>,
        legacy: LegacySources,
    ) -> Result<Self> {
        let store = Arc::new(DurableStore::open(&settings.data_dir).await?);

        let report = migrate_legacy(&store, &legacy).await?;
        if !report.skipped {
            info!(
                records = report.records,
                preserved = report.preserved,
                managed = report.managed,
                "Legacy state imported"
            );
        }

        let runtime: RuntimeConfig = store.read_as(Schema::Config).await?;
        settings.apply_runtime(&runtime);
        settings.validate()?;

        let events = EventBus::new(settings.event_channel_capacity);
        let provider = Arc::new(ProviderClient::new(
            provider,
            settings.cache_ttl(),
            settings.provider_timeout(),
            events.clone(),
        ));
        let tracker = Arc::new(RecordTracker::new(store.clone()));
        let engine = Arc::new(ReconciliationEngine::from_settings(
            &settings,
            provider.clone(),
            tracker.clone(),
            events.clone(),
        ));

        let factory = Arc::new(DiscoveryMonitorFactory::new(
            engine.clone(),
            containers,
            routes,
            settings.labels.clone(),
            settings.defaults.manage,
            settings.poll_interval(),
        ));
        let switcher = Arc::new(ModeSwitcher::new(factory, store.clone(), events.clone()));

        info!(
            provider = provider.name(),
            zone = provider.zone(),
            mode = %settings.operation_mode,
            "Services ready"
        );

        Ok(Self {
            settings,
            store,
            events,
            provider,
            tracker,
            engine,
            switcher,
        })
    }

    /// Start the configured operation mode
    pub async fn start(&self) -> Result<()> {
        self.switcher.start(self.settings.operation_mode).await
    }

    /// Stop polling; returns after the in-flight cycle finished
    pub async fn shutdown(&self) {
        self.switcher.shutdown().await;
        info!("Services stopped");
    }
}
