//! Operation mode switching
//!
//! The [`ModeSwitcher`] owns the active [`DiscoveryMonitor`]. A switch
//! stops the active monitor (waiting for its in-flight cycle), builds and
//! initializes the target monitor, and starts it. If the target cannot be
//! initialized the previous monitor is restarted. If that fails too the
//! switcher ends up inactive and reports a fatal error.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{LabelConfig, OperationMode, RuntimeConfig};
use crate::engine::ReconciliationEngine;
use crate::error::{Error, Result};
use crate::events::{DomainEvent, EventBus};
use crate::monitor::{DirectDiscovery, DiscoveryMonitor, ProxyDiscovery};
use crate::store::{DurableStore, Schema};
use crate::traits::{ContainerSource, RouteSource};

/// Builds an uninitialized monitor for a mode
#[async_trait]
pub trait MonitorFactory: Send + Sync {
    async fn build(&self, mode: OperationMode) -> Result<Arc<DiscoveryMonitor>>;
}

/// Builds monitors sharing one engine and one container source
pub struct DiscoveryMonitorFactory {
    engine: Arc<ReconciliationEngine>,
    containers: Arc<dyn ContainerSource>,
    routes: Option<Arc<dyn RouteSource>>,
    labels: LabelConfig,
    default_manage: bool,
    poll_interval: Duration,
}

impl DiscoveryMonitorFactory {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        containers: Arc<dyn ContainerSource>,
        routes: Option<Arc<dyn RouteSource>>,
        labels: LabelConfig,
        default_manage: bool,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            containers,
            routes,
            labels,
            default_manage,
            poll_interval,
        }
    }
}

#[async_trait]
impl MonitorFactory for DiscoveryMonitorFactory {
    async fn build(&self, mode: OperationMode) -> Result<Arc<DiscoveryMonitor>> {
        let provider_name = self.engine.provider().name();
        let source: Arc<dyn crate::monitor::DesiredStateSource> = match mode {
            OperationMode::Proxy => {
                let routes = self.routes.clone().ok_or_else(|| {
                    Error::config("proxy mode needs a route source (TRAEFIK_API_URL)")
                })?;
                Arc::new(ProxyDiscovery::new(
                    routes,
                    self.containers.clone(),
                    self.labels.clone(),
                    provider_name,
                    self.default_manage,
                ))
            }
            OperationMode::Direct => Arc::new(DirectDiscovery::new(
                self.containers.clone(),
                self.labels.clone(),
                provider_name,
                self.default_manage,
            )),
        };

        Ok(Arc::new(DiscoveryMonitor::new(
            source,
            self.engine.clone(),
            self.containers.clone(),
            self.poll_interval,
        )))
    }
}

/// Observable switcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherState {
    Inactive,
    Running(OperationMode),
}

/// Owns the active discovery monitor and moves between modes
pub struct ModeSwitcher {
    factory: Arc<dyn MonitorFactory>,
    store: Arc<DurableStore>,
    events: EventBus,
    /// Held for the whole of a start, switch or shutdown
    switch_lock: Mutex<()>,
    active: RwLock<Option<Arc<DiscoveryMonitor>>>,
}

impl ModeSwitcher {
    pub fn new(factory: Arc<dyn MonitorFactory>, store: Arc<DurableStore>, events: EventBus) -> Self {
        Self {
            factory,
            store,
            events,
            switch_lock: Mutex::new(()),
            active: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SwitcherState {
        match self.active_monitor() {
            Some(monitor) => SwitcherState::Running(monitor.mode()),
            None => SwitcherState::Inactive,
        }
    }

    pub fn active_monitor(&self) -> Option<Arc<DiscoveryMonitor>> {
        self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_active(&self, monitor: Option<Arc<DiscoveryMonitor>>) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = monitor;
    }

    /// Bring up the first monitor from the inactive state
    pub async fn start(&self, mode: OperationMode) -> Result<()> {
        let _lock = self.switch_lock.lock().await;
        if let Some(current) = self.active_monitor() {
            return Err(Error::ModeSwitch(format!(
                "already running in {} mode",
                current.mode()
            )));
        }

        let monitor = self.factory.build(mode).await?;
        monitor.init().await?;
        monitor.start_polling().await?;
        self.set_active(Some(monitor));

        info!(mode = %mode, "Operation mode started");
        self.events.emit(DomainEvent::OperationModeChanged {
            previous: None,
            current: mode,
        });
        Ok(())
    }

    /// Switch the active monitor to `target`.
    ///
    /// Returns [`Error::ModeSwitch`] when the target failed and the
    /// previous mode is running again, and [`Error::Fatal`] when nothing is
    /// running afterwards.
    pub async fn switch_to(&self, target: OperationMode) -> Result<()> {
        let _lock = self.switch_lock.lock().await;
        let previous = self.active_monitor();

        if let Some(current) = &previous
            && current.mode() == target
        {
            info!(mode = %target, "Already in requested mode");
            return Ok(());
        }

        if let Some(current) = &previous {
            info!(from = %current.mode(), to = %target, "Switching operation mode");
            current.stop_polling().await;
        }

        match self.bring_up(target).await {
            Ok(monitor) => {
                self.set_active(Some(monitor));
                if let Err(e) = self.persist_mode(target).await {
                    error!(mode = %target, error = %e, "Mode switched but could not be persisted");
                }
                self.events.emit(DomainEvent::OperationModeChanged {
                    previous: previous.as_ref().map(|m| m.mode()),
                    current: target,
                });
                info!(mode = %target, "Operation mode switched");
                Ok(())
            }
            Err(e) => {
                warn!(mode = %target, error = %e, "Target mode failed to start");
                self.fall_back(previous, target, e).await
            }
        }
    }

    async fn bring_up(&self, mode: OperationMode) -> Result<Arc<DiscoveryMonitor>> {
        let monitor = self.factory.build(mode).await?;
        monitor.init().await?;
        monitor.start_polling().await?;
        Ok(monitor)
    }

    async fn fall_back(
        &self,
        previous: Option<Arc<DiscoveryMonitor>>,
        target: OperationMode,
        cause: Error,
    ) -> Result<()> {
        let Some(old) = previous else {
            self.set_active(None);
            return Err(Error::Fatal(format!(
                "{} mode failed to start and no previous mode is available: {}",
                target, cause
            )));
        };

        let restarted = match old.init().await {
            Ok(()) => old.start_polling().await,
            Err(e) => Err(e),
        };

        match restarted {
            Ok(()) => {
                warn!(mode = %old.mode(), "Previous operation mode restored");
                Err(Error::ModeSwitch(format!(
                    "{} mode failed to start ({}); still running in {} mode",
                    target,
                    cause,
                    old.mode()
                )))
            }
            Err(restart_err) => {
                self.set_active(None);
                error!(
                    target_mode = %target,
                    previous_mode = %old.mode(),
                    error = %restart_err,
                    "Previous operation mode could not be restarted, no monitor is running"
                );
                Err(Error::Fatal(format!(
                    "{} mode failed to start ({}) and {} mode could not be restarted ({})",
                    target,
                    cause,
                    old.mode(),
                    restart_err
                )))
            }
        }
    }

    async fn persist_mode(&self, mode: OperationMode) -> Result<()> {
        self.store
            .modify(Schema::Config, |runtime: &mut RuntimeConfig| {
                runtime.operation_mode = Some(mode);
                Ok(())
            })
            .await
    }

    /// Stop the active monitor, if any
    pub async fn shutdown(&self) {
        let _lock = self.switch_lock.lock().await;
        if let Some(monitor) = self.active_monitor() {
            monitor.stop_polling().await;
        }
        self.set_active(None);
    }
}
