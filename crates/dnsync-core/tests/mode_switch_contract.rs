//! Contract Test: Mode Switching
//!
//! Constraints verified:
//! - A switch lets the old monitor's in-flight cycle finish first
//! - The new monitor starts from the tracked state the old cycle left
//! - A failed switch restores the old mode; if that fails, it is fatal
//! - The active mode is persisted
//!
//! If this test fails, switching can duplicate records or strand the system.

mod common;

use async_trait::async_trait;
use common::*;
use dnsync_core::config::{LabelConfig, OperationMode, RuntimeConfig};
use dnsync_core::engine::OrphanPolicy;
use dnsync_core::error::{Error, Result};
use dnsync_core::events::DomainEvent;
use dnsync_core::monitor::DiscoveryMonitor;
use dnsync_core::store::Schema;
use dnsync_core::switcher::{
    DiscoveryMonitorFactory, ModeSwitcher, MonitorFactory, SwitcherState,
};
use dnsync_core::traits::ContainerInfo;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

/// Builds monitors over pre-made scripted sources
struct ScriptedFactory {
    harness: Arc<Harness>,
    proxy: Arc<ScriptedSource>,
    direct: Arc<ScriptedSource>,
    containers: Arc<ControlledContainerSource>,
}

#[async_trait]
impl MonitorFactory for ScriptedFactory {
    async fn build(&self, mode: OperationMode) -> Result<Arc<DiscoveryMonitor>> {
        let source = match mode {
            OperationMode::Proxy => self.proxy.clone(),
            OperationMode::Direct => self.direct.clone(),
        };
        Ok(Arc::new(DiscoveryMonitor::new(
            source,
            self.harness.engine.clone(),
            self.containers.clone(),
            HOUR,
        )))
    }
}

struct Setup {
    mock: MockDnsProvider,
    harness: Arc<Harness>,
    proxy: Arc<ScriptedSource>,
    direct: Arc<ScriptedSource>,
    switcher: ModeSwitcher,
    _dir: tempfile::TempDir,
}

async fn setup(proxy_delay: Duration) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockDnsProvider::new();
    let harness = Arc::new(
        harness(
            dir.path(),
            MockDnsProvider::sharing_counters_with(&mock),
            OrphanPolicy::new(true, 0),
        )
        .await,
    );
    let desired = vec![desired_a("app.example.com", "1.2.3.4")];
    let proxy = Arc::new(
        ScriptedSource::new(OperationMode::Proxy, desired.clone()).with_delay(proxy_delay),
    );
    let direct = Arc::new(ScriptedSource::new(OperationMode::Direct, desired));
    let factory = Arc::new(ScriptedFactory {
        harness: harness.clone(),
        proxy: proxy.clone(),
        direct: direct.clone(),
        containers: Arc::new(ControlledContainerSource::new(Vec::new())),
    });
    let switcher = ModeSwitcher::new(factory, harness.store.clone(), harness.events.clone());

    Setup {
        mock,
        harness,
        proxy,
        direct,
        switcher,
        _dir: dir,
    }
}

#[tokio::test]
async fn switch_mid_cycle_completes_the_cycle_first() {
    // Proxy cycle still running when the switch to direct arrives
    let s = setup(Duration::from_millis(200)).await;
    let mut events = s.harness.events.subscribe();

    s.switcher.start(OperationMode::Proxy).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(s.proxy.started(), 1);
    assert_eq!(s.proxy.completed(), 0);

    s.switcher.switch_to(OperationMode::Direct).await.unwrap();

    // The proxy cycle finished before the switch returned
    assert_eq!(s.proxy.completed(), 1);
    assert_eq!(s.mock.create_calls(), 1);
    assert_eq!(s.switcher.state(), SwitcherState::Running(OperationMode::Direct));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.direct.completed(), 1);
    assert_eq!(s.mock.create_calls(), 1, "no duplicate create after switching");
    assert_eq!(s.mock.mutation_calls(), 1);
    assert!(s.harness.engine.orphans().await.unwrap().is_empty());

    let runtime: RuntimeConfig = s.harness.store.read_as(Schema::Config).await.unwrap();
    assert_eq!(runtime.operation_mode, Some(OperationMode::Direct));

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::OperationModeChanged { previous, current } = event {
            changes.push((previous, current));
        }
    }
    assert_eq!(
        changes,
        vec![
            (None, OperationMode::Proxy),
            (Some(OperationMode::Proxy), OperationMode::Direct),
        ]
    );

    s.switcher.shutdown().await;
    assert_eq!(s.switcher.state(), SwitcherState::Inactive);
}

#[tokio::test]
async fn switching_to_the_active_mode_is_a_no_op() {
    let s = setup(Duration::ZERO).await;
    s.switcher.start(OperationMode::Proxy).await.unwrap();
    let before = s.switcher.active_monitor().unwrap();

    s.switcher.switch_to(OperationMode::Proxy).await.unwrap();

    let after = s.switcher.active_monitor().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(s.proxy.init_calls(), 1);
    s.switcher.shutdown().await;
}

#[tokio::test]
async fn failed_switch_restores_the_previous_mode() {
    let s = setup(Duration::ZERO).await;
    s.switcher.start(OperationMode::Proxy).await.unwrap();
    s.direct.set_fail_init(true);

    let result = s.switcher.switch_to(OperationMode::Direct).await;

    assert!(matches!(result, Err(Error::ModeSwitch(_))));
    assert_eq!(s.switcher.state(), SwitcherState::Running(OperationMode::Proxy));
    let active = s.switcher.active_monitor().unwrap();
    assert!(active.is_polling().await);

    let runtime: RuntimeConfig = s.harness.store.read_as(Schema::Config).await.unwrap();
    assert_ne!(runtime.operation_mode, Some(OperationMode::Direct));
    s.switcher.shutdown().await;
}

#[tokio::test]
async fn failed_switch_and_failed_restore_is_fatal() {
    let s = setup(Duration::ZERO).await;
    s.switcher.start(OperationMode::Proxy).await.unwrap();
    s.direct.set_fail_init(true);
    s.proxy.set_fail_init(true);

    let result = s.switcher.switch_to(OperationMode::Direct).await;

    assert!(matches!(result, Err(Error::Fatal(_))));
    assert_eq!(s.switcher.state(), SwitcherState::Inactive);
}

#[tokio::test]
async fn proxy_mode_requires_a_route_source() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), MockDnsProvider::new(), OrphanPolicy::new(false, 900)).await;
    let containers = Arc::new(ControlledContainerSource::new(vec![
        ContainerInfo::new("c1", "web")
            .with_label("traefik.http.routers.web.rule", "Host(`web.example.com`)")
            .with_label("dns.type", "A")
            .with_label("dns.content", "10.0.0.2"),
    ]));
    let factory = DiscoveryMonitorFactory::new(
        h.engine.clone(),
        containers,
        None,
        LabelConfig::default(),
        true,
        HOUR,
    );

    assert!(matches!(
        factory.build(OperationMode::Proxy).await,
        Err(Error::Config(_))
    ));

    let direct = factory.build(OperationMode::Direct).await.unwrap();
    direct.init().await.unwrap();
    let summary = direct.run_cycle_now().await.unwrap();
    assert_eq!(summary.created, 1);
}
