// # Discovery Sources
//
// Data contracts the discovery monitors consume. How a source talks to
// the container runtime or the reverse proxy is its own business.
//
// ## Implementations
//
// - Docker Engine API and Traefik API: `dnsync-discovery-http` crate
//
// ## Usage
//
// ```rust,ignore
// use dnsync_core::ContainerSource;
// use tokio_stream::StreamExt;
//
// let containers = source.list_containers().await?;
// let mut events = source.watch();
// while let Some(event) = events.next().await {
//     println!("container {:?}", event);
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio_stream::Stream;

/// A container as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub running: bool,
}

impl ContainerInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            running: true,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn stopped(mut self) -> Self {
        self.running = false;
        self
    }
}

/// Container lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerEventKind {
    Start,
    Stop,
    Destroy,
}

/// A container lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: String,
    pub kind: ContainerEventKind,
}

impl ContainerEvent {
    pub fn new(container_id: impl Into<String>, kind: ContainerEventKind) -> Self {
        Self {
            container_id: container_id.into(),
            kind,
        }
    }
}

/// Source of container state and lifecycle events.
///
/// Shared by both discovery monitors, so one instance survives mode switches.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// Every container the runtime knows about, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, crate::Error>;

    /// Stream of lifecycle events.
    ///
    /// Each call returns an independent stream; dropping it stops delivery.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = ContainerEvent> + Send + 'static>>;
}

/// One HTTP router from the reverse proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    /// Router name, possibly suffixed with `@provider`
    pub name: String,
    /// Matcher rule, e.g. ``Host(`app.example.com`)``
    pub rule: String,
    #[serde(default)]
    pub service: Option<String>,
}

impl ProxyRoute {
    pub fn new(name: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: rule.into(),
            service: None,
        }
    }

    /// Router name without the `@provider` suffix
    pub fn base_name(&self) -> &str {
        self.name.split('@').next().unwrap_or(&self.name)
    }
}

/// Source of the reverse proxy's routing configuration
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn routes(&self) -> Result<Vec<ProxyRoute>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_base_name_strips_provider() {
        assert_eq!(ProxyRoute::new("web@docker", "Host(`a.example.com`)").base_name(), "web");
        assert_eq!(ProxyRoute::new("web", "Host(`a.example.com`)").base_name(), "web");
    }
}
