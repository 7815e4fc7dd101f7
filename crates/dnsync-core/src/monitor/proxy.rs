//! Desired state from the reverse proxy's routers

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::{LabelConfig, OperationMode};
use crate::error::Result;
use crate::monitor::DesiredStateSource;
use crate::monitor::labels::{DnsLabels, parse_host_rule, router_rules};
use crate::record::DesiredEntry;
use crate::traits::{ContainerInfo, ContainerSource, RouteSource};

/// Derives hostnames from the proxy's HTTP routers. Label overrides come
/// from the running container that declares each router.
pub struct ProxyDiscovery {
    routes: Arc<dyn RouteSource>,
    containers: Arc<dyn ContainerSource>,
    labels: LabelConfig,
    provider_name: String,
    default_manage: bool,
}

impl ProxyDiscovery {
    pub fn new(
        routes: Arc<dyn RouteSource>,
        containers: Arc<dyn ContainerSource>,
        labels: LabelConfig,
        provider_name: impl Into<String>,
        default_manage: bool,
    ) -> Self {
        Self {
            routes,
            containers,
            labels,
            provider_name: provider_name.into(),
            default_manage,
        }
    }

    /// Router name to the running container declaring it.
    ///
    /// Fails when the container list is unavailable: without it the
    /// label overrides and manage flags are unknown.
    async fn router_owners(&self) -> Result<HashMap<String, ContainerInfo>> {
        let containers = self.containers.list_containers().await?;

        let mut owners = HashMap::new();
        for container in containers.into_iter().filter(|c| c.running) {
            let names: Vec<String> = router_rules(&container.labels, &self.labels.proxy_prefix)
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect();
            for name in names {
                owners.entry(name).or_insert_with(|| container.clone());
            }
        }
        Ok(owners)
    }
}

#[async_trait]
impl DesiredStateSource for ProxyDiscovery {
    fn mode(&self) -> OperationMode {
        OperationMode::Proxy
    }

    async fn init(&self) -> Result<()> {
        let routes = self.routes.routes().await?;
        debug!(routes = routes.len(), "Route source reachable");
        Ok(())
    }

    async fn desired_state(&self) -> Result<Vec<DesiredEntry>> {
        let routes = self.routes.routes().await?;
        let owners = self.router_owners().await?;
        let mut entries = Vec::new();

        for route in routes {
            let hosts = parse_host_rule(&route.rule);
            if hosts.is_empty() {
                continue;
            }

            let owner = owners.get(route.base_name());
            let dns = owner
                .map(|c| DnsLabels::from_labels(&c.labels, &self.labels.dns_prefix, &self.provider_name))
                .unwrap_or_default();
            if !dns.is_managed(self.default_manage) {
                debug!(router = %route.name, "Router not managed");
                continue;
            }

            let container_id = owner.map(|c| c.id.as_str());
            for host in hosts {
                entries.push(dns.entry(&host, container_id));
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::monitor::fakes::{FakeContainers, FakeRoutes, hostnames};
    use crate::traits::ProxyRoute;

    fn web_container() -> ContainerInfo {
        ContainerInfo::new("c1", "web")
            .with_label("traefik.http.routers.web.rule", "Host(`web.example.com`)")
            .with_label("dns.manage", "true")
            .with_label("dns.content", "10.0.0.5")
    }

    fn discovery(
        routes: Vec<ProxyRoute>,
        containers: Arc<FakeContainers>,
        default_manage: bool,
    ) -> ProxyDiscovery {
        ProxyDiscovery::new(
            Arc::new(FakeRoutes(routes)),
            containers,
            LabelConfig::default(),
            "cloudflare",
            default_manage,
        )
    }

    #[tokio::test]
    async fn test_router_with_provider_suffix_gets_owner_overrides() {
        let containers = Arc::new(FakeContainers::new(vec![web_container()]));
        let source = discovery(
            vec![ProxyRoute::new("web@docker", "Host(`web.example.com`)")],
            containers,
            false,
        );

        let entries = source.desired_state().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hostname, "web.example.com");
        assert_eq!(entries[0].content.as_deref(), Some("10.0.0.5"));
        assert_eq!(entries[0].source_container_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_container_list_failure_fails_desired_state() {
        let containers = Arc::new(FakeContainers::new(vec![web_container()]));
        let source = discovery(
            vec![ProxyRoute::new("web@docker", "Host(`web.example.com`)")],
            containers.clone(),
            false,
        );
        assert_eq!(source.desired_state().await.unwrap().len(), 1);

        containers.set_failing(true);
        let result = source.desired_state().await;

        assert!(matches!(result, Err(Error::Discovery(_))));
    }

    #[tokio::test]
    async fn test_manage_gating_per_router() {
        let containers = Arc::new(FakeContainers::new(vec![
            web_container(),
            ContainerInfo::new("c2", "admin")
                .with_label("traefik.http.routers.admin.rule", "Host(`admin.example.com`)")
                .with_label("dns.skip", "true"),
        ]));
        let routes = vec![
            ProxyRoute::new("web@docker", "Host(`web.example.com`)"),
            ProxyRoute::new("admin@docker", "Host(`admin.example.com`)"),
            ProxyRoute::new("file-route@file", "Host(`static.example.com`)"),
        ];

        let opt_in = discovery(routes.clone(), containers.clone(), false);
        assert_eq!(
            hostnames(&opt_in.desired_state().await.unwrap()),
            vec!["web.example.com"]
        );

        // Routers without an owning container fall back to the default
        let opt_out = discovery(routes, containers, true);
        let entries = opt_out.desired_state().await.unwrap();
        assert_eq!(hostnames(&entries), vec!["web.example.com", "static.example.com"]);
        assert_eq!(entries[1].content, None);
        assert_eq!(entries[1].source_container_id, None);
    }

    #[tokio::test]
    async fn test_stopped_container_does_not_own_its_router() {
        let containers = Arc::new(FakeContainers::new(vec![web_container().stopped()]));
        let source = discovery(
            vec![ProxyRoute::new("web@docker", "Host(`web.example.com`)")],
            containers,
            true,
        );

        let entries = source.desired_state().await.unwrap();

        assert_eq!(hostnames(&entries), vec!["web.example.com"]);
        assert_eq!(entries[0].content, None);
    }
}
