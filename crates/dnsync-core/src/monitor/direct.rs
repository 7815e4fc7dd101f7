//! Desired state from container labels

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::{LabelConfig, OperationMode};
use crate::error::Result;
use crate::monitor::DesiredStateSource;
use crate::monitor::labels::{DnsLabels, parse_host_rule, router_rules};
use crate::record::DesiredEntry;
use crate::traits::ContainerSource;

/// Derives hostnames from each running container's router rule labels
/// and `dns.hostname` label
pub struct DirectDiscovery {
    containers: Arc<dyn ContainerSource>,
    labels: LabelConfig,
    provider_name: String,
    default_manage: bool,
}

impl DirectDiscovery {
    pub fn new(
        containers: Arc<dyn ContainerSource>,
        labels: LabelConfig,
        provider_name: impl Into<String>,
        default_manage: bool,
    ) -> Self {
        Self {
            containers,
            labels,
            provider_name: provider_name.into(),
            default_manage,
        }
    }
}

#[async_trait]
impl DesiredStateSource for DirectDiscovery {
    fn mode(&self) -> OperationMode {
        OperationMode::Direct
    }

    async fn init(&self) -> Result<()> {
        let containers = self.containers.list_containers().await?;
        debug!(containers = containers.len(), "Container source reachable");
        Ok(())
    }

    async fn desired_state(&self) -> Result<Vec<DesiredEntry>> {
        let mut entries = Vec::new();

        for container in self.containers.list_containers().await? {
            if !container.running {
                continue;
            }
            let dns = DnsLabels::from_labels(&container.labels, &self.labels.dns_prefix, &self.provider_name);
            if !dns.is_managed(self.default_manage) {
                debug!(container = %container.name, "Container not managed");
                continue;
            }

            let mut hostnames: Vec<String> = router_rules(&container.labels, &self.labels.proxy_prefix)
                .into_iter()
                .flat_map(|(_, rule)| parse_host_rule(rule))
                .collect();
            hostnames.extend(dns.hostnames.iter().cloned());

            for hostname in hostnames {
                entries.push(dns.entry(&hostname, Some(&container.id)));
            }
        }

        Ok(entries)
    }
}
