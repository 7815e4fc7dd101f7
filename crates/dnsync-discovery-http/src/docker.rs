use async_trait::async_trait;
use dnsync_core::config::DockerConfig;
use dnsync_core::traits::{ContainerEvent, ContainerEventKind, ContainerInfo, ContainerSource};
use dnsync_core::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Container source backed by the Docker Engine API
///
/// The Engine's own event stream is not used; `watch` polls the container
/// list and emits the transitions it observes.
#[derive(Debug, Clone)]
pub struct DockerContainerSource {
    api_url: String,
    poll_interval: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    state: String,
}

impl From<ApiContainer> for ContainerInfo {
    fn from(api: ApiContainer) -> Self {
        let name = api
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| api.id.clone());
        ContainerInfo {
            id: api.id,
            name,
            labels: api.labels.unwrap_or_default(),
            running: api.state == "running",
        }
    }
}

impl DockerContainerSource {
    pub fn new(config: &DockerConfig) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(Error::config("Docker API URL cannot be empty"));
        }

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval.max(1)),
            client: crate::http_client()?,
        })
    }

    async fn fetch(client: &reqwest::Client, api_url: &str) -> Result<Vec<ContainerInfo>> {
        let url = format!("{}/containers/json", api_url);
        let response = client
            .get(&url)
            .query(&[("all", "true")])
            .send()
            .await
            .map_err(|e| Error::discovery(format!("Docker API request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::discovery(format!(
                "Docker API returned {}",
                response.status()
            )));
        }

        let containers: Vec<ApiContainer> = response
            .json()
            .await
            .map_err(|e| Error::discovery(format!("Invalid Docker container list: {}", e)))?;
        Ok(containers.into_iter().map(ContainerInfo::from).collect())
    }
}

/// Transitions between two snapshots of container id to running state
fn diff(previous: &HashMap<String, bool>, current: &HashMap<String, bool>) -> Vec<ContainerEvent> {
    let mut events = Vec::new();

    for (id, &running) in current {
        let was_running = previous.get(id).copied();
        match (was_running, running) {
            (None | Some(false), true) => {
                events.push(ContainerEvent::new(id.clone(), ContainerEventKind::Start))
            }
            (Some(true), false) => {
                events.push(ContainerEvent::new(id.clone(), ContainerEventKind::Stop))
            }
            _ => {}
        }
    }
    for id in previous.keys().filter(|id| !current.contains_key(*id)) {
        events.push(ContainerEvent::new(id.clone(), ContainerEventKind::Destroy));
    }

    events
}

#[async_trait]
impl ContainerSource for DockerContainerSource {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        Self::fetch(&self.client, &self.api_url).await
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = ContainerEvent> + Send + 'static>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let api_url = self.api_url.clone();
        let poll_interval = self.poll_interval;
        let client = self.client.clone();

        tokio::spawn(async move {
            tracing::info!(url = %api_url, interval = ?poll_interval, "Starting Docker container polling");

            // First successful poll is the baseline; those containers are
            // covered by the monitor's initial cycle
            let mut known: Option<HashMap<String, bool>> = None;

            while !tx.is_closed() {
                match Self::fetch(&client, &api_url).await {
                    Ok(containers) => {
                        let snapshot: HashMap<String, bool> =
                            containers.into_iter().map(|c| (c.id, c.running)).collect();

                        if let Some(previous) = &known {
                            for event in diff(previous, &snapshot) {
                                tracing::debug!(container = %event.container_id, kind = ?event.kind, "Container transition");
                                if tx.send(event).is_err() {
                                    tracing::debug!("Receiver dropped, stopping Docker polling");
                                    return;
                                }
                            }
                        }
                        known = Some(snapshot);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Docker poll failed");
                    }
                }

                tokio::time::sleep(poll_interval).await;
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> DockerContainerSource {
        DockerContainerSource::new(&DockerConfig {
            api_url: server.uri(),
            poll_interval: 20,
        })
        .unwrap()
    }

    fn container(id: &str, name: &str, state: &str) -> serde_json::Value {
        json!({
            "Id": id,
            "Names": [format!("/{}", name)],
            "Labels": {"dns.type": "A"},
            "State": state
        })
    }

    #[tokio::test]
    async fn test_list_maps_engine_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/containers/json"))
            .and(query_param("all", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                container("c1", "web", "running"),
                {"Id": "c2", "Names": [], "Labels": null, "State": "exited"}
            ])))
            .mount(&server)
            .await;

        let containers = source(&server).list_containers().await.unwrap();

        assert_eq!(containers[0].name, "web");
        assert!(containers[0].running);
        assert_eq!(containers[0].labels.get("dns.type").map(String::as_str), Some("A"));
        assert_eq!(containers[1].name, "c2");
        assert!(!containers[1].running);
        assert!(containers[1].labels.is_empty());
    }

    #[tokio::test]
    async fn test_watch_emits_transitions_after_baseline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/containers/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                container("c1", "web", "running"),
                container("c2", "db", "running")
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/containers/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                container("c1", "web", "exited"),
                container("c3", "cache", "running")
            ])))
            .mount(&server)
            .await;

        let mut events = source(&server).watch();
        let mut received = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap()
                .unwrap();
            received.push((event.container_id, event.kind));
        }
        received.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            received,
            vec![
                ("c1".to_string(), ContainerEventKind::Stop),
                ("c2".to_string(), ContainerEventKind::Destroy),
                ("c3".to_string(), ContainerEventKind::Start),
            ]
        );
    }

    #[test]
    fn test_diff_ignores_unchanged_containers() {
        let previous = HashMap::from([("a".to_string(), true), ("b".to_string(), false)]);
        let current = previous.clone();
        assert!(diff(&previous, &current).is_empty());

        let restarted = HashMap::from([("a".to_string(), true), ("b".to_string(), true)]);
        assert_eq!(
            diff(&previous, &restarted),
            vec![ContainerEvent::new("b", ContainerEventKind::Start)]
        );
    }
}
