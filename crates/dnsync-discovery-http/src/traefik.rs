use async_trait::async_trait;
use dnsync_core::config::ProxyConfig;
use dnsync_core::traits::{ProxyRoute, RouteSource};
use dnsync_core::{Error, Result};
use serde::Deserialize;

/// Route source backed by the Traefik API
pub struct TraefikRouteSource {
    api_url: String,
    username: Option<String>,
    /// ⚠️ NEVER log this value
    password: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for TraefikRouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraefikRouteSource")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiRouter {
    name: String,
    #[serde(default)]
    rule: String,
    service: Option<String>,
}

impl TraefikRouteSource {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(Error::config("Traefik API URL cannot be empty"));
        }

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
            client: crate::http_client()?,
        })
    }
}

#[async_trait]
impl RouteSource for TraefikRouteSource {
    async fn routes(&self) -> Result<Vec<ProxyRoute>> {
        let url = format!("{}/http/routers", self.api_url);
        let mut request = self.client.get(&url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::discovery(format!("Traefik API request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::discovery(format!(
                "Traefik API returned {}",
                response.status()
            )));
        }

        let routers: Vec<ApiRouter> = response
            .json()
            .await
            .map_err(|e| Error::discovery(format!("Invalid Traefik router list: {}", e)))?;

        tracing::debug!(count = routers.len(), "Fetched Traefik routers");
        Ok(routers
            .into_iter()
            .filter(|r| !r.rule.is_empty())
            .map(|r| ProxyRoute {
                name: r.name,
                rule: r.rule,
                service: r.service,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ProxyConfig {
        ProxyConfig {
            api_url: format!("{}/api/", server.uri()),
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_routes_are_mapped_and_ruleless_routers_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/http/routers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "web@docker", "rule": "Host(`web.example.com`)", "service": "web", "status": "enabled"},
                {"name": "api@internal", "service": "api@internal"}
            ])))
            .mount(&server)
            .await;

        let routes = TraefikRouteSource::new(&config(&server))
            .unwrap()
            .routes()
            .await
            .unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].base_name(), "web");
        assert_eq!(routes[0].service.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn test_basic_auth_is_sent() {
        let server = MockServer::start().await;
        // "admin:secret"
        Mock::given(method("GET"))
            .and(path("/api/http/routers"))
            .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.username = Some("admin".into());
        config.password = Some("secret".into());
        let source = TraefikRouteSource::new(&config).unwrap();

        assert!(source.routes().await.unwrap().is_empty());
        assert!(!format!("{:?}", source).contains("secret"));
    }

    #[tokio::test]
    async fn test_api_failure_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = TraefikRouteSource::new(&config(&server))
            .unwrap()
            .routes()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }
}
