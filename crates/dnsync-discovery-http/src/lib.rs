// # HTTP Discovery Sources
//
// HTTP implementations of the discovery collaborators dnsync-core consumes.
//
// - `DockerContainerSource`: Docker Engine API (`/containers/json`), with
//   lifecycle events synthesized by polling and diffing
// - `TraefikRouteSource`: Traefik API (`/http/routers`)
//
// ## Architecture
//
// These are thin adapters from each API's JSON to the data contracts in
// `dnsync_core::traits::discovery`. They hold no DNS logic and never touch
// the store; the monitors decide what the data means.

mod docker;
mod traefik;

pub use docker::DockerContainerSource;
pub use traefik::TraefikRouteSource;

use std::time::Duration;

/// HTTP timeout for discovery API requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> dnsync_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .build()
        .map_err(|e| dnsync_core::Error::config(format!("Failed to build HTTP client: {}", e)))
}
