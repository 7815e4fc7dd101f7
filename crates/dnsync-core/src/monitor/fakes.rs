//! Discovery doubles shared by the monitor unit tests

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_stream::Stream;

use crate::error::{Error, Result};
use crate::traits::{ContainerEvent, ContainerInfo, ContainerSource, ProxyRoute, RouteSource};

/// Container list set by the test, optionally failing
pub struct FakeContainers {
    containers: Mutex<Vec<ContainerInfo>>,
    failing: AtomicBool,
}

impl FakeContainers {
    pub fn new(containers: Vec<ContainerInfo>) -> Self {
        Self {
            containers: Mutex::new(containers),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContainerSource for FakeContainers {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::discovery("container runtime unreachable"));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = ContainerEvent> + Send + 'static>> {
        Box::pin(tokio_stream::empty())
    }
}

/// Fixed router list
pub struct FakeRoutes(pub Vec<ProxyRoute>);

#[async_trait]
impl RouteSource for FakeRoutes {
    async fn routes(&self) -> Result<Vec<ProxyRoute>> {
        Ok(self.0.clone())
    }
}

/// Hostnames of `entries`, in order
pub fn hostnames(entries: &[crate::record::DesiredEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.hostname.as_str()).collect()
}
