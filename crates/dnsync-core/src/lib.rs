// # dnsync-core
//
// Core library for container-driven DNS reconciliation.
//
// ## Architecture Overview
//
// - **DurableStore**: JSON documents on disk, written through file locks and
//   transactions with backups, cached in memory
// - **ProviderClient**: cached, time-bounded access to a `DnsProvider`
// - **RecordTracker**: which records this system owns, orphan timestamps,
//   preserved and managed hostnames
// - **ReconciliationEngine**: diffs desired state against the provider and
//   drives the orphan lifecycle
// - **DiscoveryMonitor**: derives desired state (proxy routes or container
//   labels) and schedules cycles
// - **ModeSwitcher**: moves between discovery modes without losing a cycle
// - **ServiceRegistry**: the object graph, built once at startup
//
// ## Design Principles
//
// 1. **Ownership**: only records created or adopted by the system are ever
//    updated or deleted
// 2. **Isolation**: one record's failure never aborts a cycle
// 3. **Plugin-Based**: providers are registered by name, no hard-coded if-else
// 4. **Library-First**: the daemon is a thin wiring layer over this crate

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod monitor;
pub mod provider;
pub mod record;
pub mod registry;
pub mod services;
pub mod store;
pub mod switcher;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use config::{OperationMode, ProviderConfig, RecordDefaults, RuntimeConfig, Settings};
pub use engine::{OrphanPolicy, ReconciliationEngine};
pub use error::{Error, Result};
pub use events::{CycleSummary, DomainEvent, EventBus};
pub use monitor::{DesiredStateSource, DiscoveryMonitor};
pub use provider::ProviderClient;
pub use record::{
    DesiredEntry, DnsRecord, ManagedBy, ManagedHostname, OrphanState, RecordKey, RecordType,
    TrackedRecord,
};
pub use registry::ProviderRegistry;
pub use services::ServiceRegistry;
pub use store::DurableStore;
pub use switcher::{ModeSwitcher, SwitcherState};
pub use tracker::RecordTracker;
pub use traits::{ContainerSource, DnsProvider, DnsProviderFactory, RouteSource};
