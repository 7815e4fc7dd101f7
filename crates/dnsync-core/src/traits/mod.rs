//! Core traits for dnsync
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DnsProvider`]: Mutate DNS records via provider APIs
//! - [`ContainerSource`]: Container state and lifecycle events
//! - [`RouteSource`]: Reverse-proxy routing configuration

pub mod dns_provider;
pub mod discovery;

pub use dns_provider::{DnsProvider, DnsProviderFactory, ProviderRecord};
pub use discovery::{
    ContainerEvent, ContainerEventKind, ContainerInfo, ContainerSource, ProxyRoute, RouteSource,
};
