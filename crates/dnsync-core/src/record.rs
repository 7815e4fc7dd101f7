//! DNS record data model
//!
//! - [`DnsRecord`]: the normalized record shape every provider speaks
//! - [`TrackedRecord`]: a record this system owns, with ownership metadata
//! - [`OrphanState`]: derived view of a tracked record missing from desired state
//! - [`ManagedHostname`]: an operator-declared desired entry
//! - [`DesiredEntry`]: what a discovery monitor hands to the engine
//!
//! Identity is `provider:zone:hostname:type`, compared case-insensitively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum length of a fully-qualified hostname (RFC 1035)
const MAX_HOSTNAME_LEN: usize = 253;

/// DNS record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Txt,
    Mx,
    Srv,
    Caa,
}

impl RecordType {
    /// Upper-case wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
            RecordType::Mx => "MX",
            RecordType::Srv => "SRV",
            RecordType::Caa => "CAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            "MX" => Ok(RecordType::Mx),
            "SRV" => Ok(RecordType::Srv),
            "CAA" => Ok(RecordType::Caa),
            other => Err(Error::validation(format!("Unsupported record type: {}", other))),
        }
    }
}

/// Lower-case a hostname and strip one trailing dot
pub fn normalize_hostname(hostname: &str) -> String {
    let trimmed = hostname.trim();
    trimmed
        .strip_suffix('.')
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// Whether `hostname` is the zone apex or a name below it
pub fn hostname_in_zone(hostname: &str, zone: &str) -> bool {
    let hostname = normalize_hostname(hostname);
    let zone = normalize_hostname(zone);
    hostname == zone || hostname.ends_with(&format!(".{}", zone))
}

/// Case-insensitive identity key: `provider:zone:hostname:type`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Build a key from its parts
    pub fn new(provider: &str, zone: &str, hostname: &str, record_type: RecordType) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            provider.to_ascii_lowercase(),
            normalize_hostname(zone),
            normalize_hostname(hostname),
            record_type.as_str().to_ascii_lowercase()
        ))
    }

    /// Parse a key received from an operator, normalizing case
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::validation(format!(
                "Record key must be provider:zone:hostname:type, got '{}'",
                raw
            )));
        }
        let record_type = RecordType::from_str(parts[3])?;
        Ok(Self::new(parts[0], parts[1], parts[2], record_type))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A DNS record in the normalized shape shared by all providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    /// Fully-qualified hostname
    pub hostname: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    /// Time-to-live in seconds
    pub ttl: u32,
    /// Provider-specific proxy flag (Cloudflare orange cloud)
    #[serde(default)]
    pub proxied: bool,
    /// Provider name this record lives at
    pub provider: String,
    /// Zone (domain) this record lives in
    pub zone: String,
    /// MX/SRV priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    /// SRV weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u16>,
    /// SRV port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// CAA flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u8>,
    /// CAA tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl DnsRecord {
    /// Create a record with the type-specific extras unset
    pub fn new(
        provider: impl Into<String>,
        zone: impl Into<String>,
        hostname: &str,
        record_type: RecordType,
        content: impl Into<String>,
        ttl: u32,
    ) -> Self {
        let zone: String = zone.into();
        Self {
            hostname: normalize_hostname(hostname),
            record_type,
            content: content.into(),
            ttl,
            proxied: false,
            provider: provider.into(),
            zone: normalize_hostname(&zone),
            priority: None,
            weight: None,
            port: None,
            flags: None,
            tag: None,
        }
    }

    pub fn with_proxied(mut self, proxied: bool) -> Self {
        self.proxied = proxied;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Identity key of this record
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.provider, &self.zone, &self.hostname, self.record_type)
    }

    /// Check the record is well-formed for its type
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(Error::validation("Hostname cannot be empty"));
        }
        if self.hostname.len() > MAX_HOSTNAME_LEN {
            return Err(Error::validation(format!(
                "Hostname too long: {} chars (max {})",
                self.hostname.len(),
                MAX_HOSTNAME_LEN
            )));
        }
        if self.content.trim().is_empty() {
            return Err(Error::validation(format!(
                "Content cannot be empty for {} record {}",
                self.record_type, self.hostname
            )));
        }
        match self.record_type {
            RecordType::Mx if self.priority.is_none() => Err(Error::validation(format!(
                "MX record {} requires a priority",
                self.hostname
            ))),
            RecordType::Srv
                if self.priority.is_none() || self.weight.is_none() || self.port.is_none() =>
            {
                Err(Error::validation(format!(
                    "SRV record {} requires priority, weight and port",
                    self.hostname
                )))
            }
            RecordType::Caa if self.tag.is_none() => Err(Error::validation(format!(
                "CAA record {} requires a tag",
                self.hostname
            ))),
            _ => Ok(()),
        }
    }

    /// Whether two records carry the same data.
    ///
    /// Hostnames are already normalized; content is compared verbatim.
    /// `proxied` only counts where the provider supports it.
    pub fn same_data(&self, other: &DnsRecord, compare_proxied: bool) -> bool {
        self.content == other.content
            && self.ttl == other.ttl
            && (!compare_proxied || self.proxied == other.proxied)
            && self.priority == other.priority
            && self.weight == other.weight
            && self.port == other.port
            && self.flags == other.flags
            && self.tag == other.tag
    }
}

/// Who owns a tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagedBy {
    /// Created and owned by this system; eligible for orphan cleanup
    #[default]
    System,
    /// Tracked for reconciliation but never auto-deleted
    External,
}

/// A record this system owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedRecord {
    #[serde(flatten)]
    pub record: DnsRecord,
    #[serde(default)]
    pub managed_by: ManagedBy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Set when the record disappeared from desired state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_at: Option<DateTime<Utc>>,
}

impl TrackedRecord {
    pub(crate) fn new(
        record: DnsRecord,
        provider_id: Option<String>,
        source_container_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record,
            managed_by: ManagedBy::System,
            created_at: now,
            updated_at: now,
            source_container_id,
            provider_id,
            orphaned_at: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned_at.is_some()
    }

    /// Orphan view of this record, if it is orphaned
    pub fn orphan_state(&self, now: DateTime<Utc>) -> Option<OrphanState> {
        self.orphaned_at.map(|orphaned_at| OrphanState {
            key: self.key(),
            hostname: self.record.hostname.clone(),
            record_type: self.record.record_type,
            orphaned_at,
            elapsed_seconds: now.signed_duration_since(orphaned_at).num_seconds().max(0),
        })
    }
}

/// A tracked record absent from the latest desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanState {
    pub key: RecordKey,
    pub hostname: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub orphaned_at: DateTime<Utc>,
    pub elapsed_seconds: i64,
}

/// Operator-declared desired entry, independent of any container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedHostname {
    pub hostname: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
}

impl ManagedHostname {
    pub fn new(hostname: &str, record_type: RecordType, content: impl Into<String>) -> Self {
        Self {
            hostname: normalize_hostname(hostname),
            record_type,
            content: content.into(),
            ttl: None,
            proxied: None,
            priority: None,
        }
    }

    /// Parse the legacy `hostname:type:content:ttl:proxied` tuple form
    pub fn parse_tuple(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        if parts.len() < 3 {
            return Err(Error::validation(format!(
                "Managed hostname must be hostname:type:content[:ttl[:proxied]], got '{}'",
                raw
            )));
        }
        let mut managed = Self::new(parts[0], RecordType::from_str(parts[1])?, parts[2].trim());
        if managed.hostname.is_empty() || managed.content.is_empty() {
            return Err(Error::validation(format!(
                "Managed hostname has empty hostname or content: '{}'",
                raw
            )));
        }
        if let Some(ttl) = parts.get(3).filter(|s| !s.trim().is_empty()) {
            managed.ttl = Some(
                ttl.trim()
                    .parse()
                    .map_err(|_| Error::validation(format!("Invalid TTL '{}' in '{}'", ttl, raw)))?,
            );
        }
        if let Some(proxied) = parts.get(4).filter(|s| !s.trim().is_empty()) {
            managed.proxied = Some(parse_bool(proxied).ok_or_else(|| {
                Error::validation(format!("Invalid proxied flag '{}' in '{}'", proxied, raw))
            })?);
        }
        Ok(managed)
    }

    pub fn to_desired(&self) -> DesiredEntry {
        DesiredEntry {
            hostname: self.hostname.clone(),
            record_type: Some(self.record_type),
            content: Some(self.content.clone()),
            ttl: self.ttl,
            proxied: self.proxied,
            priority: self.priority,
            ..DesiredEntry::default()
        }
    }
}

/// One desired-state entry produced by a discovery monitor.
///
/// Omitted fields are resolved from configured defaults by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredEntry {
    pub hostname: String,
    #[serde(rename = "type", default)]
    pub record_type: Option<RecordType>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub proxied: Option<bool>,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub flags: Option<u8>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub source_container_id: Option<String>,
}

impl DesiredEntry {
    /// Entry for `hostname` with everything else defaulted
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: normalize_hostname(hostname),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, record_type: RecordType) -> Self {
        self.record_type = Some(record_type);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_proxied(mut self, proxied: bool) -> Self {
        self.proxied = Some(proxied);
        self
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.source_container_id = Some(container_id.into());
        self
    }
}

/// Parse the boolean spellings accepted in labels and environment variables
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
