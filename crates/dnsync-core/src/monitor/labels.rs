//! Container label conventions
//!
//! With the default prefixes:
//!
//! ```text
//! traefik.http.routers.<name>.rule = Host(`app.example.com`)
//! dns.hostname = extra.example.com,other.example.com
//! dns.type / dns.content / dns.ttl / dns.proxied
//! dns.priority / dns.weight / dns.port / dns.flags / dns.tag
//! dns.skip = true            ignore this container
//! dns.manage = true          opt in when DNS_DEFAULT_MANAGE is off
//! dns.cloudflare.ttl = 120   provider-scoped, wins over dns.ttl
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

use crate::record::{DesiredEntry, RecordType, normalize_hostname, parse_bool};

const HOST_MATCHER: &str = "Host(";

/// Hostnames from every `Host(...)` matcher in a router rule.
///
/// `HostRegexp` and `HostSNI` matchers are ignored.
pub fn parse_host_rule(rule: &str) -> Vec<String> {
    let mut hosts = Vec::new();
    let mut rest = rule;

    while let Some(idx) = rest.find(HOST_MATCHER) {
        let preceded_by_ident = rest[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        let after = &rest[idx + HOST_MATCHER.len()..];
        let Some(end) = after.find(')') else {
            break;
        };

        if !preceded_by_ident {
            for arg in after[..end].split(',') {
                let host = arg.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
                let host = normalize_hostname(host);
                if !host.is_empty() && !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
        rest = &after[end + 1..];
    }
    hosts
}

/// `(router name, rule)` pairs declared in `<proxy_prefix>http.routers.<name>.rule` labels
pub fn router_rules<'a>(labels: &'a BTreeMap<String, String>, proxy_prefix: &str) -> Vec<(&'a str, &'a str)> {
    let prefix = format!("{}http.routers.", proxy_prefix);
    labels
        .iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(&prefix)?.strip_suffix(".rule")?;
            (!name.is_empty() && !name.contains('.')).then_some((name, value.as_str()))
        })
        .collect()
}

/// DNS settings a container declares through labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsLabels {
    pub hostnames: Vec<String>,
    pub record_type: Option<RecordType>,
    pub content: Option<String>,
    pub ttl: Option<u32>,
    pub proxied: Option<bool>,
    pub priority: Option<u16>,
    pub weight: Option<u16>,
    pub port: Option<u16>,
    pub flags: Option<u8>,
    pub tag: Option<String>,
    pub skip: bool,
    pub manage: Option<bool>,
}

impl DnsLabels {
    /// Read labels under `dns_prefix`, letting `<dns_prefix><provider>.<key>`
    /// override `<dns_prefix><key>`
    pub fn from_labels(labels: &BTreeMap<String, String>, dns_prefix: &str, provider: &str) -> Self {
        let scoped_prefix = format!("{}{}.", dns_prefix, provider.to_ascii_lowercase());
        let get = |key: &str| -> Option<&str> {
            labels
                .get(&format!("{}{}", scoped_prefix, key))
                .or_else(|| labels.get(&format!("{}{}", dns_prefix, key)))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let hostnames = get("hostname")
            .map(|v| {
                v.split(',')
                    .map(normalize_hostname)
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            hostnames,
            record_type: get("type").and_then(|v| parse_label("type", v)),
            content: get("content").map(str::to_string),
            ttl: get("ttl").and_then(|v| parse_label("ttl", v)),
            proxied: get("proxied").and_then(|v| parse_flag("proxied", v)),
            priority: get("priority").and_then(|v| parse_label("priority", v)),
            weight: get("weight").and_then(|v| parse_label("weight", v)),
            port: get("port").and_then(|v| parse_label("port", v)),
            flags: get("flags").and_then(|v| parse_label("flags", v)),
            tag: get("tag").map(str::to_string),
            skip: get("skip").and_then(|v| parse_flag("skip", v)).unwrap_or(false),
            manage: get("manage").and_then(|v| parse_flag("manage", v)),
        }
    }

    /// Whether the container's hostnames should be managed at all
    pub fn is_managed(&self, default_manage: bool) -> bool {
        !self.skip && self.manage.unwrap_or(default_manage)
    }

    /// Desired entry for `hostname` carrying these overrides
    pub fn entry(&self, hostname: &str, container_id: Option<&str>) -> DesiredEntry {
        DesiredEntry {
            hostname: normalize_hostname(hostname),
            record_type: self.record_type,
            content: self.content.clone(),
            ttl: self.ttl,
            proxied: self.proxied,
            priority: self.priority,
            weight: self.weight,
            port: self.port,
            flags: self.flags,
            tag: self.tag.clone(),
            source_container_id: container_id.map(str::to_string),
        }
    }
}

fn parse_label<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(label = key, value = raw, "Ignoring invalid label value");
            None
        }
    }
}

fn parse_flag(key: &str, raw: &str) -> Option<bool> {
    let parsed = parse_bool(raw);
    if parsed.is_none() {
        warn!(label = key, value = raw, "Ignoring invalid boolean label");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_host_rule_variants() {
        assert_eq!(parse_host_rule("Host(`app.example.com`)"), vec!["app.example.com"]);
        assert_eq!(
            parse_host_rule("Host(`a.example.com`) || Host(\"B.example.com\", 'c.example.com')"),
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
        assert_eq!(
            parse_host_rule("Host(`a.example.com`) && PathPrefix(`/api`)"),
            vec!["a.example.com"]
        );
        assert!(parse_host_rule("HostRegexp(`{sub:[a-z]+}.example.com`)").is_empty());
        assert!(parse_host_rule("HostSNI(`*`)").is_empty());
        assert!(parse_host_rule("Host(`unterminated").is_empty());
    }

    #[test]
    fn test_router_rules_from_labels() {
        let labels = labels(&[
            ("traefik.enable", "true"),
            ("traefik.http.routers.web.rule", "Host(`web.example.com`)"),
            ("traefik.http.routers.web.entrypoints", "https"),
            ("traefik.http.services.web.loadbalancer.server.port", "80"),
        ]);
        assert_eq!(
            router_rules(&labels, "traefik."),
            vec![("web", "Host(`web.example.com`)")]
        );
    }

    #[test]
    fn test_provider_scoped_labels_win() {
        let labels = labels(&[
            ("dns.ttl", "300"),
            ("dns.cloudflare.ttl", "120"),
            ("dns.type", "a"),
            ("dns.content", "10.0.0.1"),
            ("dns.hostname", "extra.example.com, Other.example.com"),
            ("dns.proxied", "nope"),
        ]);
        let parsed = DnsLabels::from_labels(&labels, "dns.", "cloudflare");

        assert_eq!(parsed.ttl, Some(120));
        assert_eq!(parsed.record_type, Some(RecordType::A));
        assert_eq!(parsed.hostnames, vec!["extra.example.com", "other.example.com"]);
        assert_eq!(parsed.proxied, None);

        let other = DnsLabels::from_labels(&labels, "dns.", "digitalocean");
        assert_eq!(other.ttl, Some(300));
    }

    #[test]
    fn test_manage_and_skip() {
        let none = DnsLabels::default();
        assert!(none.is_managed(true));
        assert!(!none.is_managed(false));

        let opted_in = DnsLabels::from_labels(&labels(&[("dns.manage", "true")]), "dns.", "cf");
        assert!(opted_in.is_managed(false));

        let skipped = DnsLabels::from_labels(&labels(&[("dns.skip", "true"), ("dns.manage", "true")]), "dns.", "cf");
        assert!(!skipped.is_managed(true));
    }
}
