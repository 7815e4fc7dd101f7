//! Persisted document schemas and their validators

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::record::{ManagedHostname, RecordType, TrackedRecord};

/// One JSON document in the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    /// Array of tracked records
    Records,
    /// Array of hostname strings
    PreservedHostnames,
    /// Array of managed hostname objects
    ManagedHostnames,
    /// Runtime configuration object
    Config,
}

impl Schema {
    pub const ALL: [Schema; 4] = [
        Schema::Records,
        Schema::PreservedHostnames,
        Schema::ManagedHostnames,
        Schema::Config,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Schema::Records => "dns-records.json",
            Schema::PreservedHostnames => "preserved-hostnames.json",
            Schema::ManagedHostnames => "managed-hostnames.json",
            Schema::Config => "config.json",
        }
    }

    /// Value of a document that was never written
    pub fn empty_value(&self) -> Value {
        match self {
            Schema::Config => Value::Object(Default::default()),
            _ => Value::Array(Vec::new()),
        }
    }

    /// Check `value` is a well-formed document for this schema
    pub fn validate(&self, value: &Value) -> Result<()> {
        match self {
            Schema::Records => validate_records(value),
            Schema::PreservedHostnames => validate_preserved(value),
            Schema::ManagedHostnames => validate_managed(value),
            Schema::Config => validate_config(value),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

fn as_array<'a>(schema: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| Error::validation(format!("{} must be an array", schema)))
}

fn validate_records(value: &Value) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, item) in as_array("records", value)?.iter().enumerate() {
        let tracked: TrackedRecord = serde_json::from_value(item.clone())
            .map_err(|e| Error::validation(format!("records[{}] is not a tracked record: {}", i, e)))?;
        tracked
            .record
            .validate()
            .map_err(|e| Error::validation(format!("records[{}]: {}", i, e)))?;
        if !seen.insert(tracked.key()) {
            return Err(Error::validation(format!(
                "records[{}]: duplicate identity key {}",
                i,
                tracked.key()
            )));
        }
    }
    Ok(())
}

fn validate_preserved(value: &Value) -> Result<()> {
    for (i, item) in as_array("preserved hostnames", value)?.iter().enumerate() {
        match item.as_str() {
            Some(s) if !s.trim().is_empty() => {}
            _ => {
                return Err(Error::validation(format!(
                    "preserved hostnames[{}] must be a non-empty string",
                    i
                )));
            }
        }
    }
    Ok(())
}

fn validate_managed(value: &Value) -> Result<()> {
    for (i, item) in as_array("managed hostnames", value)?.iter().enumerate() {
        let obj = item.as_object().ok_or_else(|| {
            Error::validation(format!("managed hostnames[{}] must be an object", i))
        })?;
        for field in ["hostname", "type", "content"] {
            match obj.get(field).and_then(Value::as_str) {
                Some(s) if !s.trim().is_empty() => {}
                _ => {
                    return Err(Error::validation(format!(
                        "managed hostnames[{}] must have a non-empty string '{}'",
                        i, field
                    )));
                }
            }
        }
        if let Some(t) = obj.get("type").and_then(Value::as_str) {
            t.parse::<RecordType>()
                .map_err(|e| Error::validation(format!("managed hostnames[{}]: {}", i, e)))?;
        }
        serde_json::from_value::<ManagedHostname>(item.clone())
            .map_err(|e| Error::validation(format!("managed hostnames[{}]: {}", i, e)))?;
    }
    Ok(())
}

fn validate_config(value: &Value) -> Result<()> {
    if !value.is_object() {
        return Err(Error::validation("config must be an object"));
    }
    serde_json::from_value::<RuntimeConfig>(value.clone())
        .map_err(|e| Error::validation(format!("config: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_managed_hostnames_require_fields() {
        let ok = json!([{ "hostname": "api.example.com", "type": "A", "content": "1.2.3.4" }]);
        assert!(Schema::ManagedHostnames.validate(&ok).is_ok());

        let missing = json!([{ "hostname": "api.example.com", "type": "A" }]);
        assert!(Schema::ManagedHostnames.validate(&missing).is_err());

        let bad_type = json!([{ "hostname": "api.example.com", "type": "NS", "content": "x" }]);
        assert!(Schema::ManagedHostnames.validate(&bad_type).is_err());

        assert!(Schema::ManagedHostnames.validate(&json!({})).is_err());
    }

    #[test]
    fn test_records_reject_duplicates() {
        let record = json!({
            "hostname": "app.example.com",
            "type": "A",
            "content": "1.2.3.4",
            "ttl": 300,
            "provider": "cloudflare",
            "zone": "example.com",
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-01T00:00:00Z"
        });
        assert!(Schema::Records.validate(&json!([record.clone()])).is_ok());
        assert!(Schema::Records.validate(&json!([record.clone(), record])).is_err());
    }

    #[test]
    fn test_preserved_and_config_shapes() {
        assert!(Schema::PreservedHostnames.validate(&json!(["a.example.com"])).is_ok());
        assert!(Schema::PreservedHostnames.validate(&json!([""])).is_err());
        assert!(Schema::PreservedHostnames.validate(&json!([1])).is_err());

        assert!(Schema::Config.validate(&json!({ "operationMode": "direct" })).is_ok());
        assert!(Schema::Config.validate(&json!({ "operationMode": "sideways" })).is_err());
        assert!(Schema::Config.validate(&json!([])).is_err());
    }
}
