//! Engine configuration.
//!
//! Loaded from a YAML file or assembled programmatically. Option names
//! follow the flat dotted convention of Kafka client configuration so a
//! kawai config reads like a consumer config with a few extra keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::serde_spec::SerdeDirective;
use crate::ConfigError;

/// Topic role: the key half or the value half of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Key,
    Value,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Key => "key",
            Role::Value => "value",
        }
    }
}

/// Recognized engine options. Unrecognized keys belong in `properties`
/// and are forwarded to the log source unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Comma-separated Kafka broker addresses.
    #[serde(rename = "bootstrap.servers", default)]
    pub bootstrap_servers: String,

    /// Topics to ingest. Each becomes one table and one worker.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Registry endpoint; empty or absent disables remote resolution.
    /// The `mock://<scope>` form selects the in-process test registry.
    #[serde(rename = "schema.registry.url", default)]
    pub schema_registry_url: Option<String>,

    /// Per-topic key serde directives; default `binary`.
    #[serde(rename = "key.serdes", default)]
    pub key_serdes: HashMap<String, String>,

    /// Per-topic value serde directives; default `latest`.
    #[serde(rename = "value.serdes", default)]
    pub value_serdes: HashMap<String, String>,

    /// Consumer group id for the log source.
    #[serde(rename = "group.id", default = "default_group_id")]
    pub group_id: String,

    /// DuckDB database path; `:memory:` (the default) keeps everything
    /// in-process, any other value persists across runs.
    #[serde(rename = "db.path", default)]
    pub db_path: Option<String>,

    /// Additional keys forwarded verbatim to the log source client.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

fn default_group_id() -> String {
    "kawai-1".to_string()
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            bootstrap_servers: String::new(),
            topics: Vec::new(),
            schema_registry_url: None,
            key_serdes: HashMap::new(),
            value_serdes: HashMap::new(),
            group_id: default_group_id(),
            db_path: None,
            properties: HashMap::new(),
        }
    }
}

impl EngineOptions {
    pub fn from_yaml(text: &str) -> Result<EngineOptions, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid {
            key: "config".to_string(),
            message: e.to_string(),
        })
    }

    /// Check the options that are fatal when missing. Serde directives are
    /// parsed here too so a typo fails at `init()` rather than mid-ingest.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::Missing("topics"));
        }
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::Missing("bootstrap.servers"));
        }
        for topic in &self.topics {
            self.directive(topic, Role::Key)?;
            self.directive(topic, Role::Value)?;
        }
        Ok(())
    }

    /// The serde directive bound to `(topic, role)`, or its default:
    /// `binary` for keys, `latest` for values.
    pub fn directive(&self, topic: &str, role: Role) -> Result<SerdeDirective, ConfigError> {
        let (map, fallback) = match role {
            Role::Key => (&self.key_serdes, "binary"),
            Role::Value => (&self.value_serdes, "latest"),
        };
        let raw = map.get(topic).map(String::as_str).unwrap_or(fallback);
        SerdeDirective::parse(topic, raw)
    }

    /// True when the registry URL names the in-process mock registry;
    /// yields the mock scope.
    pub fn mock_registry_scope(&self) -> Option<&str> {
        self.schema_registry_url
            .as_deref()
            .and_then(|url| url.strip_prefix("mock://"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde_spec::PrimitiveSerde;

    #[test]
    fn yaml_round_trip_with_defaults() {
        let options = EngineOptions::from_yaml(
            r#"
bootstrap.servers: "localhost:9092"
topics: [t1, t2]
schema.registry.url: "http://localhost:8081"
key.serdes:
  t1: string
value.serdes:
  t2: "id:7"
properties:
  auto.offset.reset: earliest
"#,
        )
        .unwrap();

        assert_eq!(options.group_id, "kawai-1");
        assert_eq!(options.topics, vec!["t1", "t2"]);
        assert_eq!(
            options.directive("t1", Role::Key).unwrap(),
            SerdeDirective::Primitive(PrimitiveSerde::String)
        );
        // Unbound roles fall back: binary keys, latest values.
        assert_eq!(
            options.directive("t2", Role::Key).unwrap(),
            SerdeDirective::Primitive(PrimitiveSerde::Binary)
        );
        assert_eq!(
            options.directive("t1", Role::Value).unwrap(),
            SerdeDirective::Latest
        );
        assert_eq!(
            options.directive("t2", Role::Value).unwrap(),
            SerdeDirective::ById(7)
        );
        assert_eq!(
            options.properties.get("auto.offset.reset").map(String::as_str),
            Some("earliest")
        );
        options.validate().unwrap();
    }

    #[test]
    fn missing_topics_is_fatal() {
        let options = EngineOptions::from_yaml("bootstrap.servers: localhost:9092").unwrap();
        assert!(matches!(
            options.validate(),
            Err(ConfigError::Missing("topics"))
        ));
    }

    #[test]
    fn bad_directive_is_fatal() {
        let mut options = EngineOptions::default();
        options.bootstrap_servers = "localhost:9092".to_string();
        options.topics = vec!["t".to_string()];
        options
            .value_serdes
            .insert("t".to_string(), "csv".to_string());
        assert!(matches!(
            options.validate(),
            Err(ConfigError::BadDirective { .. })
        ));
    }

    #[test]
    fn mock_scope_detection() {
        let mut options = EngineOptions::default();
        assert_eq!(options.mock_registry_scope(), None);
        options.schema_registry_url = Some("mock://unit".to_string());
        assert_eq!(options.mock_registry_scope(), Some("unit"));
    }
}
