//! Schema resolution and the per-binding cache.
//!
//! The resolver is the sole writer of the binding cache. Each
//! `(topic, role)` entry is computed at most once, under single-flight
//! semantics: late callers wait on the in-flight resolution instead of
//! racing a duplicate. A resolution failure is itself a cached outcome,
//! the `binary` fallback, so availability survives a dead registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use kawai_core::{EngineOptions, PrimitiveSerde, Role, SerdeDirective};
use kawai_tx::schema::{parse_schema, ParsedSchema};
use kawai_tx::ResolvedSchema;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::registry::{RegisteredSchema, RegistryClient};

pub struct SchemaResolver {
    registry: Option<RegistryClient>,
    options: EngineOptions,
    bindings: Mutex<HashMap<(String, Role), Arc<OnceCell<Arc<ResolvedSchema>>>>>,
    by_id: Mutex<HashMap<i32, Arc<OnceCell<Option<Arc<ParsedSchema>>>>>>,
    /// Ids handed to inline schemas, which have no registry identity.
    inline_ids: AtomicI32,
}

impl SchemaResolver {
    pub fn new(options: EngineOptions) -> SchemaResolver {
        let registry = options
            .schema_registry_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(RegistryClient::new);
        SchemaResolver {
            registry,
            options,
            bindings: Mutex::new(HashMap::new()),
            by_id: Mutex::new(HashMap::new()),
            inline_ids: AtomicI32::new(0),
        }
    }

    /// Resolve the binding for `(topic, role)`, consulting the cache
    /// first. Never fails: any resolution problem is logged and decays
    /// to the `binary` serde for this binding.
    pub async fn resolve(&self, topic: &str, role: Role) -> Arc<ResolvedSchema> {
        let cell = {
            let mut bindings = self.bindings.lock().expect("binding cache poisoned");
            bindings
                .entry((topic.to_string(), role))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_init(|| self.resolve_uncached(topic, role))
            .await
            .clone()
    }

    async fn resolve_uncached(&self, topic: &str, role: Role) -> Arc<ResolvedSchema> {
        let directive = match self.options.directive(topic, role) {
            Ok(directive) => directive,
            Err(error) => {
                warn!(topic, role = role.as_str(), %error, "bad serde directive, falling back to binary");
                return binary();
            }
        };

        match directive {
            SerdeDirective::Primitive(serde) => Arc::new(ResolvedSchema::Primitive(serde)),

            SerdeDirective::Inline {
                family,
                schema,
                references,
            } => {
                let named: Vec<(String, String)> = references
                    .into_iter()
                    .enumerate()
                    .map(|(position, text)| (format!("ref{position}.proto"), text))
                    .collect();
                match parse_schema(family, &schema, &named) {
                    Ok(parsed) => {
                        let id = self.inline_ids.fetch_sub(1, Ordering::Relaxed) - 1;
                        info!(topic, role = role.as_str(), id, "bound inline schema");
                        Arc::new(ResolvedSchema::Parsed {
                            id,
                            schema: Arc::new(parsed),
                        })
                    }
                    Err(error) => {
                        warn!(topic, role = role.as_str(), %error, "inline schema failed to parse, falling back to binary");
                        binary()
                    }
                }
            }

            SerdeDirective::Latest => {
                let subject = format!("{topic}-{}", role.as_str());
                let fetched = match &self.registry {
                    Some(registry) => registry.latest(&subject).await,
                    None => Err(kawai_core::ResolveError::Unconfigured),
                };
                self.bind_fetched(topic, role, fetched).await
            }

            SerdeDirective::ById(id) => {
                let fetched = match &self.registry {
                    Some(registry) => registry.by_id(id).await,
                    None => Err(kawai_core::ResolveError::Unconfigured),
                };
                self.bind_fetched(topic, role, fetched).await
            }
        }
    }

    async fn bind_fetched(
        &self,
        topic: &str,
        role: Role,
        fetched: Result<RegisteredSchema, kawai_core::ResolveError>,
    ) -> Arc<ResolvedSchema> {
        let registered = match fetched {
            Ok(registered) => registered,
            Err(error) => {
                warn!(topic, role = role.as_str(), %error, "schema resolution failed, falling back to binary");
                return binary();
            }
        };
        match parse_schema(registered.family, &registered.schema, &registered.references) {
            Ok(parsed) => {
                info!(
                    topic,
                    role = role.as_str(),
                    id = registered.id,
                    family = registered.family.registry_name(),
                    "bound registry schema"
                );
                Arc::new(ResolvedSchema::Parsed {
                    id: registered.id,
                    schema: Arc::new(parsed),
                })
            }
            Err(error) => {
                warn!(topic, role = role.as_str(), %error, "registry schema failed to parse, falling back to binary");
                binary()
            }
        }
    }

    /// The parsed schema registered under `id`, for decoding payloads
    /// written with a schema other than the binding's. Lookups are
    /// cached; a failed lookup caches as absent.
    pub async fn schema_for_id(&self, id: i32) -> Option<Arc<ParsedSchema>> {
        let registry = self.registry.as_ref()?;
        let cell = {
            let mut by_id = self.by_id.lock().expect("id cache poisoned");
            by_id
                .entry(id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_init(|| async {
            match registry.by_id(id).await {
                Ok(registered) => {
                    match parse_schema(
                        registered.family,
                        &registered.schema,
                        &registered.references,
                    ) {
                        Ok(parsed) => Some(Arc::new(parsed)),
                        Err(error) => {
                            warn!(id, %error, "writer schema failed to parse");
                            None
                        }
                    }
                }
                Err(error) => {
                    warn!(id, %error, "writer schema lookup failed");
                    None
                }
            }
        })
        .await
        .clone()
    }

    /// The mock scope this resolver's registry lives in, if any.
    pub fn mock_scope(&self) -> Option<&str> {
        self.registry.as_ref().and_then(RegistryClient::mock_scope)
    }
}

fn binary() -> Arc<ResolvedSchema> {
    Arc::new(ResolvedSchema::Primitive(PrimitiveSerde::Binary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{mock_register, mock_reset};
    use kawai_core::SchemaFamily;

    fn options_with_registry(scope: &str, topic: &str, value_serde: &str) -> EngineOptions {
        let mut options = EngineOptions::default();
        options.bootstrap_servers = "localhost:9092".to_string();
        options.topics = vec![topic.to_string()];
        options.schema_registry_url = Some(format!("mock://{scope}"));
        options
            .value_serdes
            .insert(topic.to_string(), value_serde.to_string());
        options
    }

    #[tokio::test]
    async fn latest_binding_is_cached_and_shared() {
        let scope = "resolver-latest";
        mock_reset(scope);
        mock_register(
            scope,
            "t-value",
            SchemaFamily::Json,
            r#"{"type":"int"}"#,
            &[],
        );

        let resolver = SchemaResolver::new(options_with_registry(scope, "t", "latest"));
        let first = resolver.resolve("t", Role::Value).await;
        let second = resolver.resolve("t", Role::Value).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(*first, ResolvedSchema::Parsed { id, .. } if id > 0));
        mock_reset(scope);
    }

    #[tokio::test]
    async fn missing_subject_falls_back_to_binary() {
        let scope = "resolver-fallback";
        mock_reset(scope);
        let resolver = SchemaResolver::new(options_with_registry(scope, "t", "latest"));
        let resolved = resolver.resolve("t", Role::Value).await;
        assert!(matches!(
            *resolved,
            ResolvedSchema::Primitive(PrimitiveSerde::Binary)
        ));
        // The fallback is cached; a late registration does not rebind.
        mock_register(scope, "t-value", SchemaFamily::Json, r#"{"type":"int"}"#, &[]);
        let again = resolver.resolve("t", Role::Value).await;
        assert!(Arc::ptr_eq(&resolved, &again));
        mock_reset(scope);
    }

    #[tokio::test]
    async fn no_registry_means_binary_for_latest() {
        let mut options = EngineOptions::default();
        options.bootstrap_servers = "localhost:9092".to_string();
        options.topics = vec!["t".to_string()];
        let resolver = SchemaResolver::new(options);
        let resolved = resolver.resolve("t", Role::Value).await;
        assert!(matches!(
            *resolved,
            ResolvedSchema::Primitive(PrimitiveSerde::Binary)
        ));
    }

    #[tokio::test]
    async fn inline_schemas_get_negative_ids() {
        let schema = base64::encode(r#"{"type":"int"}"#);
        let mut options = EngineOptions::default();
        options.bootstrap_servers = "localhost:9092".to_string();
        options.topics = vec!["a".to_string(), "b".to_string()];
        options
            .value_serdes
            .insert("a".to_string(), format!("inline:json:{schema}"));
        options
            .value_serdes
            .insert("b".to_string(), format!("inline:json:{schema}"));

        let resolver = SchemaResolver::new(options);
        let first = resolver.resolve("a", Role::Value).await;
        let second = resolver.resolve("b", Role::Value).await;
        let ids: Vec<i32> = [&first, &second]
            .iter()
            .map(|resolved| match ***resolved {
                ResolvedSchema::Parsed { id, .. } => id,
                _ => panic!("expected parsed binding"),
            })
            .collect();
        assert!(ids[0] < 0 && ids[1] < 0);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn keys_default_to_binary_without_lookup() {
        let mut options = EngineOptions::default();
        options.bootstrap_servers = "localhost:9092".to_string();
        options.topics = vec!["t".to_string()];
        let resolver = SchemaResolver::new(options);
        let resolved = resolver.resolve("t", Role::Key).await;
        assert!(matches!(
            *resolved,
            ResolvedSchema::Primitive(PrimitiveSerde::Binary)
        ));
    }
}
