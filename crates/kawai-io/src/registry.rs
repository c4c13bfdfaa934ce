//! Confluent-compatible schema registry client.
//!
//! Speaks the subset of the REST surface the resolver needs: latest
//! version by subject, schema by id, and subject/version lookups for
//! reference resolution. A `mock://<scope>` URL selects an in-process
//! registry whose state is dropped when the engine closes.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use kawai_core::{ResolveError, SchemaFamily};
use serde::Deserialize;

/// A schema fetched from the registry, with every reference it names
/// already resolved to source text.
#[derive(Debug, Clone)]
pub struct RegisteredSchema {
    pub id: i32,
    pub family: SchemaFamily,
    pub schema: String,
    /// `(name, source)` pairs, dependency-first.
    pub references: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    id: i32,
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    schema: String,
    #[serde(default)]
    references: Vec<ReferenceResponse>,
}

#[derive(Debug, Deserialize)]
struct ByIdResponse {
    #[serde(rename = "schemaType")]
    schema_type: Option<String>,
    schema: String,
    #[serde(default)]
    references: Vec<ReferenceResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReferenceResponse {
    name: String,
    subject: String,
    version: i32,
}

enum Backend {
    Http {
        base: String,
        http: reqwest::Client,
    },
    Mock {
        scope: String,
    },
}

pub struct RegistryClient {
    backend: Backend,
}

impl RegistryClient {
    pub fn new(url: &str) -> RegistryClient {
        let backend = match url.strip_prefix("mock://") {
            Some(scope) => Backend::Mock {
                scope: scope.to_string(),
            },
            None => Backend::Http {
                base: url.trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
            },
        };
        RegistryClient { backend }
    }

    pub fn mock_scope(&self) -> Option<&str> {
        match &self.backend {
            Backend::Mock { scope } => Some(scope),
            Backend::Http { .. } => None,
        }
    }

    /// Latest schema registered under `subject`.
    pub async fn latest(&self, subject: &str) -> Result<RegisteredSchema, ResolveError> {
        match &self.backend {
            Backend::Mock { scope } => mock_lookup(scope, |state| {
                state.by_subject.get(subject).cloned()
            })
            .ok_or_else(|| ResolveError::NotFound(subject.to_string())),
            Backend::Http { base, http } => {
                let url = format!("{base}/subjects/{subject}/versions/latest");
                let response: VersionResponse = get_json(http, &url, || {
                    ResolveError::NotFound(subject.to_string())
                })
                .await?;
                let references = self.resolve_references(response.references).await?;
                Ok(RegisteredSchema {
                    id: response.id,
                    family: family_of(response.schema_type.as_deref()),
                    schema: response.schema,
                    references,
                })
            }
        }
    }

    /// Schema registered under the given id.
    pub async fn by_id(&self, id: i32) -> Result<RegisteredSchema, ResolveError> {
        match &self.backend {
            Backend::Mock { scope } => mock_lookup(scope, |state| state.by_id.get(&id).cloned())
                .ok_or(ResolveError::IdNotFound(id)),
            Backend::Http { base, http } => {
                let url = format!("{base}/schemas/ids/{id}");
                let response: ByIdResponse =
                    get_json(http, &url, || ResolveError::IdNotFound(id)).await?;
                let references = self.resolve_references(response.references).await?;
                Ok(RegisteredSchema {
                    id,
                    family: family_of(response.schema_type.as_deref()),
                    schema: response.schema,
                    references,
                })
            }
        }
    }

    /// Fetch every referenced subject/version, breadth-first, and return
    /// the sources dependency-first so parsers see definitions before
    /// their uses.
    async fn resolve_references(
        &self,
        references: Vec<ReferenceResponse>,
    ) -> Result<Vec<(String, String)>, ResolveError> {
        let (base, http) = match &self.backend {
            Backend::Http { base, http } => (base, http),
            Backend::Mock { .. } => return Ok(Vec::new()),
        };

        let mut queue: Vec<ReferenceResponse> = references;
        let mut ordered: Vec<(String, String)> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        while let Some(reference) = queue.pop() {
            if seen.contains(&reference.name) {
                continue;
            }
            seen.push(reference.name.clone());

            let url = format!(
                "{base}/subjects/{}/versions/{}",
                reference.subject, reference.version
            );
            let subject = reference.subject.clone();
            let response: VersionResponse =
                get_json(http, &url, move || ResolveError::NotFound(subject)).await?;
            ordered.insert(0, (reference.name, response.schema));
            queue.extend(response.references);
        }
        Ok(ordered)
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    not_found: impl FnOnce() -> ResolveError,
) -> Result<T, ResolveError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| ResolveError::Request(e.to_string()))?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(not_found());
    }
    let response = response
        .error_for_status()
        .map_err(|e| ResolveError::Request(e.to_string()))?;
    response
        .json()
        .await
        .map_err(|e| ResolveError::Request(e.to_string()))
}

fn family_of(schema_type: Option<&str>) -> SchemaFamily {
    // Absent schemaType means Avro by registry convention.
    schema_type
        .and_then(SchemaFamily::from_registry_name)
        .unwrap_or(SchemaFamily::Avro)
}

// ---- in-process mock registry -------------------------------------------

#[derive(Default)]
struct MockScope {
    next_id: i32,
    by_subject: HashMap<String, RegisteredSchema>,
    by_id: HashMap<i32, RegisteredSchema>,
}

static MOCK_SCOPES: OnceLock<Mutex<HashMap<String, MockScope>>> = OnceLock::new();

fn mock_scopes() -> &'static Mutex<HashMap<String, MockScope>> {
    MOCK_SCOPES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn mock_lookup<T>(scope: &str, f: impl FnOnce(&MockScope) -> Option<T>) -> Option<T> {
    let scopes = mock_scopes().lock().expect("mock registry poisoned");
    scopes.get(scope).and_then(f)
}

/// Register a schema in a mock scope; returns its assigned id.
pub fn mock_register(
    scope: &str,
    subject: &str,
    family: SchemaFamily,
    schema: &str,
    references: &[(String, String)],
) -> i32 {
    let mut scopes = mock_scopes().lock().expect("mock registry poisoned");
    let state = scopes.entry(scope.to_string()).or_default();
    state.next_id += 1;
    let registered = RegisteredSchema {
        id: state.next_id,
        family,
        schema: schema.to_string(),
        references: references.to_vec(),
    };
    state.by_subject.insert(subject.to_string(), registered.clone());
    state.by_id.insert(registered.id, registered);
    state.next_id
}

/// Drop all state registered under a mock scope.
pub fn mock_reset(scope: &str) {
    let mut scopes = mock_scopes().lock().expect("mock registry poisoned");
    scopes.remove(scope);
}
