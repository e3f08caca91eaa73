//! Splits a kubeconfig document into independent per-context configurations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::error::{ContextError, KubeconfigError};
use super::types::{
    Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext, KUBECONFIG_API_VERSION,
    KUBECONFIG_KIND,
};

/// Outcome of resolving one named context.
pub type ContextParse = Result<RawContextConfig, ContextError>;

/// One context resolved against its cluster and user entries.
#[derive(Debug, Clone, PartialEq)]
pub struct RawContextConfig {
    pub context_name: String,
    pub source_file_path: PathBuf,
    pub context: NamedContext,
    pub cluster: NamedCluster,
    pub user: NamedAuthInfo,
    /// Whether the document's `current-context` names this context.
    pub is_current: bool,
}

impl RawContextConfig {
    pub fn server(&self) -> Option<&str> {
        self.cluster.cluster.server.as_deref()
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster.name
    }

    pub fn user_name(&self) -> &str {
        &self.user.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.context.context.namespace.as_deref()
    }

    /// Renders this context as a standalone kubeconfig holding exactly one
    /// cluster, user and context, with the context selected as current.
    pub fn to_kubeconfig(&self) -> Kubeconfig {
        Kubeconfig {
            api_version: Some(KUBECONFIG_API_VERSION.to_string()),
            kind: Some(KUBECONFIG_KIND.to_string()),
            clusters: vec![self.cluster.clone()],
            users: vec![self.user.clone()],
            contexts: vec![self.context.clone()],
            current_context: Some(self.context_name.clone()),
        }
    }
}

/// A cluster or user entry, keyed by name while resolving references.
enum Slot<T> {
    Valid(T),
    Malformed(String),
}

#[derive(Default)]
struct Sections {
    clusters: Vec<Value>,
    users: Vec<Value>,
    contexts: Vec<Value>,
    current_context: Option<String>,
}

/// Parses raw kubeconfig text into one entry per named context.
///
/// Fails only when the document as a whole is unusable; a context whose
/// cluster or user cannot be resolved yields an `Err` entry and its siblings
/// are still returned.
pub fn parse_kubeconfig(raw: &str, source: &Path) -> Result<Vec<ContextParse>, KubeconfigError> {
    let sections = load_sections(raw, source)?;

    let clusters: HashMap<String, Slot<NamedCluster>> = index_entries(&sections.clusters);
    let users: HashMap<String, Slot<NamedAuthInfo>> = index_entries(&sections.users);

    let mut seen: Vec<String> = Vec::new();
    let mut results = Vec::with_capacity(sections.contexts.len());

    for (index, entry) in sections.contexts.iter().enumerate() {
        let context = match serde_yaml::from_value::<NamedContext>(entry.clone()) {
            Ok(context) => context,
            Err(e) => {
                let label = entry_name(entry).unwrap_or_else(|| format!("contexts[{}]", index));
                results.push(Err(ContextError::MalformedContext {
                    context: label,
                    reason: e.to_string(),
                }));
                continue;
            }
        };

        if seen.contains(&context.name) {
            results.push(Err(ContextError::Duplicate {
                context: context.name,
            }));
            continue;
        }
        seen.push(context.name.clone());

        results.push(resolve_context(
            context,
            &clusters,
            &users,
            sections.current_context.as_deref(),
            source,
        ));
    }

    Ok(results)
}

fn resolve_context(
    context: NamedContext,
    clusters: &HashMap<String, Slot<NamedCluster>>,
    users: &HashMap<String, Slot<NamedAuthInfo>>,
    current_context: Option<&str>,
    source: &Path,
) -> ContextParse {
    let cluster = match context.context.cluster.as_deref().map(|n| (n, clusters.get(n))) {
        Some((_, Some(Slot::Valid(cluster)))) => cluster.clone(),
        Some((name, Some(Slot::Malformed(reason)))) => {
            return Err(ContextError::MalformedCluster {
                context: context.name,
                cluster: name.to_string(),
                reason: reason.clone(),
            })
        }
        Some((name, None)) => {
            return Err(ContextError::MissingCluster {
                cluster: Some(name.to_string()),
                context: context.name,
            })
        }
        None => {
            return Err(ContextError::MissingCluster {
                context: context.name,
                cluster: None,
            })
        }
    };

    let user = match context.context.user.as_deref().map(|n| (n, users.get(n))) {
        Some((_, Some(Slot::Valid(user)))) => user.clone(),
        Some((name, Some(Slot::Malformed(reason)))) => {
            return Err(ContextError::MalformedUser {
                context: context.name,
                user: name.to_string(),
                reason: reason.clone(),
            })
        }
        Some((name, None)) => {
            return Err(ContextError::MissingUser {
                user: Some(name.to_string()),
                context: context.name,
            })
        }
        None => {
            return Err(ContextError::MissingUser {
                context: context.name,
                user: None,
            })
        }
    };

    Ok(RawContextConfig {
        is_current: current_context == Some(context.name.as_str()),
        context_name: context.name.clone(),
        source_file_path: source.to_path_buf(),
        context,
        cluster,
        user,
    })
}

/// Reads every YAML document in `raw` and concatenates their sections.
fn load_sections(raw: &str, source: &Path) -> Result<Sections, KubeconfigError> {
    let mut sections = Sections::default();
    let mut mappings = 0usize;

    for document in serde_yaml::Deserializer::from_str(raw) {
        let value = Value::deserialize(document).map_err(|e| KubeconfigError::ParseYaml {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;

        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            // Stray `---` separators produce empty documents.
            Value::Null => continue,
            _ => {
                return Err(KubeconfigError::InvalidRoot {
                    path: source.to_path_buf(),
                })
            }
        };
        mappings += 1;

        sections
            .clusters
            .extend(list_field(&mapping, "clusters", source)?);
        sections.users.extend(list_field(&mapping, "users", source)?);
        sections
            .contexts
            .extend(list_field(&mapping, "contexts", source)?);

        if sections.current_context.is_none() {
            sections.current_context = mapping
                .get("current-context")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }
    }

    if mappings == 0 {
        return Err(KubeconfigError::InvalidRoot {
            path: source.to_path_buf(),
        });
    }

    Ok(sections)
}

fn list_field(
    mapping: &Mapping,
    field: &'static str,
    source: &Path,
) -> Result<Vec<Value>, KubeconfigError> {
    match mapping.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => Ok(items.clone()),
        Some(_) => Err(KubeconfigError::InvalidList {
            path: source.to_path_buf(),
            field,
        }),
    }
}

/// Indexes named entries; the first entry for a name wins.
fn index_entries<T: DeserializeOwned>(entries: &[Value]) -> HashMap<String, Slot<T>> {
    let mut index = HashMap::new();

    for entry in entries {
        let Some(name) = entry_name(entry) else {
            tracing::debug!("Skipping kubeconfig entry without a name");
            continue;
        };

        if index.contains_key(&name) {
            continue;
        }

        let slot = match serde_yaml::from_value::<T>(entry.clone()) {
            Ok(parsed) => Slot::Valid(parsed),
            Err(e) => Slot::Malformed(e.to_string()),
        };
        index.insert(name, slot);
    }

    index
}

fn entry_name(entry: &Value) -> Option<String> {
    entry
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
