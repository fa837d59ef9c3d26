//! Backend connections and the model table
//!
//! Configuration names backends in two places: explicit connections (id to address) and model
//! entries that point at a connection either by id or directly by address. Reconciliation turns
//! both into one canonical connection map in which every model is bound to a concrete id.
use crate::client::{HttpClient, OllamaClient};
use crate::errors::RouterError;
use crate::router::{ConnectionId, ModelId, Router, RouterOptions};
use crate::traits::Backend;
use anyhow::anyhow;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// A backend server. An empty `id` takes the key it is registered under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct ConnectionConfig {
    #[serde(default)]
    #[builder(default, into)]
    pub id: ConnectionId,
    #[builder(into)]
    pub url: String,
}

/// Where a model is served. Before reconciliation `connection_id` may also be a backend URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub connection_id: ConnectionId,
}

/// The configuration file, and what the command line builds up.
///
/// ```json
/// {
///   "connections": {"gpu-1": {"url": "http://gpu-1:11434"}},
///   "models": {
///     "llama3.2": {"connection_id": "gpu-1"},
///     "qwen2.5:7b": {"connection_id": "http://gpu-2:11434"}
///   },
///   "aliases": {"fast": "llama3.2"},
///   "expose_aliases": true
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub connections: Option<HashMap<ConnectionId, ConnectionConfig>>,
    #[serde(default)]
    pub models: Option<HashMap<ModelId, ModelConfig>>,
    #[serde(default)]
    pub aliases: BTreeMap<String, ModelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_aliases: Option<bool>,
}

/// Validated connections and a model table whose every entry names one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub connections: BTreeMap<ConnectionId, Url>,
    pub models: HashMap<ModelId, ModelConfig>,
}

impl RouterConfig {
    pub async fn from_file(config_path: &Path) -> Result<Self, anyhow::Error> {
        let contents = tokio::fs::read_to_string(config_path).await.map_err(|e| {
            anyhow!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            )
        })?;

        let config: RouterConfig = serde_json::from_str(&contents).map_err(|e| {
            anyhow!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            )
        })?;

        info!(
            "Loaded {} connections and {} models from {}",
            config.connections.as_ref().map_or(0, HashMap::len),
            config.models.as_ref().map_or(0, HashMap::len),
            config_path.display()
        );
        Ok(config)
    }

    pub fn reconcile(&self) -> Result<Reconciled, RouterError> {
        let connections = self
            .connections
            .as_ref()
            .ok_or_else(|| RouterError::config("missing connections config"))?;
        let models = self
            .models
            .as_ref()
            .ok_or_else(|| RouterError::config("missing models config"))?;
        if models.is_empty() {
            return Err(RouterError::config("empty models config"));
        }

        let mut declared: Vec<(&ConnectionId, &ConnectionConfig)> = connections.iter().collect();
        declared.sort_by(|a, b| a.0.cmp(b.0));

        let mut canonical: BTreeMap<ConnectionId, Url> = BTreeMap::new();
        for (id, connection) in declared {
            if !connection.id.is_empty() && connection.id != *id {
                return Err(RouterError::config(format!(
                    "connection id mismatch: {id} != {}",
                    connection.id
                )));
            }
            if connection.url.is_empty() {
                return Err(RouterError::config(format!(
                    "connection {id} has an empty url"
                )));
            }
            let url = parse_backend_url(&connection.url).ok_or_else(|| {
                RouterError::config(format!("invalid connection url: {}", connection.url))
            })?;
            canonical.insert(id.clone(), url);
        }

        let mut ordered: Vec<(&ModelId, &ModelConfig)> = models.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        let mut bound = HashMap::with_capacity(ordered.len());
        for (model, config) in ordered {
            let reference = &config.connection_id;
            let connection_id = if canonical.contains_key(reference) {
                reference.clone()
            } else if let Some(url) = parse_backend_url(reference) {
                // Ids iterate in order, so a shared address resolves to the smallest id
                match canonical.iter().find(|(_, known)| **known == url) {
                    Some((id, _)) => id.clone(),
                    None => {
                        debug!(connection_id = %reference, "adding connection for model {model}");
                        canonical.insert(reference.clone(), url);
                        reference.clone()
                    }
                }
            } else {
                return Err(RouterError::config(format!(
                    "invalid connection id/url: {reference}"
                )));
            };
            bound.insert(model.clone(), ModelConfig { connection_id });
        }

        Ok(Reconciled {
            connections: canonical,
            models: bound,
        })
    }

    /// Reconciles the configuration and builds a router with one client per connection.
    pub fn into_router<T>(self, http: T) -> Result<Router, RouterError>
    where
        T: HttpClient + Clone + Send + Sync + 'static,
    {
        let reconciled = self.reconcile()?;
        let connections = init_clients(&reconciled.connections, http);
        let options = RouterOptions::builder()
            .aliases(self.aliases)
            .maybe_expose_aliases(self.expose_aliases)
            .build();
        Router::new(connections, reconciled.models, options)
    }
}

/// One [`OllamaClient`] per connection, all sharing the same HTTP client and its pool.
pub fn init_clients<T>(
    connections: &BTreeMap<ConnectionId, Url>,
    http: T,
) -> HashMap<ConnectionId, Arc<dyn Backend>>
where
    T: HttpClient + Clone + Send + Sync + 'static,
{
    connections
        .iter()
        .map(|(id, url)| {
            debug!(connection_id = %id, url = %url, "creating backend client");
            let client: Arc<dyn Backend> = Arc::new(OllamaClient::new(url.clone(), http.clone()));
            (id.clone(), client)
        })
        .collect()
}

/// An absolute http or https URL with a host.
pub fn parse_backend_url(s: &str) -> Option<Url> {
    Url::parse(s)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
}
