//! Model-aware routing across several backend connections
//!
//! A [`Router`] is built once from a validated connection map and model table. Requests that
//! name a model are forwarded to the one connection that owns it; administrative queries fan
//! out to every connection and are merged into a single answer.
use crate::api::{
    ChatRequest, ChatResponse, CopyRequest, CreateRequest, DeleteRequest, EmbedRequest,
    EmbedResponse, EmbeddingRequest, EmbeddingResponse, GenerateRequest, GenerateResponse,
    ListResponse, ModelEntry, ProcessResponse, ProgressResponse, PullRequest, PushRequest,
    ShowRequest, ShowResponse,
};
use crate::connection::ModelConfig;
use crate::errors::{RouterError, Unsupported};
use crate::name;
use crate::traits::{Backend, EventStream};
use async_trait::async_trait;
use axum::http::StatusCode;
use bon::Builder;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

pub type ConnectionId = String;
pub type ModelId = String;

/// Construction options for a [`Router`].
#[derive(Debug, Clone, Builder)]
pub struct RouterOptions {
    /// Alias name to the concrete model it stands for.
    #[builder(default)]
    pub aliases: BTreeMap<String, ModelId>,

    /// Whether list and ps answers carry one extra entry per alias.
    #[builder(default = true)]
    pub expose_aliases: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
pub struct Router {
    connections: HashMap<ConnectionId, Arc<dyn Backend>>,
    models: HashMap<ModelId, ModelConfig>,
    /// Every accepted spelling of the models each connection serves, keyed to the canonical id.
    models_by_connection: HashMap<ConnectionId, HashMap<String, ModelId>>,
    all_to_model: HashMap<String, ModelId>,
    alias_to_model: HashMap<String, ModelId>,
    model_to_aliases: HashMap<ModelId, Vec<String>>,
    expose_aliases: bool,
}

impl Router {
    pub fn new(
        connections: HashMap<ConnectionId, Arc<dyn Backend>>,
        models: HashMap<ModelId, ModelConfig>,
        options: RouterOptions,
    ) -> Result<Self, RouterError> {
        if connections.is_empty() {
            return Err(RouterError::config("empty connections config"));
        }

        let mut ordered: Vec<(&ModelId, &ModelConfig)> = models.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));

        let mut spellings = Vec::with_capacity(ordered.len());
        for (id, config) in &ordered {
            if config.connection_id.is_empty() {
                return Err(RouterError::config(format!(
                    "empty connection id for model {id}"
                )));
            }
            if !connections.contains_key(&config.connection_id) {
                return Err(RouterError::config(format!(
                    "unknown connection id for model {id}"
                )));
            }
            let Some(display) = name::shortest(id) else {
                return Err(RouterError::config(format!("invalid model name: {id}")));
            };
            spellings.push((*id, &config.connection_id, display));
        }

        let mut all_to_model = HashMap::new();
        let mut models_by_connection: HashMap<ConnectionId, HashMap<String, ModelId>> =
            HashMap::new();
        // Display forms go in first so an exact configured id always wins a collision
        for (id, connection_id, display) in &spellings {
            all_to_model.insert(display.clone(), (*id).clone());
            models_by_connection
                .entry((*connection_id).clone())
                .or_default()
                .insert(display.clone(), (*id).clone());
        }
        for (id, connection_id, _) in &spellings {
            all_to_model.insert((*id).clone(), (*id).clone());
            models_by_connection
                .entry((*connection_id).clone())
                .or_default()
                .insert((*id).clone(), (*id).clone());
        }

        let mut router = Router {
            connections,
            models,
            models_by_connection,
            all_to_model,
            alias_to_model: HashMap::new(),
            model_to_aliases: HashMap::new(),
            expose_aliases: options.expose_aliases,
        };

        for (alias, model) in &options.aliases {
            router.add_alias(alias, model)?;
        }

        debug!(
            connections = router.connections.len(),
            models = router.models.len(),
            aliases = router.alias_to_model.len(),
            "router built"
        );
        Ok(router)
    }

    /// Registers `alias` as another name for the concrete model `model`.
    pub fn add_alias(&mut self, alias: &str, model: &str) -> Result<(), RouterError> {
        // The target must be a configured id as written, not a display form of one
        if !self.models.contains_key(model) {
            return Err(RouterError::Alias(format!(
                "alias {alias} points to unknown model {model}"
            )));
        }
        let canonical = model.to_string();
        if self.concrete(alias).is_some() {
            return Err(RouterError::Alias(format!(
                "alias {alias} refers to an existing concrete model name"
            )));
        }

        if let Some(previous) = self
            .alias_to_model
            .insert(alias.to_string(), canonical.clone())
            && let Some(aliases) = self.model_to_aliases.get_mut(&previous)
        {
            aliases.retain(|a| a != alias);
        }
        self.model_to_aliases
            .entry(canonical)
            .or_default()
            .push(alias.to_string());
        Ok(())
    }

    /// Maps a requested name to the backend that owns it and the model's canonical id.
    pub fn resolve(&self, requested: &str) -> Result<(Arc<dyn Backend>, ModelId), RouterError> {
        let (model, resolved) = match self.concrete(requested) {
            Some(model) => (model, None),
            None => match self.alias_to_model.get(requested) {
                Some(model) => (model, Some(model.clone())),
                None => {
                    return Err(RouterError::RouteNotFound {
                        requested: requested.to_string(),
                        resolved: None,
                    });
                }
            },
        };

        let backend = self
            .models
            .get(model)
            .and_then(|config| self.connections.get(&config.connection_id));
        match backend {
            Some(backend) => {
                trace!(requested_model = %requested, model = %model, "resolved model");
                Ok((Arc::clone(backend), model.clone()))
            }
            None => Err(RouterError::RouteNotFound {
                requested: requested.to_string(),
                resolved,
            }),
        }
    }

    /// Exact configured id first, then its normalized display form.
    fn concrete(&self, name: &str) -> Option<&ModelId> {
        self.all_to_model
            .get(name)
            .or_else(|| name::shortest(name).and_then(|display| self.all_to_model.get(&display)))
    }

    /// Runs `call` against every connection concurrently and waits for all of them.
    ///
    /// Results come back ordered by connection id. Dropping the returned future aborts calls
    /// still in flight.
    async fn gather<T, F, Fut>(&self, call: F) -> Vec<(ConnectionId, Result<T, RouterError>)>
    where
        F: Fn(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = Result<T, RouterError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for (id, backend) in &self.connections {
            let id = id.clone();
            let call = call(Arc::clone(backend));
            tasks.spawn(async move { (id, call.await) });
        }

        let mut results = Vec::with_capacity(self.connections.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "connection task did not complete"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Fans out `call` and keeps only the answers of connections that succeeded.
    async fn best_effort<T, F, Fut>(&self, operation: &'static str, call: F) -> Vec<(ConnectionId, T)>
    where
        F: Fn(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = Result<T, RouterError>> + Send + 'static,
        T: Send + 'static,
    {
        self.gather(call)
            .await
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(value) => Some((id, value)),
                Err(e) => {
                    warn!(connection_id = %id, operation, error = %e, "connection failed, skipping");
                    None
                }
            })
            .collect()
    }

    /// Drops entries a connection reports for models it is not configured to serve, and adds
    /// one renamed copy per alias when aliases are exposed.
    fn publish<E: ModelEntry>(&self, connection_id: &str, entries: Vec<E>) -> Vec<E> {
        let Some(owned) = self.models_by_connection.get(connection_id) else {
            return Vec::new();
        };

        let mut published = Vec::with_capacity(entries.len());
        for entry in entries {
            let reported = entry.reported_name();
            let canonical = owned.get(reported).or_else(|| {
                name::shortest(reported).and_then(|display| owned.get(&display))
            });
            let Some(canonical) = canonical else {
                trace!(connection_id, model = %reported, "dropping model not routed to this connection");
                continue;
            };

            let synthetic: Vec<E> = match self.model_to_aliases.get(canonical) {
                Some(aliases) if self.expose_aliases => {
                    aliases.iter().map(|alias| entry.renamed(alias)).collect()
                }
                _ => Vec::new(),
            };
            published.push(entry);
            published.extend(synthetic);
        }
        published
    }
}

/// Picks the field the caller used for the model name; `model` wins when both are set.
fn requested_field<'a>(model: &'a mut String, name: &'a mut String) -> &'a mut String {
    if model.is_empty() && !name.is_empty() {
        name
    } else {
        model
    }
}

#[async_trait]
impl Backend for Router {
    async fn generate(
        &self,
        mut request: GenerateRequest,
    ) -> Result<EventStream<GenerateResponse>, RouterError> {
        let (backend, model) = self.resolve(&request.model)?;
        debug!(requested_model = %request.model, model = %model, "routing generate");
        request.model = model;
        backend.generate(request).await
    }

    async fn chat(
        &self,
        mut request: ChatRequest,
    ) -> Result<EventStream<ChatResponse>, RouterError> {
        let (backend, model) = self.resolve(&request.model)?;
        debug!(requested_model = %request.model, model = %model, "routing chat");
        request.model = model;
        backend.chat(request).await
    }

    async fn pull(
        &self,
        mut request: PullRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        let field = requested_field(&mut request.model, &mut request.name);
        let (backend, model) = self.resolve(field)?;
        debug!(requested_model = %field, model = %model, "routing pull");
        *field = model;
        backend.pull(request).await
    }

    async fn push(
        &self,
        _request: PushRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        Err(RouterError::Unsupported(Unsupported::Push))
    }

    async fn create(
        &self,
        _request: CreateRequest,
    ) -> Result<EventStream<ProgressResponse>, RouterError> {
        Err(RouterError::Unsupported(Unsupported::Create))
    }

    async fn list(&self) -> Result<ListResponse, RouterError> {
        let mut models = Vec::new();
        for (id, list) in self
            .best_effort("list", |backend| async move { backend.list().await })
            .await
        {
            models.extend(self.publish(&id, list.models));
        }
        // Newest first; entries without a timestamp sort last
        models.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(ListResponse { models })
    }

    async fn list_running(&self) -> Result<ProcessResponse, RouterError> {
        let mut models = Vec::new();
        for (id, running) in self
            .best_effort("list_running", |backend| async move {
                backend.list_running().await
            })
            .await
        {
            models.extend(self.publish(&id, running.models));
        }
        models.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(ProcessResponse { models })
    }

    async fn copy(&self, _request: CopyRequest) -> Result<(), RouterError> {
        Err(RouterError::Unsupported(Unsupported::Copy))
    }

    async fn delete(&self, _request: DeleteRequest) -> Result<(), RouterError> {
        Err(RouterError::Unsupported(Unsupported::Delete))
    }

    async fn show(&self, mut request: ShowRequest) -> Result<ShowResponse, RouterError> {
        let field = requested_field(&mut request.model, &mut request.name);
        let (backend, model) = self.resolve(field)?;
        debug!(requested_model = %field, model = %model, "routing show");
        *field = model;
        backend.show(request).await
    }

    async fn heartbeat(&self) -> Result<(), RouterError> {
        let failures: Vec<String> = self
            .gather(|backend| async move { backend.heartbeat().await })
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| format!("connection {id}: {e}")))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RouterError::backend(
                StatusCode::INTERNAL_SERVER_ERROR,
                failures.join("; "),
            ))
        }
    }

    async fn embed(&self, mut request: EmbedRequest) -> Result<EmbedResponse, RouterError> {
        let (backend, model) = self.resolve(&request.model)?;
        debug!(requested_model = %request.model, model = %model, "routing embed");
        request.model = model;
        backend.embed(request).await
    }

    async fn embeddings(
        &self,
        mut request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, RouterError> {
        let (backend, model) = self.resolve(&request.model)?;
        debug!(requested_model = %request.model, model = %model, "routing embeddings");
        request.model = model;
        backend.embeddings(request).await
    }

    async fn create_blob(&self, _digest: &str, _body: Bytes) -> Result<(), RouterError> {
        Err(RouterError::Unsupported(Unsupported::Blob))
    }

    /// The oldest version any reachable connection reports.
    async fn version(&self) -> Result<String, RouterError> {
        Ok(self
            .best_effort("version", |backend| async move { backend.version().await })
            .await
            .into_iter()
            .map(|(_, version)| version)
            .filter(|version| !version.is_empty())
            .min()
            .unwrap_or_default())
    }
}
