//! Service lifecycle: connect a backend, serve requests, shut down.

use serde_json::{Value, json};

use docrelay_core::{
    backend::StoreBackendBuilder,
    config::{BackendKind, StoreConfig},
    error::{ErrorPayload, StoreError, StoreResult},
    request::Request,
    response::Reply,
    router::{Pattern, Router},
    store::{DocumentStore, DynDocumentStore},
};
use docrelay_memory::InMemoryStore;

/// A running store service: one router bound to one connected backend.
#[derive(Debug, Clone)]
pub struct StoreService {
    router: Router,
}

impl StoreService {
    /// Connects the configured backend and builds the router.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::Configuration`] for an invalid configuration, and with
    /// the backend's error when it cannot be reached.
    #[tracing::instrument(skip_all, fields(backend = ?config.backend))]
    pub async fn start(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;

        let store = connect(&config).await?;
        let service = Self::with_store(&config, store);

        tracing::info!(
            topic = %service.router.topic(),
            backend = service.router.store().backend_name(),
            "Store service started"
        );

        Ok(service)
    }

    /// Serves `config` from an already connected store.
    pub fn with_store(config: &StoreConfig, store: DynDocumentStore) -> Self {
        Self {
            router: Router::from_config(config, store),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The `(topic, cmd)` pairs a transport should subscribe to.
    pub fn patterns(&self) -> Vec<Pattern> {
        self.router.patterns()
    }

    pub async fn handle(&self, request: Request) -> StoreResult<Reply> {
        self.router.dispatch(request).await
    }

    /// Serves a JSON request envelope, answering `{"result": …}` or
    /// `{"error": {"kind": …, "message": …}}`.
    pub async fn handle_json(&self, request: Value) -> Value {
        match self.serve_json(request).await {
            Ok(result) => json!({ "result": result }),
            Err(err) => {
                tracing::debug!(error = %err, "Request failed");
                json!({ "error": ErrorPayload::from(&err) })
            }
        }
    }

    async fn serve_json(&self, request: Value) -> StoreResult<Value> {
        let request: Request = serde_json::from_value(request)
            .map_err(|e| StoreError::Validation(format!("invalid request envelope: {e}")))?;

        self.handle(request).await?.into_json()
    }

    /// Shuts the backend down. Meant as the transport's on-shutdown hook.
    pub async fn close(self) -> StoreResult<()> {
        self.router.store().shutdown().await?;
        tracing::info!(topic = %self.router.topic(), "Store service closed");

        Ok(())
    }
}

async fn connect(config: &StoreConfig) -> StoreResult<DynDocumentStore> {
    match config.backend {
        BackendKind::Memory => {
            let backend = InMemoryStore::builder().build().await?;
            Ok(DocumentStore::new(backend).into_dyn())
        }
        BackendKind::Mongodb => connect_mongodb(config).await,
    }
}

#[cfg(feature = "mongodb")]
async fn connect_mongodb(config: &StoreConfig) -> StoreResult<DynDocumentStore> {
    let backend = docrelay_mongodb::MongoDbStore::builder(config.mongo.clone())
        .build()
        .await?;

    Ok(DocumentStore::new(backend).into_dyn())
}

#[cfg(not(feature = "mongodb"))]
async fn connect_mongodb(_config: &StoreConfig) -> StoreResult<DynDocumentStore> {
    Err(StoreError::Configuration(
        "the mongodb backend requires the `mongodb` feature".into(),
    ))
}
