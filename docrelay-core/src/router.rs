//! Command routing.
//!
//! The [`Router`] is what a transport talks to. It answers every [`Command`] under a
//! single topic, runs each request through validation, decoding and collection
//! resolution, executes exactly one store operation and hands the result to the
//! [`ResponsePostProcessor`].

use bson::{Document, doc};
use serde_json::Value;
use std::fmt;

use crate::{
    backend::CollectionOptions,
    codec,
    config::{StoreConfig, StoreSettings},
    document::decode_id,
    error::{StoreError, StoreResult},
    ops::{self, Insert},
    query::{Query, SortDirection},
    request::{
        Command, CountOptions, CreateCollectionOptions, Fields, FindOptions, ReplaceOptions,
        Request, UpdateOptions,
    },
    resolver::{CollectionName, resolve},
    response::{Reply, ResponsePostProcessor},
    store::DynDocumentStore,
};

/// The topic a router answers on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Topic(topic.into())
    }

    /// `<base>.<database>`, used when each database gets its own topic.
    pub fn with_database(base: &str, database: &str) -> Self {
        Topic(format!("{base}.{database}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(topic, cmd)` pair the transport should deliver to the router.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub topic: String,
    pub cmd: Command,
}

#[derive(Debug, Clone)]
pub struct Router {
    topic: Topic,
    store: DynDocumentStore,
    defaults: StoreSettings,
    post_processor: ResponsePostProcessor,
}

impl Router {
    pub fn new(
        topic: Topic,
        store: DynDocumentStore,
        defaults: StoreSettings,
        post_processor: ResponsePostProcessor,
    ) -> Self {
        Self {
            topic,
            store,
            defaults,
            post_processor,
        }
    }

    /// Builds a router with the topic, option defaults and serialization toggle
    /// taken from `config`.
    pub fn from_config(config: &StoreConfig, store: DynDocumentStore) -> Self {
        Self::new(
            Topic::new(config.effective_topic()),
            store,
            config.store.clone(),
            ResponsePostProcessor::new(config.serialize_result),
        )
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn store(&self) -> &DynDocumentStore {
        &self.store
    }

    /// Every pattern this router answers, one per command.
    pub fn patterns(&self) -> Vec<Pattern> {
        Command::ALL
            .into_iter()
            .map(|cmd| Pattern {
                topic: self.topic.to_string(),
                cmd,
            })
            .collect()
    }

    /// Serves one request.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::Validation`] when the request is addressed to another
    /// topic or lacks a required field, [`StoreError::MalformedPayload`] when a
    /// payload cannot be decoded, [`StoreError::UnknownCollection`] for an invalid
    /// collection name, and with the backend's error when the operation fails. All
    /// but the last happen before the backend is called.
    #[tracing::instrument(
        skip(self, request),
        fields(topic = %request.topic, cmd = %request.cmd, collection = ?request.collection)
    )]
    pub async fn dispatch(&self, request: Request) -> StoreResult<Reply> {
        if request.topic != self.topic.as_str() {
            return Err(StoreError::validation(format!(
                "no handler for topic `{}` (serving `{}`)",
                request.topic, self.topic
            )));
        }
        request.validate()?;

        let result = match request.cmd {
            Command::CreateCollection => {
                let options = collection_options(request.options_as()?)?;
                let name = collection_name(&request)?;
                ops::create_collection(&self.store, &name, options).await
            }
            Command::DropCollection => {
                let name = collection_name(&request)?;
                ops::drop_collection(&self.store, &name).await
            }
            Command::Create => {
                let data = decode_insert(required(&request, &request.data, "data")?)?;
                let name = collection_name(&request)?;
                ops::create(&resolve(&self.store, &name), data).await
            }
            Command::Find => {
                let filter = optional_filter(&request)?;
                let query = find_query(filter, request.options_as()?)?;
                let name = collection_name(&request)?;
                ops::find(&resolve(&self.store, &name), query).await
            }
            Command::FindById => {
                let id = decode_id(required(&request, &request.id, "id")?)?;
                let name = collection_name(&request)?;
                ops::find_by_id(&resolve(&self.store, &name), id).await
            }
            Command::Count => {
                let filter = optional_filter(&request)?;
                let query = count_query(filter, request.options_as()?);
                let name = collection_name(&request)?;
                ops::count(&resolve(&self.store, &name), query).await
            }
            Command::Exists => {
                let filter = optional_filter(&request)?;
                let name = collection_name(&request)?;
                ops::exists(&resolve(&self.store, &name), filter).await
            }
            Command::Update => {
                let filter = required_document(&request, &request.query, "query")?;
                let update = required_document(&request, &request.data, "data")?;
                let options: UpdateOptions = request.options_as()?;
                let upsert = options.upsert.unwrap_or(self.defaults.update.upsert);
                let multi = options.multi.unwrap_or(false);
                let name = collection_name(&request)?;
                ops::update(&resolve(&self.store, &name), filter, update, upsert, multi).await
            }
            Command::UpdateById => {
                let id = decode_id(required(&request, &request.id, "id")?)?;
                let update = required_document(&request, &request.data, "data")?;
                let options: UpdateOptions = request.options_as()?;
                let upsert = options.upsert.unwrap_or(self.defaults.update_by_id.upsert);
                let name = collection_name(&request)?;
                ops::update_by_id(&resolve(&self.store, &name), id, update, upsert).await
            }
            Command::Replace => {
                let filter = required_document(&request, &request.query, "query")?;
                let replacement = required_document(&request, &request.data, "data")?;
                let options: ReplaceOptions = request.options_as()?;
                let upsert = options.upsert.unwrap_or(self.defaults.replace.upsert);
                let name = collection_name(&request)?;
                ops::replace(&resolve(&self.store, &name), filter, replacement, upsert).await
            }
            Command::ReplaceById => {
                let id = decode_id(required(&request, &request.id, "id")?)?;
                let replacement = required_document(&request, &request.data, "data")?;
                let options: ReplaceOptions = request.options_as()?;
                let upsert = options.upsert.unwrap_or(self.defaults.replace_by_id.upsert);
                let name = collection_name(&request)?;
                ops::replace_by_id(&resolve(&self.store, &name), id, replacement, upsert).await
            }
            Command::Remove => {
                let filter = required_document(&request, &request.query, "query")?;
                let name = collection_name(&request)?;
                ops::remove(&resolve(&self.store, &name), filter).await
            }
            Command::RemoveById => {
                let id = decode_id(required(&request, &request.id, "id")?)?;
                let name = collection_name(&request)?;
                ops::remove_by_id(&resolve(&self.store, &name), id).await
            }
        }?;

        self.post_processor.process(result)
    }
}

fn required<'r>(request: &Request, field: &'r Option<Value>, name: &str) -> StoreResult<&'r Value> {
    field.as_ref().ok_or_else(|| {
        StoreError::validation(format!("{}: missing required field `{name}`", request.cmd))
    })
}

fn required_document(
    request: &Request,
    field: &Option<Value>,
    name: &str,
) -> StoreResult<Document> {
    codec::decode_document(required(request, field, name)?)
}

fn optional_filter(request: &Request) -> StoreResult<Document> {
    request
        .query
        .as_ref()
        .map_or_else(|| Ok(doc! {}), codec::decode_document)
}

fn collection_name(request: &Request) -> StoreResult<CollectionName> {
    let name = request.collection.as_deref().ok_or_else(|| {
        StoreError::validation(format!("{}: missing required field `collection`", request.cmd))
    })?;

    CollectionName::parse(name)
}

fn decode_insert(data: &Value) -> StoreResult<Insert> {
    match data {
        Value::Array(items) => items
            .iter()
            .map(codec::decode_document)
            .collect::<StoreResult<Vec<_>>>()
            .map(Insert::Many),
        _ => codec::decode_document(data).map(Insert::One),
    }
}

fn collection_options(options: CreateCollectionOptions) -> StoreResult<CollectionOptions> {
    Ok(CollectionOptions {
        capped: options.capped.unwrap_or(false),
        size: options.size,
        max: options.max,
        validator: options
            .validator
            .as_ref()
            .map(codec::decode_document)
            .transpose()?,
    })
}

fn find_query(filter: Document, options: FindOptions) -> StoreResult<Query> {
    let mut builder = Query::builder().filter(filter);

    if let Some(limit) = options.limit {
        builder = builder.limit(limit);
    }
    if let Some(offset) = options.offset {
        builder = builder.offset(offset);
    }
    if let Some(order_by) = &options.order_by {
        for (field, descending) in order_by.entries()? {
            let direction = if descending {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            builder = builder.sort(field, direction);
        }
    }
    if let Some(fields) = &options.fields {
        builder = builder.projection(projection(fields)?);
    }

    Ok(builder.build())
}

fn projection(fields: &Fields) -> StoreResult<Document> {
    match fields {
        Fields::Names(names) => Ok(names
            .iter()
            .map(|name| (name.clone(), bson::Bson::Int32(1)))
            .collect()),
        Fields::Spec(spec) => codec::decode_document(&Value::Object(spec.clone())),
    }
}

fn count_query(filter: Document, options: CountOptions) -> Query {
    Query {
        filter,
        limit: options.limit,
        offset: options.offset,
        ..Query::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{StoreBackend, UpdateSummary},
        response::OperationResult,
        store::DocumentStore,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    /// Counts backend calls and records the last query it was handed.
    #[derive(Debug, Default)]
    struct CountingBackend {
        calls: AtomicUsize,
        last_query: Mutex<Option<Query>>,
        last_upsert: Mutex<Option<bool>>,
    }

    impl CountingBackend {
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StoreBackend for CountingBackend {
        fn backend_name(&self) -> &'static str {
            "counting"
        }

        async fn create_collection(&self, _: &str, _: CollectionOptions) -> StoreResult<()> {
            self.hit();
            Ok(())
        }

        async fn drop_collection(&self, _: &str) -> StoreResult<()> {
            self.hit();
            Err(StoreError::Storage("ns not found".into()))
        }

        async fn list_collections(&self) -> StoreResult<Vec<String>> {
            self.hit();
            Ok(vec![])
        }

        async fn insert_documents(&self, _: Vec<Document>, _: &str) -> StoreResult<()> {
            self.hit();
            Ok(())
        }

        async fn query_documents(&self, query: Query, _: &str) -> StoreResult<Vec<Document>> {
            self.hit();
            *self.last_query.lock().unwrap() = Some(query);
            Ok(vec![])
        }

        async fn count_documents(&self, query: Query, _: &str) -> StoreResult<u64> {
            self.hit();
            *self.last_query.lock().unwrap() = Some(query);
            Ok(0)
        }

        async fn find_one_and_update(
            &self,
            _: Document,
            _: Document,
            upsert: bool,
            _: &str,
        ) -> StoreResult<Option<Document>> {
            self.hit();
            *self.last_upsert.lock().unwrap() = Some(upsert);
            Ok(None)
        }

        async fn update_many(
            &self,
            _: Document,
            _: Document,
            upsert: bool,
            _: &str,
        ) -> StoreResult<UpdateSummary> {
            self.hit();
            *self.last_upsert.lock().unwrap() = Some(upsert);
            Ok(UpdateSummary::default())
        }

        async fn find_one_and_replace(
            &self,
            _: Document,
            _: Document,
            upsert: bool,
            _: &str,
        ) -> StoreResult<Option<Document>> {
            self.hit();
            *self.last_upsert.lock().unwrap() = Some(upsert);
            Ok(None)
        }

        async fn find_one_and_delete(&self, _: Document, _: &str) -> StoreResult<Option<Document>> {
            self.hit();
            Ok(None)
        }

        async fn delete_many(&self, _: Document, _: &str) -> StoreResult<u64> {
            self.hit();
            Ok(0)
        }
    }

    fn router() -> (Router, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend::default());
        let store = DynDocumentStore::new(backend.clone());
        let router = Router::new(
            Topic::new("mongo-store"),
            store,
            StoreSettings::default(),
            ResponsePostProcessor::new(false),
        );
        (router, backend)
    }

    fn request(value: Value) -> Request {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn patterns_cover_every_command_once() {
        let (router, _) = router();

        let patterns = router.patterns();

        assert_eq!(patterns.len(), Command::ALL.len());
        assert!(patterns.iter().all(|p| p.topic == "mongo-store"));
        assert!(
            patterns
                .iter()
                .any(|p| p.cmd == Command::ReplaceById)
        );
    }

    #[test]
    fn database_topics_get_a_suffix() {
        assert_eq!(Topic::with_database("mongo-store", "crm").as_str(), "mongo-store.crm");
    }

    #[tokio::test]
    async fn rejects_bad_requests_before_touching_the_backend() {
        let (router, backend) = router();
        let cases = [
            (
                json!({ "topic": "other", "cmd": "find", "collection": "users" }),
                "ValidationError",
            ),
            (json!({ "topic": "mongo-store", "cmd": "find" }), "ValidationError"),
            (
                json!({ "topic": "mongo-store", "cmd": "update", "collection": "users", "data": {} }),
                "ValidationError",
            ),
            (
                json!({ "topic": "mongo-store", "cmd": "find", "collection": "" }),
                "UnknownCollection",
            ),
            (
                json!({ "topic": "mongo-store", "cmd": "findById", "collection": "users", "id": true }),
                "MalformedPayload",
            ),
            (
                json!({
                    "topic": "mongo-store", "cmd": "find", "collection": "users",
                    "query": { "_id": { "$oid": "not-hex" } },
                }),
                "MalformedPayload",
            ),
        ];

        for (value, kind) in cases {
            let err = router.dispatch(request(value.clone())).await.unwrap_err();
            assert_eq!(
                serde_json::to_value(err.kind()).unwrap(),
                json!(kind),
                "{value}"
            );
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn translates_find_options_into_the_query() {
        let (router, backend) = router();

        router
            .dispatch(request(json!({
                "topic": "mongo-store",
                "cmd": "find",
                "collection": "users",
                "query": { "age": { "$gte": 18 } },
                "options": {
                    "limit": 10,
                    "offset": 5,
                    "orderBy": { "age": -1, "name": "asc" },
                    "fields": ["name"],
                },
            })))
            .await
            .unwrap();

        let query = backend.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.filter, doc! { "age": { "$gte": 18 } });
        assert_eq!((query.limit, query.offset), (Some(10), Some(5)));
        assert_eq!(query.sort.len(), 2);
        assert_eq!(query.sort[0].direction, SortDirection::Desc);
        assert_eq!(query.sort[1].field, "name");
        assert_eq!(query.projection, Some(doc! { "name": 1 }));
    }

    #[tokio::test]
    async fn upsert_defaults_come_from_settings_unless_the_request_says_otherwise() {
        let (router, backend) = router();
        let replace = |options: Value| {
            request(json!({
                "topic": "mongo-store",
                "cmd": "replace",
                "collection": "users",
                "query": { "name": "Ann" },
                "data": { "name": "Ann" },
                "options": options,
            }))
        };

        router.dispatch(replace(json!({}))).await.unwrap();
        assert_eq!(*backend.last_upsert.lock().unwrap(), Some(true));

        router.dispatch(replace(json!({ "upsert": false }))).await.unwrap();
        assert_eq!(*backend.last_upsert.lock().unwrap(), Some(false));

        router
            .dispatch(request(json!({
                "topic": "mongo-store",
                "cmd": "updateById",
                "collection": "users",
                "id": 1,
                "data": { "$set": { "name": "Ann" } },
            })))
            .await
            .unwrap();
        assert_eq!(*backend.last_upsert.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn dropping_a_missing_collection_replies_false() {
        let (router, _) = router();

        let reply = router
            .dispatch(request(json!({
                "topic": "mongo-store",
                "cmd": "dropCollection",
                "collection": "ghosts",
            })))
            .await
            .unwrap();

        assert_eq!(reply, Reply::Raw(OperationResult::Bool(false)));
    }

    #[tokio::test]
    async fn serialized_replies_carry_tagged_values() {
        let (_, backend) = router();
        let router = Router::new(
            Topic::new("mongo-store"),
            DynDocumentStore::new(backend),
            StoreSettings::default(),
            ResponsePostProcessor::new(true),
        );

        let reply = router
            .dispatch(request(json!({
                "topic": "mongo-store",
                "cmd": "count",
                "collection": "users",
            })))
            .await
            .unwrap();

        assert_eq!(reply, Reply::Wire(json!(0)));
    }

    #[test]
    fn from_config_uses_the_effective_topic() {
        let config = StoreConfig {
            use_db_as_topic_suffix: true,
            ..StoreConfig::default()
        };
        let store = DocumentStore::new(CountingBackend::default()).into_dyn();

        let router = Router::from_config(&config, store);

        assert_eq!(router.topic().as_str(), "mongo-store.test");
    }
}
