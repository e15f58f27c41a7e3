use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, Database,
    options::{
        ClientOptions, CountOptions, CreateCollectionOptions, FindOptions, ReturnDocument,
    },
};

use docrelay_core::{
    backend::{CollectionOptions, StoreBackend, StoreBackendBuilder, UpdateSummary},
    config::MongoConfig,
    error::{StoreError, StoreResult},
    query::{Query, Sort, SortDirection},
};

use crate::error::store_error;

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(config: MongoConfig) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(config)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    fn database(&self) -> Database {
        self.client.database(&self.database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.database().collection(collection_name)
    }
}

fn sort_document(sort: &[Sort]) -> Option<Document> {
    if sort.is_empty() {
        return None;
    }

    Some(
        sort.iter()
            .map(|sort| {
                let direction = match sort.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                };
                (sort.field.clone(), Bson::Int32(direction))
            })
            .collect(),
    )
}

fn find_options(query: &Query) -> FindOptions {
    FindOptions::builder()
        .limit(query.limit.map(|limit| limit as i64))
        .skip(query.offset)
        .sort(sort_document(&query.sort))
        .projection(query.projection.clone())
        .build()
}

fn count_options(query: &Query) -> CountOptions {
    CountOptions::builder()
        .limit(query.limit.filter(|limit| *limit > 0))
        .skip(query.offset)
        .build()
}

fn create_options(options: CollectionOptions) -> CreateCollectionOptions {
    CreateCollectionOptions::builder()
        .capped(options.capped.then_some(true))
        .size(options.size)
        .max(options.max.filter(|max| *max > 0))
        .validator(options.validator)
        .build()
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<()> {
        self.database()
            .create_collection(name)
            .with_options(create_options(options))
            .await
            .map_err(store_error)
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        // The server treats dropping a missing collection as success.
        let existing = self
            .database()
            .list_collection_names()
            .filter(doc! { "name": name })
            .await
            .map_err(store_error)?;

        if existing.is_empty() {
            return Err(StoreError::Storage("ns not found".into()));
        }

        self.get_collection(name).drop().await.map_err(store_error)
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.database()
            .list_collection_names()
            .await
            .map_err(store_error)
    }

    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> StoreResult<()> {
        self.get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn query_documents(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>> {
        let options = find_options(&query);

        self.get_collection(collection)
            .find(query.filter)
            .with_options(options)
            .await
            .map_err(store_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(store_error)
    }

    async fn count_documents(&self, query: Query, collection: &str) -> StoreResult<u64> {
        let options = count_options(&query);

        self.get_collection(collection)
            .count_documents(query.filter)
            .with_options(options)
            .await
            .map_err(store_error)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .upsert(upsert)
            .await
            .map_err(store_error)
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<UpdateSummary> {
        let result = self
            .get_collection(collection)
            .update_many(filter, update)
            .upsert(upsert)
            .await
            .map_err(store_error)?;

        Ok(UpdateSummary {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_replace(filter, replacement)
            .return_document(ReturnDocument::After)
            .upsert(upsert)
            .await
            .map_err(store_error)
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_delete(filter)
            .await
            .map_err(store_error)
    }

    async fn delete_many(&self, filter: Document, collection: &str) -> StoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(store_error)?
            .deleted_count)
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.client.clone().shutdown().await;
        tracing::debug!(database = %self.database, "MongoDB client shut down");

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    config: MongoConfig,
}

impl MongoDbStoreBuilder {
    pub fn new(config: MongoConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    #[tracing::instrument(skip_all)]
    async fn build(self) -> StoreResult<Self::Backend> {
        let database = self.config.database_name();
        let settings = &self.config.options;

        let mut options = ClientOptions::parse(&self.config.url)
            .await
            .map_err(|e| StoreError::Initialization(e.to_string()))?;
        options.app_name = settings.app_name.clone().or(options.app_name);
        options.max_pool_size = settings.max_pool_size.or(options.max_pool_size);
        options.min_pool_size = settings.min_pool_size.or(options.min_pool_size);
        options.connect_timeout = settings.connect_timeout().or(options.connect_timeout);
        options.server_selection_timeout = settings
            .server_selection_timeout()
            .or(options.server_selection_timeout);
        options.default_database = Some(database.clone());

        let client =
            Client::with_options(options).map_err(|e| StoreError::Initialization(e.to_string()))?;

        client
            .database(&database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(store_error)?;

        tracing::info!(database = %database, "Connected to MongoDB");
        Ok(MongoDbStore::new(client, database))
    }
}
