//! Collection handles.
//!
//! A [`Collection`] binds a validated collection name to a backend, so store
//! operations never pass raw names around.

use bson::Document;

use crate::{
    backend::{DynStoreBackend, UpdateSummary},
    error::StoreResult,
    query::Query,
    resolver::CollectionName,
};

/// A named collection within a document store.
#[derive(Debug, Clone, Copy)]
pub struct Collection<'a> {
    name: &'a CollectionName,
    backend: &'a dyn DynStoreBackend,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(name: &'a CollectionName, backend: &'a dyn DynStoreBackend) -> Self {
        Self { name, backend }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub async fn insert(&self, documents: Vec<Document>) -> StoreResult<()> {
        self.backend
            .insert_documents(documents, self.name())
            .await
    }

    pub async fn query(&self, query: Query) -> StoreResult<Vec<Document>> {
        self.backend
            .query_documents(query, self.name())
            .await
    }

    pub async fn count(&self, query: Query) -> StoreResult<u64> {
        self.backend
            .count_documents(query, self.name())
            .await
    }

    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        self.backend
            .find_one_and_update(filter, update, upsert, self.name())
            .await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<UpdateSummary> {
        self.backend
            .update_many(filter, update, upsert, self.name())
            .await
    }

    pub async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        self.backend
            .find_one_and_replace(filter, replacement, upsert, self.name())
            .await
    }

    pub async fn find_one_and_delete(&self, filter: Document) -> StoreResult<Option<Document>> {
        self.backend
            .find_one_and_delete(filter, self.name())
            .await
    }

    pub async fn delete_many(&self, filter: Document) -> StoreResult<u64> {
        self.backend
            .delete_many(filter, self.name())
            .await
    }
}
