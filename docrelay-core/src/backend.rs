//! Storage backend abstraction.
//!
//! The [`StoreBackend`] trait is the seam between the command layer and a concrete
//! database. Every store operation reduces to one of its primitives, so a backend
//! only has to know how to filter, mutate and remove documents in a named collection.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: Object-safe mirror of [`StoreBackend`] for dynamic dispatch
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Error contract
//!
//! Backends report failures the engine itself raised (duplicate keys, unknown
//! operators, missing collections on drop) as [`StoreError::Storage`], and failures
//! to reach the engine as [`StoreError::Connection`]. Best-effort commands rely on
//! that split.
//!
//! [`StoreError::Storage`]: crate::error::StoreError::Storage
//! [`StoreError::Connection`]: crate::error::StoreError::Connection

use async_trait::async_trait;
use bson::{Bson, Document};
use serde::Serialize;
use std::fmt::Debug;

use crate::{error::StoreResult, query::Query};

/// Options applied when a collection is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOptions {
    /// Whether the collection has a fixed size.
    pub capped: bool,
    /// Maximum size in bytes of a capped collection.
    pub size: Option<u64>,
    /// Maximum number of documents of a capped collection.
    pub max: Option<u64>,
    /// Filter every inserted document has to satisfy.
    pub validator: Option<Document>,
}

/// Outcome of a multi-document update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    /// Documents matching the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// Identifier of the document inserted by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Abstract interface for document storage backends.
///
/// Implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Every call is independent: a backend never has to hold state about
/// a caller between calls.
///
/// Single-document mutations (`find_one_and_*`) must be atomic with respect to other
/// calls on the same collection and return the document as it is *after* the change.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Short name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Creates a collection.
    ///
    /// Fails with a storage error if the collection already exists.
    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<()>;

    /// Drops a collection and all of its documents.
    ///
    /// Fails with a storage error if the collection does not exist.
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Lists the names of all existing collections.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Inserts documents, each already carrying its `_id`.
    ///
    /// Creates the collection on first insert.
    async fn insert_documents(&self, documents: Vec<Document>, collection: &str)
    -> StoreResult<()>;

    /// Returns the documents matching `query`, sorted, paged and projected.
    async fn query_documents(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>>;

    /// Counts the documents matching the filter of `query`, honoring its limit and offset.
    async fn count_documents(&self, query: Query, collection: &str) -> StoreResult<u64>;

    /// Applies `update` to the first document matching `filter`.
    ///
    /// With `upsert`, a document built from the filter's equality fields and the
    /// update is inserted when nothing matches.
    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>>;

    /// Applies `update` to every document matching `filter`.
    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<UpdateSummary>;

    /// Replaces the first document matching `filter`, keeping its `_id`.
    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>>;

    /// Removes the first document matching `filter` and returns it.
    async fn find_one_and_delete(
        &self,
        filter: Document,
        collection: &str,
    ) -> StoreResult<Option<Document>>;

    /// Removes every document matching `filter`, returning how many were removed.
    async fn delete_many(&self, filter: Document, collection: &str) -> StoreResult<u64>;

    /// Releases the backend's resources. Calls made afterwards may fail.
    async fn shutdown(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Object-safe counterpart of [`StoreBackend`], implemented for every backend.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    fn backend_name(&self) -> &'static str;
    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<()>;
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;
    async fn list_collections(&self) -> StoreResult<Vec<String>>;
    async fn insert_documents(&self, documents: Vec<Document>, collection: &str)
    -> StoreResult<()>;
    async fn query_documents(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>>;
    async fn count_documents(&self, query: Query, collection: &str) -> StoreResult<u64>;
    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>>;
    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<UpdateSummary>;
    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>>;
    async fn find_one_and_delete(
        &self,
        filter: Document,
        collection: &str,
    ) -> StoreResult<Option<Document>>;
    async fn delete_many(&self, filter: Document, collection: &str) -> StoreResult<u64>;
    async fn shutdown(&self) -> StoreResult<()>;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    fn backend_name(&self) -> &'static str {
        StoreBackend::backend_name(self)
    }

    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<()> {
        StoreBackend::create_collection(self, name, options).await
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        StoreBackend::drop_collection(self, name).await
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        StoreBackend::list_collections(self).await
    }

    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> StoreResult<()> {
        StoreBackend::insert_documents(self, documents, collection).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>> {
        StoreBackend::query_documents(self, query, collection).await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> StoreResult<u64> {
        StoreBackend::count_documents(self, query, collection).await
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        StoreBackend::find_one_and_update(self, filter, update, upsert, collection).await
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<UpdateSummary> {
        StoreBackend::update_many(self, filter, update, upsert, collection).await
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        StoreBackend::find_one_and_replace(self, filter, replacement, upsert, collection).await
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        StoreBackend::find_one_and_delete(self, filter, collection).await
    }

    async fn delete_many(&self, filter: Document, collection: &str) -> StoreResult<u64> {
        StoreBackend::delete_many(self, filter, collection).await
    }

    async fn shutdown(&self) -> StoreResult<()> {
        StoreBackend::shutdown(self).await
    }
}

/// Factory for backends whose construction is itself fallible or asynchronous,
/// such as connecting to a server.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StoreResult<Self::Backend>;
}
