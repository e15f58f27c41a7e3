//! Document store handles.
//!
//! [`DocumentStore`] owns a concrete backend; [`DynDocumentStore`] erases the backend
//! type behind a shared pointer so a router can be cloned into every request task.

use std::sync::Arc;

use crate::{
    backend::{CollectionOptions, DynStoreBackend, StoreBackend},
    collection::Collection,
    error::StoreResult,
    resolver::CollectionName,
};

#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend + 'static> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Erases the backend type.
    pub fn into_dyn(self) -> DynDocumentStore {
        DynDocumentStore::new(Arc::new(self.backend))
    }
}

#[derive(Debug, Clone)]
pub struct DynDocumentStore {
    backend: Arc<dyn DynStoreBackend>,
}

impl DynDocumentStore {
    pub fn new(backend: Arc<dyn DynStoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn collection<'a>(&'a self, name: &'a CollectionName) -> Collection<'a> {
        Collection::new(name, &*self.backend)
    }

    pub async fn create_collection(
        &self,
        name: &CollectionName,
        options: CollectionOptions,
    ) -> StoreResult<()> {
        self.backend
            .create_collection(name.as_str(), options)
            .await
    }

    pub async fn drop_collection(&self, name: &CollectionName) -> StoreResult<()> {
        self.backend.drop_collection(name.as_str()).await
    }

    pub async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    pub async fn shutdown(&self) -> StoreResult<()> {
        self.backend.shutdown().await
    }
}
