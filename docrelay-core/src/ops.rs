//! Store operations.
//!
//! Each operation takes a resolved [`Collection`] and already decoded inputs, makes
//! exactly one backend call, and shapes what the backend returned into an
//! [`OperationResult`]. No operation sees wire-encoded values.

use bson::{Bson, Document, doc};

use crate::{
    backend::CollectionOptions,
    collection::Collection,
    document::{ID_FIELD, id_filter, upsert_id_filter, with_id},
    error::StoreResult,
    query::Query,
    resolver::CollectionName,
    response::OperationResult,
    store::DynDocumentStore,
};

/// Documents handed to `create`.
#[derive(Debug, Clone, PartialEq)]
pub enum Insert {
    One(Document),
    Many(Vec<Document>),
}

/// Creates a collection. An engine-reported failure, such as the collection
/// already existing, yields `false`.
pub async fn create_collection(
    store: &DynDocumentStore,
    name: &CollectionName,
    options: CollectionOptions,
) -> StoreResult<OperationResult> {
    tracing::debug!(collection = %name, "Creating collection");

    match store.create_collection(name, options).await {
        Ok(()) => Ok(OperationResult::Bool(true)),
        Err(err) if err.is_engine_reported() => {
            tracing::warn!(collection = %name, error = %err, "Collection was not created");
            Ok(OperationResult::Bool(false))
        }
        Err(err) => Err(err),
    }
}

/// Drops a collection. An engine-reported failure, such as the collection not
/// existing, yields `false`.
pub async fn drop_collection(
    store: &DynDocumentStore,
    name: &CollectionName,
) -> StoreResult<OperationResult> {
    tracing::debug!(collection = %name, "Dropping collection");

    match store.drop_collection(name).await {
        Ok(()) => Ok(OperationResult::Bool(true)),
        Err(err) if err.is_engine_reported() => {
            tracing::warn!(collection = %name, error = %err, "Collection was not dropped");
            Ok(OperationResult::Bool(false))
        }
        Err(err) => Err(err),
    }
}

/// Inserts one or many documents, assigning an `_id` to those without one.
///
/// Returns the inserted documents in the shape they were given.
pub async fn create(collection: &Collection<'_>, data: Insert) -> StoreResult<OperationResult> {
    match data {
        Insert::One(document) => {
            let document = with_id(document);
            tracing::debug!(collection = collection.name(), "Inserting one document");

            collection.insert(vec![document.clone()]).await?;
            Ok(OperationResult::Document(Some(document)))
        }
        Insert::Many(documents) => {
            let documents: Vec<_> = documents.into_iter().map(with_id).collect();
            tracing::debug!(
                collection = collection.name(),
                count = documents.len(),
                "Inserting documents"
            );

            collection.insert(documents.clone()).await?;
            Ok(OperationResult::Documents(documents))
        }
    }
}

pub async fn find(collection: &Collection<'_>, query: Query) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), filter = %query.filter, "Finding documents");

    collection
        .query(query)
        .await
        .map(OperationResult::Documents)
}

pub async fn find_by_id(collection: &Collection<'_>, id: Bson) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), id = %id, "Finding document by id");

    let query = Query::builder()
        .filter(id_filter(id))
        .limit(1)
        .build();

    let mut documents = collection.query(query).await?;
    Ok(OperationResult::Document(
        (!documents.is_empty()).then(|| documents.swap_remove(0)),
    ))
}

pub async fn count(collection: &Collection<'_>, query: Query) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), filter = %query.filter, "Counting documents");

    collection
        .count(query)
        .await
        .map(OperationResult::Count)
}

/// Looks up a single matching document, projected to its `_id`.
pub async fn exists(collection: &Collection<'_>, filter: Document) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), filter = %filter, "Checking existence");

    let query = Query::builder()
        .filter(filter)
        .limit(1)
        .projection(doc! { ID_FIELD: 1 })
        .build();

    let documents = collection.query(query).await?;
    Ok(OperationResult::Bool(!documents.is_empty()))
}

/// Updates the first match and returns it as updated, or, with `multi`, updates
/// every match and returns a summary.
pub async fn update(
    collection: &Collection<'_>,
    filter: Document,
    update: Document,
    upsert: bool,
    multi: bool,
) -> StoreResult<OperationResult> {
    tracing::debug!(
        collection = collection.name(),
        filter = %filter,
        upsert,
        multi,
        "Updating documents"
    );

    if multi {
        collection
            .update_many(filter, update, upsert)
            .await
            .map(OperationResult::Mutation)
    } else {
        collection
            .find_one_and_update(filter, update, upsert)
            .await
            .map(OperationResult::Document)
    }
}

fn by_id(id: Bson, upsert: bool) -> Document {
    if upsert {
        upsert_id_filter(id)
    } else {
        id_filter(id)
    }
}

pub async fn update_by_id(
    collection: &Collection<'_>,
    id: Bson,
    update: Document,
    upsert: bool,
) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), id = %id, upsert, "Updating document by id");

    collection
        .find_one_and_update(by_id(id, upsert), update, upsert)
        .await
        .map(OperationResult::Document)
}

pub async fn replace(
    collection: &Collection<'_>,
    filter: Document,
    replacement: Document,
    upsert: bool,
) -> StoreResult<OperationResult> {
    tracing::debug!(
        collection = collection.name(),
        filter = %filter,
        upsert,
        "Replacing document"
    );

    collection
        .find_one_and_replace(filter, replacement, upsert)
        .await
        .map(OperationResult::Document)
}

pub async fn replace_by_id(
    collection: &Collection<'_>,
    id: Bson,
    replacement: Document,
    upsert: bool,
) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), id = %id, upsert, "Replacing document by id");

    collection
        .find_one_and_replace(by_id(id, upsert), replacement, upsert)
        .await
        .map(OperationResult::Document)
}

pub async fn remove(collection: &Collection<'_>, filter: Document) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), filter = %filter, "Removing documents");

    let deleted_count = collection.delete_many(filter).await?;
    Ok(OperationResult::Removed { deleted_count })
}

pub async fn remove_by_id(collection: &Collection<'_>, id: Bson) -> StoreResult<OperationResult> {
    tracing::debug!(collection = collection.name(), id = %id, "Removing document by id");

    collection
        .find_one_and_delete(id_filter(id))
        .await
        .map(OperationResult::Document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{StoreBackend, UpdateSummary},
        error::StoreError,
        resolver::resolve,
        store::DocumentStore,
    };
    use async_trait::async_trait;

    /// A backend whose collection lifecycle calls fail with a fixed error and whose
    /// document calls answer with canned results.
    #[derive(Debug)]
    struct ScriptedBackend {
        lifecycle_error: Option<StoreError>,
        stored: Vec<Document>,
    }

    impl ScriptedBackend {
        fn failing(err: StoreError) -> Self {
            Self { lifecycle_error: Some(err), stored: vec![] }
        }

        fn holding(stored: Vec<Document>) -> Self {
            Self { lifecycle_error: None, stored }
        }

        fn lifecycle(&self) -> StoreResult<()> {
            self.lifecycle_error.clone().map_or(Ok(()), Err)
        }
    }

    #[async_trait]
    impl StoreBackend for ScriptedBackend {
        fn backend_name(&self) -> &'static str {
            "scripted"
        }

        async fn create_collection(&self, _: &str, _: CollectionOptions) -> StoreResult<()> {
            self.lifecycle()
        }

        async fn drop_collection(&self, _: &str) -> StoreResult<()> {
            self.lifecycle()
        }

        async fn list_collections(&self) -> StoreResult<Vec<String>> {
            Ok(vec![])
        }

        async fn insert_documents(&self, _: Vec<Document>, _: &str) -> StoreResult<()> {
            Ok(())
        }

        async fn query_documents(&self, query: Query, _: &str) -> StoreResult<Vec<Document>> {
            let limit = query.limit.map_or(self.stored.len(), |l| l as usize);
            Ok(self.stored.iter().take(limit).cloned().collect())
        }

        async fn count_documents(&self, _: Query, _: &str) -> StoreResult<u64> {
            Ok(self.stored.len() as u64)
        }

        async fn find_one_and_update(
            &self,
            _: Document,
            _: Document,
            _: bool,
            _: &str,
        ) -> StoreResult<Option<Document>> {
            Ok(self.stored.first().cloned())
        }

        async fn update_many(
            &self,
            _: Document,
            _: Document,
            _: bool,
            _: &str,
        ) -> StoreResult<UpdateSummary> {
            let n = self.stored.len() as u64;
            Ok(UpdateSummary { matched_count: n, modified_count: n, upserted_id: None })
        }

        async fn find_one_and_replace(
            &self,
            _: Document,
            _: Document,
            _: bool,
            _: &str,
        ) -> StoreResult<Option<Document>> {
            Ok(self.stored.first().cloned())
        }

        async fn find_one_and_delete(&self, _: Document, _: &str) -> StoreResult<Option<Document>> {
            Ok(self.stored.first().cloned())
        }

        async fn delete_many(&self, _: Document, _: &str) -> StoreResult<u64> {
            Ok(self.stored.len() as u64)
        }
    }

    fn users() -> CollectionName {
        CollectionName::parse("users").unwrap()
    }

    #[tokio::test]
    async fn engine_reported_lifecycle_failures_collapse_to_false() {
        let store =
            DocumentStore::new(ScriptedBackend::failing(StoreError::Storage("exists".into())))
                .into_dyn();

        let created = create_collection(&store, &users(), CollectionOptions::default()).await;
        let dropped = drop_collection(&store, &users()).await;

        assert_eq!(created, Ok(OperationResult::Bool(false)));
        assert_eq!(dropped, Ok(OperationResult::Bool(false)));
    }

    #[tokio::test]
    async fn connection_failures_are_never_collapsed() {
        let err = StoreError::Connection("server selection timeout".into());
        let store = DocumentStore::new(ScriptedBackend::failing(err.clone())).into_dyn();

        assert_eq!(drop_collection(&store, &users()).await, Err(err.clone()));
        assert_eq!(
            create_collection(&store, &users(), CollectionOptions::default()).await,
            Err(err)
        );
    }

    #[tokio::test]
    async fn create_returns_documents_with_ids_in_the_shape_given() {
        let store = DocumentStore::new(ScriptedBackend::holding(vec![])).into_dyn();
        let name = users();
        let collection = resolve(&store, &name);

        let one = create(&collection, Insert::One(doc! { "name": "Ann" })).await.unwrap();
        let many = create(
            &collection,
            Insert::Many(vec![doc! { "_id": 1, "name": "Bob" }, doc! { "name": "Cid" }]),
        )
        .await
        .unwrap();

        let OperationResult::Document(Some(ann)) = one else {
            panic!("expected a single document, found {one:?}");
        };
        assert!(ann.get_object_id(ID_FIELD).is_ok());

        let OperationResult::Documents(inserted) = many else {
            panic!("expected a document list, found {many:?}");
        };
        assert_eq!(inserted[0].get(ID_FIELD), Some(&Bson::Int32(1)));
        assert!(inserted[1].get_object_id(ID_FIELD).is_ok());
    }

    #[tokio::test]
    async fn find_by_id_yields_null_when_nothing_matches() {
        let store = DocumentStore::new(ScriptedBackend::holding(vec![])).into_dyn();
        let name = users();

        let found = find_by_id(&resolve(&store, &name), Bson::Int32(7)).await;

        assert_eq!(found, Ok(OperationResult::Document(None)));
    }

    #[tokio::test]
    async fn exists_agrees_with_count() {
        for stored in [vec![], vec![doc! { "_id": 1 }, doc! { "_id": 2 }]] {
            let store = DocumentStore::new(ScriptedBackend::holding(stored)).into_dyn();
            let name = users();
            let collection = resolve(&store, &name);

            let exists = exists(&collection, doc! {}).await.unwrap();
            let count = count(&collection, Query::new()).await.unwrap();

            let OperationResult::Count(n) = count else {
                panic!("expected a count, found {count:?}");
            };
            assert_eq!(exists, OperationResult::Bool(n > 0));
        }
    }

    #[tokio::test]
    async fn multi_updates_report_a_summary() {
        let store =
            DocumentStore::new(ScriptedBackend::holding(vec![doc! { "_id": 1 }, doc! { "_id": 2 }]))
                .into_dyn();
        let name = users();
        let collection = resolve(&store, &name);

        let single = update(&collection, doc! {}, doc! { "$set": { "a": 1 } }, false, false)
            .await
            .unwrap();
        let multi = update(&collection, doc! {}, doc! { "$set": { "a": 1 } }, false, true)
            .await
            .unwrap();

        assert_eq!(single, OperationResult::Document(Some(doc! { "_id": 1 })));
        assert_eq!(
            multi,
            OperationResult::Mutation(UpdateSummary {
                matched_count: 2,
                modified_count: 2,
                upserted_id: None,
            })
        );
    }

    #[tokio::test]
    async fn remove_acknowledges_the_deleted_count() {
        let store = DocumentStore::new(ScriptedBackend::holding(vec![doc! { "_id": 1 }])).into_dyn();
        let name = users();

        let removed = remove(&resolve(&store, &name), doc! {}).await;

        assert_eq!(removed, Ok(OperationResult::Removed { deleted_count: 1 }));
    }
}
