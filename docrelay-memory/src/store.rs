use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;

use docrelay_core::{
    backend::{CollectionOptions, StoreBackend, StoreBackendBuilder, UpdateSummary},
    document::{ID_FIELD, id_of},
    error::{StoreError, StoreResult},
    query::{Query, SortDirection},
};

use crate::{
    evaluator::{compare_values, lookup, matcher},
    update::{apply_update, project, replacement_for, upsert_document},
};

/// A collection: documents in insertion order plus the options it was created with.
#[derive(Debug, Clone, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    options: CollectionOptions,
}

impl MemoryCollection {
    fn position_of(&self, filter: &Document) -> StoreResult<Option<usize>> {
        let matches = matcher(filter)?;

        for (index, document) in self.documents.iter().enumerate() {
            if matches(document)? {
                return Ok(Some(index));
            }
        }

        Ok(None)
    }

    fn check_unique(&self, name: &str, document: &Document) -> StoreResult<()> {
        let id = id_of(document);
        let duplicate = self
            .documents
            .iter()
            .any(|existing| compare_values(id_of(existing), id) == Ordering::Equal);

        if duplicate {
            return Err(StoreError::Storage(format!(
                "E11000 duplicate key error collection: {name} index: _id_ dup key: {{ _id: {} }}",
                id.cloned().unwrap_or(Bson::Null)
            )));
        }

        Ok(())
    }

    fn check_validator(&self, document: &Document) -> StoreResult<()> {
        if let Some(validator) = &self.options.validator {
            if !matcher(validator)?(document)? {
                return Err(StoreError::Storage("Document failed validation".into()));
            }
        }

        Ok(())
    }

    /// Appends a document, evicting the oldest ones beyond a capped collection's `max`.
    /// A `max` of zero places no limit on the document count.
    fn push(&mut self, document: Document) {
        self.documents.push(document);

        let max = self.options.max.filter(|max| *max > 0);
        if let (true, Some(max)) = (self.options.capped, max) {
            let excess = self.documents.len().saturating_sub(max as usize);
            self.documents.drain(..excess);
        }
    }
}

type StoreMap = HashMap<String, MemoryCollection>;

/// A [`StoreBackend`] keeping every collection in process memory.
///
/// Clones share the same data. Writers take the store-wide write lock, which makes
/// every single-document mutation atomic.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

fn sorted(mut documents: Vec<Document>, query: &Query) -> Vec<Document> {
    if !query.sort.is_empty() {
        documents.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|sort| {
                    let ordering = compare_values(lookup(a, &sort.field), lookup(b, &sort.field));
                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    documents
}

fn page<T>(items: impl IntoIterator<Item = T>, query: &Query) -> impl Iterator<Item = T> {
    let offset = query.offset.map_or(0, |offset| offset as usize);
    let limit = query
        .limit
        .filter(|limit| *limit > 0)
        .map_or(usize::MAX, |limit| limit as usize);

    items.into_iter().skip(offset).take(limit)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_collection(&self, name: &str, options: CollectionOptions) -> StoreResult<()> {
        let mut store = self.store.write().await;

        if store.contains_key(name) {
            return Err(StoreError::Storage(format!(
                "Collection {name} already exists"
            )));
        }

        tracing::debug!(collection = name, capped = options.capped, "Created collection");
        store.insert(
            name.to_string(),
            MemoryCollection {
                documents: vec![],
                options,
            },
        );

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let mut store = self.store.write().await;

        if store.remove(name).is_none() {
            return Err(StoreError::Storage("ns not found".into()));
        }

        tracing::debug!(collection = name, "Dropped collection");
        Ok(())
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        names.sort();

        Ok(names)
    }

    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> StoreResult<()> {
        let mut store = self.store.write().await;
        let target = store.entry(collection.to_string()).or_default();

        // Check the whole batch first so a failed insert leaves nothing behind.
        let mut staged = target.clone();
        for document in documents {
            if !document.contains_key(ID_FIELD) {
                return Err(StoreError::Storage(format!(
                    "document inserted into {collection} has no {ID_FIELD}"
                )));
            }
            staged.check_validator(&document)?;
            staged.check_unique(collection, &document)?;
            staged.push(document);
        }
        *target = staged;

        Ok(())
    }

    async fn query_documents(&self, query: Query, collection: &str) -> StoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(target) = store.get(collection) else {
            return Ok(vec![]);
        };

        let matches = matcher(&query.filter)?;
        let mut found = Vec::new();
        for document in &target.documents {
            if matches(document)? {
                found.push(document.clone());
            }
        }

        page(sorted(found, &query), &query)
            .map(|document| match &query.projection {
                Some(projection) => project(&document, projection),
                None => Ok(document),
            })
            .collect()
    }

    async fn count_documents(&self, query: Query, collection: &str) -> StoreResult<u64> {
        let store = self.store.read().await;
        let Some(target) = store.get(collection) else {
            return Ok(0);
        };

        let matches = matcher(&query.filter)?;
        let mut matched = 0_usize;
        for document in &target.documents {
            if matches(document)? {
                matched += 1;
            }
        }

        Ok(page(0..matched, &query).count() as u64)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        let mut store = self.store.write().await;

        let existing = match store.get(collection) {
            Some(target) => target.position_of(&filter)?,
            None => None,
        };

        match existing {
            Some(index) => {
                let target = store.entry(collection.to_string()).or_default();
                let mut document = target.documents[index].clone();
                apply_update(&mut document, &update)?;
                target.check_validator(&document)?;
                target.documents[index] = document.clone();
                Ok(Some(document))
            }
            None if upsert => {
                let document = upsert_document(&filter, &update)?;
                let target = store.entry(collection.to_string()).or_default();
                target.check_validator(&document)?;
                target.check_unique(collection, &document)?;
                target.push(document.clone());
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<UpdateSummary> {
        let mut store = self.store.write().await;
        let matches = matcher(&filter)?;

        if !store.contains_key(collection) {
            if !upsert {
                return Ok(UpdateSummary::default());
            }
            let document = upsert_document(&filter, &update)?;
            let upserted_id = id_of(&document).cloned();
            let target = store.entry(collection.to_string()).or_default();
            target.check_validator(&document)?;
            target.push(document);
            return Ok(UpdateSummary {
                upserted_id,
                ..UpdateSummary::default()
            });
        }

        let target = store.entry(collection.to_string()).or_default();
        let mut staged = target.documents.clone();
        let mut summary = UpdateSummary::default();
        for document in staged.iter_mut() {
            if matches(document)? {
                summary.matched_count += 1;
                if apply_update(document, &update)? {
                    target.check_validator(document)?;
                    summary.modified_count += 1;
                }
            }
        }

        if summary.matched_count == 0 && upsert {
            let document = upsert_document(&filter, &update)?;
            target.check_validator(&document)?;
            target.check_unique(collection, &document)?;
            summary.upserted_id = id_of(&document).cloned();
            target.push(document);
        } else {
            target.documents = staged;
        }

        Ok(summary)
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        upsert: bool,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        let mut store = self.store.write().await;

        let existing = match store.get(collection) {
            Some(target) => target.position_of(&filter)?,
            None => None,
        };

        match existing {
            Some(index) => {
                let target = store.entry(collection.to_string()).or_default();
                let document = replacement_for(id_of(&target.documents[index]), &replacement)?;
                target.check_validator(&document)?;
                target.documents[index] = document.clone();
                Ok(Some(document))
            }
            None if upsert => {
                let seeded_id = filter.get(ID_FIELD).filter(|id| !matches!(id, Bson::Document(_)));
                let document = replacement_for(seeded_id, &replacement)?;
                let target = store.entry(collection.to_string()).or_default();
                target.check_validator(&document)?;
                target.check_unique(collection, &document)?;
                target.push(document.clone());
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        collection: &str,
    ) -> StoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(target) = store.get_mut(collection) else {
            return Ok(None);
        };

        Ok(target
            .position_of(&filter)?
            .map(|index| target.documents.remove(index)))
    }

    async fn delete_many(&self, filter: Document, collection: &str) -> StoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(target) = store.get_mut(collection) else {
            return Ok(0);
        };

        let matches = matcher(&filter)?;
        let mut doomed = Vec::with_capacity(target.documents.len());
        for document in &target.documents {
            doomed.push(matches(document)?);
        }

        let mut flags = doomed.iter();
        target.documents.retain(|_| !flags.next().copied().unwrap_or(false));
        let deleted = doomed.iter().filter(|doomed| **doomed).count() as u64;

        Ok(deleted)
    }
}

#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        tracing::info!("In-memory store ready");
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_documents(
                vec![
                    doc! { "_id": 1, "name": "Ann", "age": 34 },
                    doc! { "_id": 2, "name": "Bob", "age": 27 },
                    doc! { "_id": 3, "name": "Cid", "age": 41 },
                ],
                "users",
            )
            .await
            .unwrap();
        store
    }

    fn names(documents: &[Document]) -> Vec<&str> {
        documents
            .iter()
            .map(|document| document.get_str("name").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn collection_lifecycle_reports_engine_errors() {
        let store = InMemoryStore::new();

        store
            .create_collection("users", CollectionOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            store
                .create_collection("users", CollectionOptions::default())
                .await,
            Err(StoreError::Storage(_))
        ));
        assert_eq!(store.list_collections().await.unwrap(), vec!["users"]);

        store.drop_collection("users").await.unwrap();
        assert!(matches!(
            store.drop_collection("users").await,
            Err(StoreError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_ids_reject_the_whole_batch() {
        let store = seeded().await;

        let result = store
            .insert_documents(vec![doc! { "_id": 4 }, doc! { "_id": 1 }], "users")
            .await;

        assert!(matches!(result, Err(StoreError::Storage(message)) if message.contains("E11000")));
        assert_eq!(store.count_documents(Query::new(), "users").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ids_equal_across_numeric_types_are_duplicates() {
        let store = seeded().await;

        for id in [Bson::Int64(2), Bson::Double(2.0)] {
            let result = store.insert_documents(vec![doc! { "_id": id }], "users").await;

            assert!(matches!(result, Err(StoreError::Storage(message)) if message.contains("E11000")));
        }

        let filter = Query::builder().filter(doc! { "_id": 2 }).build();
        assert_eq!(store.count_documents(filter, "users").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn queries_sort_page_and_project() {
        let store = seeded().await;

        let query = Query::builder()
            .filter(doc! { "age": { "$gte": 27 } })
            .sort("age", SortDirection::Desc)
            .offset(1)
            .limit(1)
            .projection(doc! { "name": 1 })
            .build();

        let found = store.query_documents(query, "users").await.unwrap();

        assert_eq!(found, vec![doc! { "_id": 1, "name": "Ann" }]);
    }

    #[tokio::test]
    async fn missing_collections_read_as_empty() {
        let store = InMemoryStore::new();

        assert!(store.query_documents(Query::new(), "nope").await.unwrap().is_empty());
        assert_eq!(store.count_documents(Query::new(), "nope").await.unwrap(), 0);
        assert_eq!(store.delete_many(doc! {}, "nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counts_honor_limit_and_offset() {
        let store = seeded().await;

        let query = Query {
            offset: Some(1),
            limit: Some(5),
            ..Query::default()
        };

        assert_eq!(store.count_documents(query, "users").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn find_one_and_update_returns_the_updated_document() {
        let store = seeded().await;

        let updated = store
            .find_one_and_update(doc! { "name": "Bob" }, doc! { "$inc": { "age": 1 } }, false, "users")
            .await
            .unwrap();
        let missing = store
            .find_one_and_update(doc! { "name": "Dee" }, doc! { "$inc": { "age": 1 } }, false, "users")
            .await
            .unwrap();

        assert_eq!(updated, Some(doc! { "_id": 2, "name": "Bob", "age": 28 }));
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn upserting_update_inserts_from_the_filter() {
        let store = seeded().await;

        let inserted = store
            .find_one_and_update(doc! { "name": "Dee" }, doc! { "$set": { "age": 19 } }, true, "users")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(inserted.get_str("name").unwrap(), "Dee");
        assert_eq!(store.count_documents(Query::new(), "users").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn update_many_summarizes() {
        let store = seeded().await;

        let summary = store
            .update_many(doc! { "age": { "$gt": 30 } }, doc! { "$set": { "senior": true } }, false, "users")
            .await
            .unwrap();

        assert_eq!(summary.matched_count, 2);
        assert_eq!(summary.modified_count, 2);
        assert_eq!(summary.upserted_id, None);

        let seniors = store
            .query_documents(Query::matching(doc! { "senior": true }), "users")
            .await
            .unwrap();
        assert_eq!(names(&seniors), vec!["Ann", "Cid"]);
    }

    #[tokio::test]
    async fn failed_update_many_changes_nothing() {
        let store = seeded().await;

        let result = store
            .update_many(doc! {}, doc! { "$inc": { "name": 1 } }, false, "users")
            .await;

        assert!(result.is_err());
        assert_eq!(
            store
                .count_documents(Query::matching(doc! { "name": "Ann" }), "users")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn replace_keeps_the_id_and_upserts_on_request() {
        let store = seeded().await;

        let replaced = store
            .find_one_and_replace(doc! { "name": "Ann" }, doc! { "name": "Ann B." }, false, "users")
            .await
            .unwrap();
        let upserted = store
            .find_one_and_replace(doc! { "name": "Eve" }, doc! { "name": "Eve" }, true, "users")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(replaced, Some(doc! { "_id": 1, "name": "Ann B." }));
        assert!(upserted.get_object_id(ID_FIELD).is_ok());
    }

    #[tokio::test]
    async fn delete_one_returns_the_prior_document() {
        let store = seeded().await;

        let removed = store
            .find_one_and_delete(doc! { "_id": 2 }, "users")
            .await
            .unwrap();
        let again = store
            .find_one_and_delete(doc! { "_id": 2 }, "users")
            .await
            .unwrap();

        assert_eq!(removed.map(|d| d.get_i32("age").unwrap()), Some(27));
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn delete_many_counts_removals() {
        let store = seeded().await;

        let deleted = store
            .delete_many(doc! { "age": { "$lt": 40 } }, "users")
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        let left = store.query_documents(Query::new(), "users").await.unwrap();
        assert_eq!(names(&left), vec!["Cid"]);
    }

    #[tokio::test]
    async fn validators_and_caps_apply_to_writes() {
        let store = InMemoryStore::new();
        store
            .create_collection(
                "events",
                CollectionOptions {
                    capped: true,
                    size: Some(4096),
                    max: Some(2),
                    validator: Some(doc! { "kind": { "$exists": true } }),
                },
            )
            .await
            .unwrap();

        assert!(
            store
                .insert_documents(vec![doc! { "_id": 0 }], "events")
                .await
                .is_err()
        );

        for id in 1..=3 {
            store
                .insert_documents(vec![doc! { "_id": id, "kind": "tick" }], "events")
                .await
                .unwrap();
        }

        let ids: Vec<i32> = store
            .query_documents(Query::new(), "events")
            .await
            .unwrap()
            .iter()
            .map(|document| document.get_i32(ID_FIELD).unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn capped_collections_without_a_document_limit_keep_everything() {
        let store = InMemoryStore::new();
        store
            .create_collection(
                "events",
                CollectionOptions {
                    capped: true,
                    size: Some(4096),
                    max: Some(0),
                    validator: None,
                },
            )
            .await
            .unwrap();

        store
            .insert_documents(vec![doc! { "_id": 1 }, doc! { "_id": 2 }], "events")
            .await
            .unwrap();

        assert_eq!(store.count_documents(Query::new(), "events").await.unwrap(), 2);
    }
}
