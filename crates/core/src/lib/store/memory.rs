use crate::store::filters;
use crate::store::{Datastore, FindQuery, SortOrder, StoreError};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-process document store. Collections are id-keyed maps guarded by one
/// lock, so `update_many` applies its filter and mutation atomically with
/// respect to every other writer.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Datastore for MemoryDatastore {
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_owned()).or_default();
        if documents.contains_key(id) {
            return Err(StoreError::DuplicateId {
                collection: collection.to_owned(),
                id: id.to_owned(),
            });
        }
        documents.insert(id.to_owned(), document);
        Ok(())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        let mut results = Vec::new();
        if let Some(documents) = collections.get(collection) {
            for document in documents.values() {
                if filters::matches(document, &query.filter)? {
                    results.push(document.clone());
                }
            }
        }
        drop(collections);

        // A $near conjunct orders results nearest-first; otherwise the
        // requested sort applies.
        if let Some((path, spec)) = filters::extract_near(&query.filter) {
            results.sort_by(|a, b| {
                filters::distance_for_sorting(a, &path, &spec)
                    .partial_cmp(&filters::distance_for_sorting(b, &path, &spec))
                    .unwrap_or(Ordering::Equal)
            });
        } else if !query.sort.is_empty() {
            results.sort_by(|a, b| {
                for (path, order) in &query.sort {
                    let left = filters::resolve_path(a, path).first().cloned();
                    let right = filters::resolve_path(b, path).first().cloned();
                    let ordering = match (left, right) {
                        (Some(left), Some(right)) => filters::compare_values(left, right),
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                    };
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let skipped = results.into_iter().skip(query.skip as usize);
        let limited: Vec<Value> = match query.limit {
            Some(limit) => skipped.take(limit as usize).collect(),
            None => skipped.collect(),
        };
        Ok(limited)
    }

    async fn count(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let mut count = 0;
        if let Some(documents) = collections.get(collection) {
            for document in documents.values() {
                if filters::matches(document, filter)? {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let mut updated = 0;
        if let Some(documents) = collections.get_mut(collection) {
            for document in documents.values_mut() {
                if filters::matches(document, filter)? {
                    filters::apply_update(document, update)?;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }
}
