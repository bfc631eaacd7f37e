use serde_json::Value;
use std::future::Future;
use thiserror::Error;

pub mod filters;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate id {id} in collection {collection}")]
    DuplicateId { collection: String, id: String },

    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Malformed update document: {0}")]
    MalformedUpdate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A filtered, sorted, paginated read. Filters and updates are mongo-style
/// JSON documents: implicit equality, `$and`, `$lte`/`$gte`, `$elemMatch`,
/// `$near` over a GeoJSON point, `$set`/`$unset`, dotted paths throughout.
#[derive(Debug, Clone)]
pub struct FindQuery {
    pub filter: Value,
    pub sort: Vec<(String, SortOrder)>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindQuery {
    pub fn filtered(filter: Value) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            skip: 0,
            limit: None,
        }
    }

    pub fn sorted_by(mut self, path: &str, order: SortOrder) -> Self {
        self.sort.push((path.to_owned(), order));
        self
    }

    pub fn paginate(mut self, page: u64, per_page: u64) -> Self {
        self.skip = page * per_page;
        self.limit = Some(per_page);
        self
    }
}

/// Typed collection abstraction over the node's document store. Single-id
/// updates are atomic, and `update_many` applies its filter and mutation as
/// one step, which is what the bundling claim relies on.
pub trait Datastore: Send + Sync + 'static {
    fn insert(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    fn find(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> impl Future<Output = Result<Vec<Value>, StoreError>> + Send;

    fn count(
        &self,
        collection: &str,
        filter: &Value,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
