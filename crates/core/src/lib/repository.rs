use crate::store::{Datastore, FindQuery, SortOrder, StoreError};
use ambrosus_node_shared::entities::{Asset, Bundle, Event};
use ambrosus_node_shared::query::{FindAssetsParams, FindEventsParams, DEFAULT_PAGE, DEFAULT_PER_PAGE};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

pub const ASSETS_COLLECTION: &str = "assets";
pub const EVENTS_COLLECTION: &str = "events";
pub const BUNDLES_COLLECTION: &str = "bundles";

const TIMESTAMP_PATH: &str = "content.idData.timestamp";
const ACCESS_LEVEL_PATH: &str = "content.idData.accessLevel";
const BUNDLE_ID_PATH: &str = "metadata.bundleId";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Stored document is not a valid entity: {0}")]
    MalformedDocument(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindEventsResult {
    pub results: Vec<Event>,
    pub result_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindAssetsResult {
    pub results: Vec<Asset>,
    pub result_count: u64,
}

pub fn access_level_conjunct(access_level: u64) -> Value {
    json!({ACCESS_LEVEL_PATH: {"$lte": access_level}})
}

/// Ensures the requester's access-level bound is the leading conjunct.
/// Idempotent: a query that already constrains the access level is returned
/// unchanged.
pub fn add_data_access_level_limitation_if_needed(query: Value, access_level: u64) -> Value {
    let already_limited = query["$and"]
        .as_array()
        .is_some_and(|conjuncts| {
            conjuncts
                .iter()
                .any(|conjunct| conjunct.get(ACCESS_LEVEL_PATH).is_some())
        });
    if already_limited {
        return query;
    }

    let mut conjuncts = vec![access_level_conjunct(access_level)];
    if let Some(existing) = query["$and"].as_array() {
        conjuncts.extend(existing.iter().cloned());
    }
    json!({"$and": conjuncts})
}

/// Translates validated find-events params into the conjunctive filter. The
/// conjunct order is fixed: access level, data element-matches, geo, asset
/// id, creator, time range.
pub fn assemble_events_query(params: &FindEventsParams, access_level: u64) -> Value {
    let mut conjuncts: Vec<Value> = Vec::new();

    for (key, value) in &params.data {
        conjuncts.push(json!({"content.data": {"$elemMatch": {key.as_str(): value}}}));
    }
    if let Some(geo) = &params.geo {
        conjuncts.push(json!({"content.data.geoJson": {"$near": {
            "$geometry": {"type": "Point", "coordinates": [geo.longitude, geo.latitude]},
            "$maxDistance": geo.max_distance_meters
        }}}));
    }
    if let Some(asset_id) = &params.asset_id {
        conjuncts.push(json!({"content.idData.assetId": asset_id}));
    }
    if let Some(created_by) = &params.created_by {
        conjuncts.push(json!({"content.idData.createdBy": created_by}));
    }
    if let Some(from) = params.from_timestamp {
        conjuncts.push(json!({TIMESTAMP_PATH: {"$gte": from}}));
    }
    if let Some(to) = params.to_timestamp {
        conjuncts.push(json!({TIMESTAMP_PATH: {"$lte": to}}));
    }

    add_data_access_level_limitation_if_needed(json!({"$and": conjuncts}), access_level)
}

fn assemble_assets_query(params: &FindAssetsParams) -> Value {
    let mut conjuncts: Vec<Value> = Vec::new();
    if let Some(created_by) = &params.created_by {
        conjuncts.push(json!({"content.idData.createdBy": created_by}));
    }
    if let Some(from) = params.from_timestamp {
        conjuncts.push(json!({TIMESTAMP_PATH: {"$gte": from}}));
    }
    if let Some(to) = params.to_timestamp {
        conjuncts.push(json!({TIMESTAMP_PATH: {"$lte": to}}));
    }
    json!({"$and": conjuncts})
}

/// Durable storage for assets, events and bundles. Documents are persisted
/// verbatim; the id field is the primary key.
pub struct EntityRepository<S: Datastore> {
    store: Arc<S>,
}

impl<S: Datastore> EntityRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn store_asset(&self, asset: &Asset) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(asset)?;
        self.store
            .insert(ASSETS_COLLECTION, &asset.asset_id, document)
            .await?;
        Ok(())
    }

    pub async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>, RepositoryError> {
        let document = self.store.find_by_id(ASSETS_COLLECTION, asset_id).await?;
        document
            .map(serde_json::from_value)
            .transpose()
            .map_err(RepositoryError::from)
    }

    pub async fn store_event(&self, event: &Event) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(event)?;
        self.store
            .insert(EVENTS_COLLECTION, &event.event_id, document)
            .await?;
        Ok(())
    }

    /// Redaction on read: data is stripped whenever the event's access level
    /// exceeds the requester's.
    pub async fn get_event(
        &self,
        event_id: &str,
        access_level: u64,
    ) -> Result<Option<Event>, RepositoryError> {
        let document = self.store.find_by_id(EVENTS_COLLECTION, event_id).await?;
        let event: Option<Event> = document.map(serde_json::from_value).transpose()?;
        Ok(event.map(|event| event.redact_for_access_level(access_level)))
    }

    pub async fn find_events(
        &self,
        params: &FindEventsParams,
        access_level: u64,
    ) -> Result<FindEventsResult, RepositoryError> {
        let filter = assemble_events_query(params, access_level);
        let page = params.page.unwrap_or(DEFAULT_PAGE);
        let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);

        let query = FindQuery::filtered(filter.clone())
            .sorted_by(TIMESTAMP_PATH, SortOrder::Descending)
            .paginate(page, per_page);

        let documents = self.store.find(EVENTS_COLLECTION, &query).await?;
        let result_count = self.store.count(EVENTS_COLLECTION, &filter).await?;

        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            let event: Event = serde_json::from_value(document)?;
            results.push(event.redact_for_access_level(access_level));
        }
        Ok(FindEventsResult {
            results,
            result_count,
        })
    }

    pub async fn find_assets(
        &self,
        params: &FindAssetsParams,
    ) -> Result<FindAssetsResult, RepositoryError> {
        let filter = assemble_assets_query(params);
        let page = params.page.unwrap_or(DEFAULT_PAGE);
        let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);

        let query = FindQuery::filtered(filter.clone())
            .sorted_by(TIMESTAMP_PATH, SortOrder::Descending)
            .paginate(page, per_page);

        let documents = self.store.find(ASSETS_COLLECTION, &query).await?;
        let result_count = self.store.count(ASSETS_COLLECTION, &filter).await?;

        let results = documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Asset>, _>>()?;
        Ok(FindAssetsResult {
            results,
            result_count,
        })
    }

    pub async fn store_bundle(&self, bundle: &Bundle) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(bundle)?;
        self.store
            .insert(BUNDLES_COLLECTION, &bundle.bundle_id, document)
            .await?;
        Ok(())
    }

    pub async fn get_bundle(&self, bundle_id: &str) -> Result<Option<Bundle>, RepositoryError> {
        let document = self.store.find_by_id(BUNDLES_COLLECTION, bundle_id).await?;
        document
            .map(serde_json::from_value)
            .transpose()
            .map_err(RepositoryError::from)
    }

    /// Atomically claims every unbundled entity for the given stub. The claim
    /// is a filtered update (set the bundle id where it is currently null),
    /// so a concurrent caller with another stub observes no free entities;
    /// the returned sets are the update's postcondition, not a prior read.
    pub async fn begin_bundle(
        &self,
        stub_id: &str,
    ) -> Result<(Vec<Asset>, Vec<Event>), RepositoryError> {
        let free = json!({BUNDLE_ID_PATH: null});
        let claim = json!({"$set": {BUNDLE_ID_PATH: stub_id}});
        self.store.update_many(ASSETS_COLLECTION, &free, &claim).await?;
        self.store.update_many(EVENTS_COLLECTION, &free, &claim).await?;

        let claimed = FindQuery::filtered(json!({BUNDLE_ID_PATH: stub_id}));
        let assets = self
            .store
            .find(ASSETS_COLLECTION, &claimed)
            .await?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Asset>, _>>()?;
        let events = self
            .store
            .find(EVENTS_COLLECTION, &claimed)
            .await?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Event>, _>>()?;
        Ok((assets, events))
    }

    /// Rewrites the stub claim into the real bundle id. Idempotent for a
    /// given `(stub_id, bundle_id)` pair: once renamed, nothing matches the
    /// stub and a repeat is a no-op.
    pub async fn end_bundle(&self, stub_id: &str, bundle_id: &str) -> Result<(), RepositoryError> {
        let claimed = json!({BUNDLE_ID_PATH: stub_id});
        let commit = json!({"$set": {BUNDLE_ID_PATH: bundle_id}});
        self.store.update_many(ASSETS_COLLECTION, &claimed, &commit).await?;
        self.store.update_many(EVENTS_COLLECTION, &claimed, &commit).await?;
        Ok(())
    }

    /// Releases claims back to the free state (the inverse of a claim that
    /// was never committed).
    pub async fn discard_bundling(&self, stub_id: &str) -> Result<(), RepositoryError> {
        let claimed = json!({BUNDLE_ID_PATH: stub_id});
        let release = json!({"$unset": {BUNDLE_ID_PATH: ""}});
        self.store.update_many(ASSETS_COLLECTION, &claimed, &release).await?;
        self.store.update_many(EVENTS_COLLECTION, &claimed, &release).await?;
        Ok(())
    }

    /// Releases specific entities out of a claim, e.g. when the claim
    /// overshoots the bundle item limit.
    pub async fn release_claimed_entities(
        &self,
        stub_id: &str,
        asset_ids: &[String],
        event_ids: &[String],
    ) -> Result<(), RepositoryError> {
        let release = json!({"$unset": {BUNDLE_ID_PATH: ""}});
        for asset_id in asset_ids {
            let filter = json!({"assetId": asset_id, BUNDLE_ID_PATH: stub_id});
            self.store.update_many(ASSETS_COLLECTION, &filter, &release).await?;
        }
        for event_id in event_ids {
            let filter = json!({"eventId": event_id, BUNDLE_ID_PATH: stub_id});
            self.store.update_many(EVENTS_COLLECTION, &filter, &release).await?;
        }
        Ok(())
    }

    /// Releases every claim whose id still looks like a stub. Stub ids sort
    /// inside the `[prefix, prefix~]` string range, while real bundle ids are
    /// hex hashes and fall outside it.
    pub async fn release_stale_claims(&self, stub_prefix: &str) -> Result<u64, RepositoryError> {
        let range = json!({BUNDLE_ID_PATH: {"$gte": stub_prefix, "$lte": format!("{stub_prefix}~")}});
        let release = json!({"$unset": {BUNDLE_ID_PATH: ""}});
        let assets = self.store.update_many(ASSETS_COLLECTION, &range, &release).await?;
        let events = self.store.update_many(EVENTS_COLLECTION, &range, &release).await?;
        Ok(assets + events)
    }

    /// Stamps the proof on the bundle record and propagates the transaction
    /// hash to every member entity.
    pub async fn store_bundle_proof_metadata(
        &self,
        bundle_id: &str,
        proof_block: u64,
        transaction_hash: &str,
    ) -> Result<(), RepositoryError> {
        let bundle_filter = json!({"bundleId": bundle_id});
        let bundle_update = json!({"$set": {
            "metadata.proofBlock": proof_block,
            "metadata.bundleTransactionHash": transaction_hash
        }});
        self.store
            .update_many(BUNDLES_COLLECTION, &bundle_filter, &bundle_update)
            .await?;

        let members = json!({BUNDLE_ID_PATH: bundle_id});
        let stamp = json!({"$set": {"metadata.bundleTransactionHash": transaction_hash}});
        self.store.update_many(ASSETS_COLLECTION, &members, &stamp).await?;
        self.store.update_many(EVENTS_COLLECTION, &members, &stamp).await?;
        Ok(())
    }

    /// Bundles that were committed locally but never proved on-chain; the
    /// upload worker re-submits these on its retry window.
    pub async fn find_bundles_without_proof(&self) -> Result<Vec<Bundle>, RepositoryError> {
        let query = FindQuery::filtered(json!({"metadata.bundleTransactionHash": null}));
        self.store
            .find(BUNDLES_COLLECTION, &query)
            .await?
            .into_iter()
            .map(|document| serde_json::from_value(document).map_err(RepositoryError::from))
            .collect()
    }
}
