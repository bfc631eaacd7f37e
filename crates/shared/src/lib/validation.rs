use crate::crypto::{self, CryptoError};
use crate::entities::{
    Asset, Bundle, BundleContent, BundleEntry, BundleIdData, BundleMetadata, Event,
};
use crate::schemas::TYPE_SCHEMAS;
use k256::ecdsa::SigningKey;
use serde_json::Value;
use thiserror::Error;

/// Ingress timestamps must be within this many seconds of the node's clock.
pub const DEFAULT_TIMESTAMP_LIMIT: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub data_path: String,
    pub message: String,
}

/// Structured schema failures, ordered as encountered while traversing the
/// data entries.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("JSON schema validation failed: {0} violation(s)", errors.len())]
pub struct JsonValidationError {
    pub errors: Vec<SchemaViolation>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Malformed entity: {0}")]
    Shape(String),

    #[error("{field} does not match its content: expected {expected}, computed {computed}")]
    HashMismatch {
        field: &'static str,
        expected: String,
        computed: String,
    },

    #[error(transparent)]
    Signature(#[from] CryptoError),

    #[error("Timestamp {timestamp} is more than {limit}s away from current time {now}")]
    TimestampOutOfRange { timestamp: u64, now: u64, limit: u64 },

    #[error(transparent)]
    Schema(#[from] JsonValidationError),
}

/// Validation gate for every ingress path. Holds only immutable
/// configuration; check order is fixed (shape, then hashes, then signature,
/// then timestamp) and tests depend on the first failure class.
#[derive(Debug, Clone)]
pub struct EntityValidator {
    timestamp_limit: u64,
}

impl Default for EntityValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_LIMIT)
    }
}

impl EntityValidator {
    pub fn new(timestamp_limit: u64) -> Self {
        Self { timestamp_limit }
    }

    pub fn parse_asset(&self, raw: &Value) -> Result<Asset, ValidationError> {
        serde_json::from_value(raw.clone()).map_err(|e| ValidationError::Shape(e.to_string()))
    }

    pub fn parse_event(&self, raw: &Value) -> Result<Event, ValidationError> {
        serde_json::from_value(raw.clone()).map_err(|e| ValidationError::Shape(e.to_string()))
    }

    pub fn parse_bundle(&self, raw: &Value) -> Result<Bundle, ValidationError> {
        serde_json::from_value(raw.clone()).map_err(|e| ValidationError::Shape(e.to_string()))
    }

    pub fn validate_asset(&self, asset: &Asset, now: u64) -> Result<(), ValidationError> {
        Self::check_hash("assetId", &asset.asset_id, &asset.content)?;
        crypto::validate_signature(
            &asset.content.id_data.created_by,
            &asset.content.signature,
            &asset.content.id_data,
        )?;
        self.check_timestamp(asset.content.id_data.timestamp, now)?;
        Ok(())
    }

    pub fn validate_event(&self, event: &Event, now: u64) -> Result<(), ValidationError> {
        let data = event
            .content
            .data
            .as_ref()
            .ok_or_else(|| ValidationError::Shape("content.data is required".to_owned()))?;
        self.validate_data_entries(data)?;
        Self::check_hash("eventId", &event.event_id, &event.content)?;
        Self::check_hash("dataHash", &event.content.id_data.data_hash, data)?;
        crypto::validate_signature(
            &event.content.id_data.created_by,
            &event.content.signature,
            &event.content.id_data,
        )?;
        self.check_timestamp(event.content.id_data.timestamp, now)?;
        Ok(())
    }

    /// Bundles carry no ingress timestamp constraint; entries were validated
    /// when first accepted, and redacted events are not re-checkable anyway.
    pub fn validate_bundle(&self, bundle: &Bundle) -> Result<(), ValidationError> {
        Self::check_hash("bundleId", &bundle.bundle_id, &bundle.content)?;
        Self::check_hash(
            "entriesHash",
            &bundle.content.id_data.entries_hash,
            &bundle.content.entries,
        )?;
        crypto::validate_signature(
            &bundle.content.id_data.created_by,
            &bundle.content.signature,
            &bundle.content.id_data,
        )?;
        Ok(())
    }

    fn validate_data_entries(&self, data: &[Value]) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        for (index, entry) in data.iter().enumerate() {
            if let Err(entry_violations) = TYPE_SCHEMAS.validate_entry(entry) {
                violations.extend(entry_violations.errors.into_iter().map(|violation| {
                    SchemaViolation {
                        data_path: format!("/{index}{}", violation.data_path),
                        message: violation.message,
                    }
                }));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(JsonValidationError { errors: violations }.into())
        }
    }

    fn check_hash<T: serde::Serialize>(
        field: &'static str,
        expected: &str,
        value: &T,
    ) -> Result<(), ValidationError> {
        let computed = crypto::calculate_hash(value)?;
        if computed != expected {
            return Err(ValidationError::HashMismatch {
                field,
                expected: expected.to_owned(),
                computed,
            });
        }
        Ok(())
    }

    fn check_timestamp(&self, timestamp: u64, now: u64) -> Result<(), ValidationError> {
        if now.abs_diff(timestamp) > self.timestamp_limit {
            return Err(ValidationError::TimestampOutOfRange {
                timestamp,
                now,
                limit: self.timestamp_limit,
            });
        }
        Ok(())
    }
}

/// Returns a copy with `metadata.bundleId` set. Other metadata is preserved.
pub fn set_bundle_id<E: BundleAssignment>(entity: &E, bundle_id: &str) -> E {
    entity.with_bundle_id(Some(bundle_id.to_owned()))
}

/// Inverse of `set_bundle_id` for an entity that carried no bundle id.
pub fn remove_bundle_id<E: BundleAssignment>(entity: &E) -> E {
    entity.with_bundle_id(None)
}

pub trait BundleAssignment: Clone {
    fn bundle_id(&self) -> Option<&str>;
    fn with_bundle_id(&self, bundle_id: Option<String>) -> Self;
}

impl BundleAssignment for Asset {
    fn bundle_id(&self) -> Option<&str> {
        self.metadata.bundle_id.as_deref()
    }

    fn with_bundle_id(&self, bundle_id: Option<String>) -> Self {
        let mut copy = self.clone();
        copy.metadata.bundle_id = bundle_id;
        copy
    }
}

impl BundleAssignment for Event {
    fn bundle_id(&self) -> Option<&str> {
        self.metadata.bundle_id.as_deref()
    }

    fn with_bundle_id(&self, bundle_id: Option<String>) -> Self {
        let mut copy = self.clone();
        copy.metadata.bundle_id = bundle_id;
        copy
    }
}

/// Stamps the server-side ingress time, in seconds.
pub fn set_entity_upload_timestamp(event: &Event, now: u64) -> Event {
    let mut copy = event.clone();
    copy.metadata.entity_upload_timestamp = Some(now);
    copy
}

/// Events above access level 0 are published with their data stripped.
pub fn prepare_event_for_bundle_publication(event: &Event) -> Event {
    event.redact_for_access_level(0)
}

/// Composes and signs a bundle out of claimed entities. Entities enter the
/// bundle with their claim stub stripped; events are redacted for
/// publication.
pub fn assemble_bundle(
    assets: &[Asset],
    events: &[Event],
    timestamp: u64,
    secret: &SigningKey,
) -> Result<Bundle, CryptoError> {
    let entries: Vec<BundleEntry> = assets
        .iter()
        .map(|asset| BundleEntry::Asset(remove_bundle_id(asset)))
        .chain(events.iter().map(|event| {
            BundleEntry::Event(prepare_event_for_bundle_publication(&remove_bundle_id(event)))
        }))
        .collect();

    let entries_hash = crypto::calculate_hash(&entries)?;
    let id_data = BundleIdData {
        created_by: crypto::address_from_secret(secret).to_checksum(None),
        timestamp,
        entries_hash,
    };
    let signature = crypto::sign(secret, &id_data)?;
    let content = BundleContent {
        id_data,
        signature,
        entries,
    };
    let bundle_id = crypto::calculate_hash(&content)?;

    Ok(Bundle {
        bundle_id,
        content,
        metadata: BundleMetadata::default(),
    })
}

/// Client-side composition of signed entities. The node itself only uses it
/// in tests and tooling, but it is the reference for what a valid entity
/// looks like.
pub struct EntityBuilder {
    secret: SigningKey,
}

impl EntityBuilder {
    pub fn new(secret: SigningKey) -> Self {
        Self { secret }
    }

    pub fn address(&self) -> String {
        crypto::address_from_secret(&self.secret).to_checksum(None)
    }

    pub fn build_asset(&self, timestamp: u64, sequence_number: u64) -> Result<Asset, CryptoError> {
        let id_data = crate::entities::AssetIdData {
            created_by: self.address(),
            timestamp,
            sequence_number,
        };
        let signature = crypto::sign(&self.secret, &id_data)?;
        let content = crate::entities::AssetContent { id_data, signature };
        let asset_id = crypto::calculate_hash(&content)?;
        Ok(Asset {
            asset_id,
            content,
            metadata: Default::default(),
        })
    }

    pub fn build_event(
        &self,
        asset_id: &str,
        timestamp: u64,
        access_level: u64,
        data: Vec<Value>,
    ) -> Result<Event, CryptoError> {
        let data_hash = crypto::calculate_hash(&data)?;
        let id_data = crate::entities::EventIdData {
            asset_id: asset_id.to_owned(),
            created_by: self.address(),
            timestamp,
            data_hash,
            access_level,
        };
        let signature = crypto::sign(&self.secret, &id_data)?;
        let content = crate::entities::EventContent {
            id_data,
            data: Some(data),
            signature,
        };
        let event_id = crypto::calculate_hash(&content)?;
        Ok(Event {
            event_id,
            content,
            metadata: Default::default(),
        })
    }
}
