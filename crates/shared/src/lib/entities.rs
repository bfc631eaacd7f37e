use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root entity: a physical or digital object registered on the ledger.
/// Immutable after creation; `asset_id` is the keccak hash of `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Asset {
    pub asset_id: String,
    pub content: AssetContent,
    #[serde(default, skip_serializing_if = "AssetMetadata::is_empty")]
    pub metadata: AssetMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AssetContent {
    pub id_data: AssetIdData,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AssetIdData {
    pub created_by: String,
    pub timestamp: u64,
    pub sequence_number: u64,
}

/// Server-side bookkeeping; never part of the signed content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AssetMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_transaction_hash: Option<String>,
}

impl AssetMetadata {
    pub fn is_empty(&self) -> bool {
        self.bundle_id.is_none() && self.bundle_transaction_hash.is_none()
    }
}

/// A timestamped observation attached to an asset. `data` carries the typed
/// entries and is the part gated by `access_level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub content: EventContent,
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EventContent {
    pub id_data: EventIdData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EventIdData {
    pub asset_id: String,
    pub created_by: String,
    pub timestamp: u64,
    pub data_hash: String,
    pub access_level: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_upload_timestamp: Option<u64>,
}

impl EventMetadata {
    pub fn is_empty(&self) -> bool {
        self.bundle_id.is_none()
            && self.bundle_transaction_hash.is_none()
            && self.entity_upload_timestamp.is_none()
    }
}

/// A signed collection of assets and redacted events, committed on-chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Bundle {
    pub bundle_id: String,
    pub content: BundleContent,
    #[serde(default, skip_serializing_if = "BundleMetadata::is_empty")]
    pub metadata: BundleMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BundleContent {
    pub id_data: BundleIdData,
    pub signature: String,
    pub entries: Vec<BundleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BundleIdData {
    pub created_by: String,
    pub timestamp: u64,
    pub entries_hash: String,
}

/// Populated once the bundle proof lands on-chain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BundleMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_transaction_hash: Option<String>,
}

impl BundleMetadata {
    pub fn is_empty(&self) -> bool {
        self.proof_block.is_none() && self.bundle_transaction_hash.is_none()
    }
}

/// Bundle entries are assets or (possibly redacted) events. The id field
/// disambiguates the untagged representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundleEntry {
    Asset(Asset),
    Event(Event),
}

impl BundleEntry {
    pub fn id(&self) -> &str {
        match self {
            BundleEntry::Asset(asset) => &asset.asset_id,
            BundleEntry::Event(event) => &event.event_id,
        }
    }
}

impl Event {
    pub fn access_level(&self) -> u64 {
        self.content.id_data.access_level
    }

    /// The single redaction predicate: data is disclosed only to requesters
    /// at or above the event's access level. Bundle assembly publishes at
    /// level 0.
    pub fn redact_for_access_level(&self, requester_level: u64) -> Event {
        if self.access_level() > requester_level {
            let mut redacted = self.clone();
            redacted.content.data = None;
            redacted
        } else {
            self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub fn sample_event(access_level: u64) -> Event {
        Event {
            event_id: "0x1111".to_owned(),
            content: EventContent {
                id_data: EventIdData {
                    asset_id: "0x2222".to_owned(),
                    created_by: "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be".to_owned(),
                    timestamp: 10,
                    data_hash: "0x3333".to_owned(),
                    access_level,
                },
                data: Some(vec![json!({"type": "ambrosus.asset.info", "name": "crate"})]),
                signature: "0xdead".to_owned(),
            },
            metadata: EventMetadata::default(),
        }
    }

    #[test]
    fn unknown_root_fields_are_rejected() {
        let raw = json!({
            "assetId": "0x1",
            "content": {
                "idData": {
                    "createdBy": "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be",
                    "timestamp": 1,
                    "sequenceNumber": 0
                },
                "signature": "0xdead"
            },
            "extraField": 42
        });
        assert!(serde_json::from_value::<Asset>(raw).is_err());
    }

    #[test]
    fn unknown_content_fields_are_rejected() {
        let raw = json!({
            "assetId": "0x1",
            "content": {
                "idData": {
                    "createdBy": "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be",
                    "timestamp": 1,
                    "sequenceNumber": 0
                },
                "signature": "0xdead",
                "entries": []
            }
        });
        assert!(serde_json::from_value::<Asset>(raw).is_err());
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let raw = json!({
            "assetId": "0x1",
            "content": {
                "idData": {
                    "createdBy": "0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be",
                    "timestamp": -5,
                    "sequenceNumber": 0
                },
                "signature": "0xdead"
            }
        });
        assert!(serde_json::from_value::<Asset>(raw).is_err());
    }

    #[test]
    fn redaction_strips_data_only_above_requester_level() {
        let event = sample_event(5);

        let redacted = event.redact_for_access_level(2);
        assert!(redacted.content.data.is_none());
        assert_eq!(redacted.content.id_data, event.content.id_data);
        assert_eq!(redacted.metadata, event.metadata);

        let intact = event.redact_for_access_level(5);
        assert_eq!(intact, event);
    }

    #[test]
    fn empty_metadata_is_not_serialized() {
        let event = sample_event(0);
        let as_json = serde_json::to_value(&event).unwrap();
        assert!(as_json.get("metadata").is_none());
    }

    #[test]
    fn bundle_entry_dispatches_on_id_field() {
        let event = sample_event(0);
        let entry: BundleEntry =
            serde_json::from_value(serde_json::to_value(&event).unwrap()).unwrap();
        assert!(matches!(entry, BundleEntry::Event(_)));
        assert_eq!(entry.id(), "0x1111");
    }
}
