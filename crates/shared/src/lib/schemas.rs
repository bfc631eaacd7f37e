use crate::validation::{JsonValidationError, SchemaViolation};
use jsonschema::Validator;
use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Declarative registry of per-type data entry schemas. The validator is a
/// generic traverser: adding a type means adding a document to `type_schemas`
/// below, nothing else.
pub struct SchemaRegistry {
    entry_schema: Validator,
    by_type: HashMap<&'static str, Validator>,
}

pub const ASSET_IDENTIFIERS: &str = "ambrosus.asset.identifiers";
pub const EVENT_IDENTIFIERS: &str = "ambrosus.event.identifiers";
pub const ASSET_LOCATION: &str = "ambrosus.asset.location";
pub const EVENT_LOCATION: &str = "ambrosus.event.location";
pub const ASSET_INFO: &str = "ambrosus.asset.info";

/// Every data entry must satisfy this, whatever its type.
fn entry_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "type": {"type": "string"}
        },
        "required": ["type"]
    })
}

fn identifiers_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "type": {"type": "string"},
            "identifiers": {
                "type": "object",
                "minProperties": 1,
                "additionalProperties": {
                    "type": "array",
                    "minItems": 1,
                    "items": {"type": "string"}
                }
            }
        },
        "required": ["type", "identifiers"]
    })
}

fn location_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "type": {"type": "string"},
            "geoJson": {
                "type": "object",
                "properties": {
                    "type": {"const": "Point"},
                    "coordinates": {
                        "type": "array",
                        "minItems": 2,
                        "maxItems": 2,
                        "prefixItems": [
                            {"type": "number", "minimum": -180, "maximum": 180},
                            {"type": "number", "minimum": -90, "maximum": 90}
                        ]
                    }
                },
                "required": ["type", "coordinates"]
            },
            "assetId": {"type": "string", "pattern": "^0x[a-fA-F0-9]{64}$"},
            "name": {"type": "string"},
            "country": {"type": "string"},
            "city": {"type": "string"}
        },
        "required": ["type"]
    })
}

fn info_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "type": {"type": "string"},
            "name": {"type": "string"}
        },
        "required": ["type"]
    })
}

fn type_schemas() -> Vec<(&'static str, Value)> {
    vec![
        (ASSET_IDENTIFIERS, identifiers_schema()),
        (EVENT_IDENTIFIERS, identifiers_schema()),
        (ASSET_LOCATION, location_schema()),
        (EVENT_LOCATION, location_schema()),
        (ASSET_INFO, info_schema()),
    ]
}

impl SchemaRegistry {
    fn build() -> Self {
        let entry_schema = jsonschema::validator_for(&entry_schema())
            .expect("entry schema document is well-formed");
        let by_type = type_schemas()
            .into_iter()
            .map(|(type_name, schema)| {
                let validator = jsonschema::validator_for(&schema)
                    .unwrap_or_else(|e| panic!("schema for {type_name} is malformed: {e}"));
                (type_name, validator)
            })
            .collect();
        Self { entry_schema, by_type }
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.by_type.contains_key(type_name)
    }

    /// Validates a single data entry: the shared entry shape always applies;
    /// the type-specific schema applies only when the type is registered.
    /// Violation paths are relative to the entry.
    pub fn validate_entry(&self, entry: &Value) -> Result<(), JsonValidationError> {
        let mut violations: Vec<SchemaViolation> = self
            .entry_schema
            .iter_errors(entry)
            .map(|error| SchemaViolation {
                data_path: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect();

        if violations.is_empty() {
            if let Some(type_name) = entry.get("type").and_then(Value::as_str) {
                if let Some(validator) = self.by_type.get(type_name) {
                    violations.extend(validator.iter_errors(entry).map(|error| SchemaViolation {
                        data_path: error.instance_path.to_string(),
                        message: error.to_string(),
                    }));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(JsonValidationError { errors: violations })
        }
    }
}

lazy_static! {
    pub static ref TYPE_SCHEMAS: SchemaRegistry = SchemaRegistry::build();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_without_type_is_rejected() {
        let err = TYPE_SCHEMAS
            .validate_entry(&json!({"name": "no type here"}))
            .unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.errors[0].message.contains("type"));
    }

    #[test]
    fn unregistered_type_passes_with_entry_shape_only() {
        let entry = json!({"type": "com.example.custom", "whatever": {"nested": true}});
        assert!(!TYPE_SCHEMAS.has_type("com.example.custom"));
        assert!(TYPE_SCHEMAS.validate_entry(&entry).is_ok());
    }

    #[test]
    fn location_accepts_valid_point() {
        let entry = json!({
            "type": EVENT_LOCATION,
            "geoJson": {"type": "Point", "coordinates": [13.37, 52.52]},
            "city": "Berlin"
        });
        assert!(TYPE_SCHEMAS.validate_entry(&entry).is_ok());
    }

    #[test]
    fn location_rejects_out_of_range_latitude() {
        let entry = json!({
            "type": ASSET_LOCATION,
            "geoJson": {"type": "Point", "coordinates": [0.0, 91.0]}
        });
        let err = TYPE_SCHEMAS.validate_entry(&entry).unwrap_err();
        assert!(err.errors[0].data_path.contains("/geoJson/coordinates/1"));
    }

    #[test]
    fn identifiers_require_non_empty_mapping() {
        let missing = json!({"type": EVENT_IDENTIFIERS});
        assert!(TYPE_SCHEMAS.validate_entry(&missing).is_err());

        let valid = json!({
            "type": EVENT_IDENTIFIERS,
            "identifiers": {"isbn": ["978-83-942018-1-3"]}
        });
        assert!(TYPE_SCHEMAS.validate_entry(&valid).is_ok());

        let wrong_shape = json!({
            "type": EVENT_IDENTIFIERS,
            "identifiers": {"isbn": "not-an-array"}
        });
        let err = TYPE_SCHEMAS.validate_entry(&wrong_shape).unwrap_err();
        assert!(err.errors[0].data_path.contains("/identifiers/isbn"));
    }
}
