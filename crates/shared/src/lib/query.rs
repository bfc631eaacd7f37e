use crate::util::is_hex_address;
use crate::validation::ValidationError;
use serde_json::{Map, Value};

pub const DEFAULT_PAGE: u64 = 0;
pub const DEFAULT_PER_PAGE: u64 = 100;
pub const MAX_PER_PAGE: u64 = 1000;

/// The reserved key under `data` carrying the geospatial predicate.
pub const GEO_JSON_KEY: &str = "geoJson";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindAssetsParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub created_by: Option<String>,
    pub from_timestamp: Option<u64>,
    pub to_timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindEventsParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub asset_id: Option<String>,
    pub created_by: Option<String>,
    pub from_timestamp: Option<u64>,
    pub to_timestamp: Option<u64>,
    /// Scalar predicates over `content.data` entries, in deterministic key
    /// order. Dotted keys address nested entry fields verbatim.
    pub data: Vec<(String, Value)>,
    pub geo: Option<GeoPredicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoPredicate {
    pub longitude: f64,
    pub latitude: f64,
    pub max_distance_meters: f64,
}

fn expect_object<'a>(params: &'a Value) -> Result<&'a Map<String, Value>, ValidationError> {
    params
        .as_object()
        .ok_or_else(|| ValidationError::Shape("query parameters must be an object".to_owned()))
}

/// Accepts JSON numbers or numeric strings; everything else (including
/// negative and fractional numbers) is rejected by name.
fn cast_non_negative_int(field: &str, value: &Value) -> Result<u64, ValidationError> {
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| {
            ValidationError::Shape(format!("{field} must be a non-negative integer"))
        }),
        Value::String(s) => s.parse::<u64>().map_err(|_| {
            ValidationError::Shape(format!("{field} must be a non-negative integer"))
        }),
        _ => Err(ValidationError::Shape(format!(
            "{field} must be a non-negative integer"
        ))),
    }
}

fn cast_number(field: &str, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .ok_or_else(|| ValidationError::Shape(format!("{field} must be a number")))
}

fn cast_address(field: &str, value: &Value) -> Result<String, ValidationError> {
    let as_str = value
        .as_str()
        .ok_or_else(|| ValidationError::Shape(format!("{field} must be an address string")))?;
    if !is_hex_address(as_str) {
        return Err(ValidationError::Shape(format!(
            "{field} must be a 20-byte hex address"
        )));
    }
    Ok(as_str.to_owned())
}

fn cast_string(field: &str, value: &Value) -> Result<String, ValidationError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ValidationError::Shape(format!("{field} must be a string")))
}

fn cast_per_page(value: &Value) -> Result<u64, ValidationError> {
    let per_page = cast_non_negative_int("perPage", value)?;
    if !(1..=MAX_PER_PAGE).contains(&per_page) {
        return Err(ValidationError::Shape(format!(
            "perPage must be between 1 and {MAX_PER_PAGE}"
        )));
    }
    Ok(per_page)
}

pub fn validate_and_cast_find_assets_params(
    params: &Value,
) -> Result<FindAssetsParams, ValidationError> {
    let object = expect_object(params)?;
    let mut result = FindAssetsParams::default();

    for (key, value) in object {
        match key.as_str() {
            "page" => result.page = Some(cast_non_negative_int("page", value)?),
            "perPage" => result.per_page = Some(cast_per_page(value)?),
            "createdBy" => result.created_by = Some(cast_address("createdBy", value)?),
            "fromTimestamp" => {
                result.from_timestamp = Some(cast_non_negative_int("fromTimestamp", value)?)
            }
            "toTimestamp" => {
                result.to_timestamp = Some(cast_non_negative_int("toTimestamp", value)?)
            }
            unknown => {
                return Err(ValidationError::Shape(format!(
                    "unknown query parameter: {unknown}"
                )))
            }
        }
    }
    Ok(result)
}

pub fn validate_and_cast_find_events_params(
    params: &Value,
) -> Result<FindEventsParams, ValidationError> {
    let object = expect_object(params)?;
    let mut result = FindEventsParams::default();

    for (key, value) in object {
        match key.as_str() {
            "page" => result.page = Some(cast_non_negative_int("page", value)?),
            "perPage" => result.per_page = Some(cast_per_page(value)?),
            "assetId" => result.asset_id = Some(cast_string("assetId", value)?),
            "createdBy" => result.created_by = Some(cast_address("createdBy", value)?),
            "fromTimestamp" => {
                result.from_timestamp = Some(cast_non_negative_int("fromTimestamp", value)?)
            }
            "toTimestamp" => {
                result.to_timestamp = Some(cast_non_negative_int("toTimestamp", value)?)
            }
            "data" => cast_data_params(value, &mut result)?,
            unknown => {
                return Err(ValidationError::Shape(format!(
                    "unknown query parameter: {unknown}"
                )))
            }
        }
    }
    Ok(result)
}

fn cast_data_params(data: &Value, result: &mut FindEventsParams) -> Result<(), ValidationError> {
    let object = data
        .as_object()
        .ok_or_else(|| ValidationError::Shape("data must be an object".to_owned()))?;

    for (key, value) in object {
        if key == GEO_JSON_KEY {
            result.geo = Some(cast_geo_predicate(value)?);
            continue;
        }
        // The geo predicate is only accepted under the reserved key itself.
        if key.split('.').any(|segment| segment == GEO_JSON_KEY) {
            return Err(ValidationError::Shape(format!(
                "geoJson is only accepted as data.{GEO_JSON_KEY}"
            )));
        }
        match value {
            Value::String(_) | Value::Number(_) => {
                result.data.push((key.clone(), value.clone()));
            }
            _ => {
                return Err(ValidationError::Shape(format!(
                    "data.{key} must be a string or a number"
                )))
            }
        }
    }
    Ok(())
}

fn cast_geo_predicate(value: &Value) -> Result<GeoPredicate, ValidationError> {
    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::Shape("data.geoJson must be an object".to_owned()))?;

    let mut longitude = None;
    let mut latitude = None;
    let mut max_distance = None;
    for (key, field) in object {
        match key.as_str() {
            "locationLongitude" => longitude = Some(cast_number("locationLongitude", field)?),
            "locationLatitude" => latitude = Some(cast_number("locationLatitude", field)?),
            "locationMaxDistance" => {
                max_distance = Some(cast_number("locationMaxDistance", field)?)
            }
            unknown => {
                return Err(ValidationError::Shape(format!(
                    "unknown geoJson field: {unknown}"
                )))
            }
        }
    }

    match (longitude, latitude, max_distance) {
        (Some(longitude), Some(latitude), Some(max_distance_meters)) => Ok(GeoPredicate {
            longitude,
            latitude,
            max_distance_meters,
        }),
        _ => Err(ValidationError::Shape(
            "geoJson requires locationLongitude, locationLatitude and locationMaxDistance"
                .to_owned(),
        )),
    }
}
