use crate::store::StoreError;
use serde_json::{Map, Value};
use std::cmp::Ordering;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Resolves a dotted path against a document, traversing arrays the way a
/// document store does: a segment applied to an array applies to each
/// element. Returns every value the path reaches.
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.get(segment) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

pub fn matches(doc: &Value, filter: &Value) -> Result<bool, StoreError> {
    let conditions = filter
        .as_object()
        .ok_or_else(|| StoreError::MalformedFilter("filter must be an object".to_owned()))?;

    for (key, condition) in conditions {
        let matched = match key.as_str() {
            "$and" => {
                let clauses = condition.as_array().ok_or_else(|| {
                    StoreError::MalformedFilter("$and expects an array".to_owned())
                })?;
                let mut all = true;
                for clause in clauses {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            path => matches_condition(doc, path, condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_object(condition: &Value) -> bool {
    condition
        .as_object()
        .is_some_and(|map| map.keys().any(|k| k.starts_with('$')))
}

fn matches_condition(doc: &Value, path: &str, condition: &Value) -> Result<bool, StoreError> {
    let resolved = resolve_path(doc, path);

    if !is_operator_object(condition) {
        return Ok(equality_matches(&resolved, condition));
    }

    let operators = condition.as_object().expect("checked above");
    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$lte" => resolved
                .iter()
                .any(|v| compare_values(v, operand) != Ordering::Greater),
            "$gte" => resolved
                .iter()
                .any(|v| compare_values(v, operand) != Ordering::Less),
            "$elemMatch" => elem_matches(&resolved, operand)?,
            "$near" => near_matches(&resolved, operand)?,
            unknown => {
                return Err(StoreError::MalformedFilter(format!(
                    "unsupported operator {unknown}"
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `null` equality matches missing fields as well as explicit nulls.
fn equality_matches(resolved: &[&Value], expected: &Value) -> bool {
    if expected.is_null() {
        return resolved.is_empty() || resolved.iter().any(|v| v.is_null());
    }
    resolved.iter().any(|value| {
        *value == expected
            || value
                .as_array()
                .is_some_and(|items| items.iter().any(|item| item == expected))
    })
}

fn elem_matches(resolved: &[&Value], operand: &Value) -> Result<bool, StoreError> {
    let conditions = operand
        .as_object()
        .ok_or_else(|| StoreError::MalformedFilter("$elemMatch expects an object".to_owned()))?;

    for value in resolved {
        let Some(items) = value.as_array() else {
            continue;
        };
        'items: for item in items {
            for (field, expected) in conditions {
                let inner = resolve_path(item, field);
                if !equality_matches(&inner, expected) {
                    continue 'items;
                }
            }
            return Ok(true);
        }
    }
    Ok(false)
}

fn near_matches(resolved: &[&Value], operand: &Value) -> Result<bool, StoreError> {
    let spec = parse_near(operand)?;
    Ok(min_distance_to(resolved, spec.longitude, spec.latitude)
        .is_some_and(|distance| distance <= spec.max_distance_meters))
}

#[derive(Debug, Clone, Copy)]
pub struct NearSpec {
    pub longitude: f64,
    pub latitude: f64,
    pub max_distance_meters: f64,
}

fn parse_near(operand: &Value) -> Result<NearSpec, StoreError> {
    let malformed = || {
        StoreError::MalformedFilter(
            "$near expects {$geometry: Point, $maxDistance: meters}".to_owned(),
        )
    };
    let geometry = operand.get("$geometry").ok_or_else(malformed)?;
    if geometry.get("type").and_then(Value::as_str) != Some("Point") {
        return Err(malformed());
    }
    let coordinates = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .ok_or_else(malformed)?;
    let (longitude, latitude) = match coordinates.as_slice() {
        [lon, lat] => (
            lon.as_f64().ok_or_else(malformed)?,
            lat.as_f64().ok_or_else(malformed)?,
        ),
        _ => return Err(malformed()),
    };
    let max_distance_meters = operand
        .get("$maxDistance")
        .and_then(Value::as_f64)
        .ok_or_else(malformed)?;
    Ok(NearSpec {
        longitude,
        latitude,
        max_distance_meters,
    })
}

fn point_coordinates(value: &Value) -> Option<(f64, f64)> {
    if value.get("type").and_then(Value::as_str) != Some("Point") {
        return None;
    }
    let coordinates = value.get("coordinates")?.as_array()?;
    match coordinates.as_slice() {
        [lon, lat] => Some((lon.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

fn min_distance_to(resolved: &[&Value], longitude: f64, latitude: f64) -> Option<f64> {
    resolved
        .iter()
        .filter_map(|value| point_coordinates(value))
        .map(|(lon, lat)| haversine_meters(longitude, latitude, lon, lat))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
}

fn haversine_meters(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Finds the single `$near` conjunct of a filter, if any. The store orders
/// such results nearest-first.
pub fn extract_near(filter: &Value) -> Option<(String, NearSpec)> {
    let conditions = filter.as_object()?;
    for (key, condition) in conditions {
        if key == "$and" {
            if let Some(clauses) = condition.as_array() {
                for clause in clauses {
                    if let Some(found) = extract_near(clause) {
                        return Some(found);
                    }
                }
            }
            continue;
        }
        if let Some(operand) = condition.get("$near") {
            if let Ok(spec) = parse_near(operand) {
                return Some((key.clone(), spec));
            }
        }
    }
    None
}

pub fn distance_for_sorting(doc: &Value, path: &str, spec: &NearSpec) -> f64 {
    let resolved = resolve_path(doc, path);
    min_distance_to(&resolved, spec.longitude, spec.latitude).unwrap_or(f64::MAX)
}

/// Total order over JSON scalars for sorting: null < booleans < numbers <
/// strings < everything else.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    fn type_rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

pub fn apply_update(doc: &mut Value, update: &Value) -> Result<bool, StoreError> {
    let operations = update
        .as_object()
        .ok_or_else(|| StoreError::MalformedUpdate("update must be an object".to_owned()))?;

    let mut changed = false;
    for (op, operand) in operations {
        let fields = operand.as_object().ok_or_else(|| {
            StoreError::MalformedUpdate(format!("{op} expects an object of paths"))
        })?;
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    changed |= set_path(doc, path, value.clone());
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    changed |= unset_path(doc, path);
                }
            }
            unknown => {
                return Err(StoreError::MalformedUpdate(format!(
                    "unsupported update operator {unknown}"
                )))
            }
        }
    }
    Ok(changed)
}

fn set_path(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            return false;
        }
        let map = current.as_object_mut().expect("checked above");
        current = map
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let Some(map) = current.as_object_mut() else {
        return false;
    };
    let last = segments[segments.len() - 1];
    let previous = map.insert(last.to_owned(), value.clone());
    previous.as_ref() != Some(&value)
}

fn unset_path(doc: &mut Value, path: &str) -> bool {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(*segment) {
            Some(child) => current = child,
            None => return false,
        }
    }
    match current.as_object_mut() {
        Some(map) => map.remove(segments[segments.len() - 1]).is_some(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "content": {
                "idData": {"accessLevel": 3, "timestamp": 42, "createdBy": "0xabc"},
                "data": [
                    {"type": "observation", "acceleration": {"valueX": 5}},
                    {"type": "position", "geoJson": {"type": "Point", "coordinates": [13.4, 52.5]}}
                ]
            },
            "metadata": {}
        })
    }

    #[test]
    fn equality_over_dotted_path() {
        assert!(matches(&doc(), &json!({"content.idData.createdBy": "0xabc"})).unwrap());
        assert!(!matches(&doc(), &json!({"content.idData.createdBy": "0xdef"})).unwrap());
    }

    #[test]
    fn equality_traverses_arrays() {
        assert!(matches(&doc(), &json!({"content.data.type": "position"})).unwrap());
        assert!(matches(&doc(), &json!({"content.data.acceleration.valueX": 5})).unwrap());
    }

    #[test]
    fn null_matches_missing_and_explicit_null() {
        assert!(matches(&doc(), &json!({"metadata.bundleId": null})).unwrap());
        let with_null = json!({"metadata": {"bundleId": null}});
        assert!(matches(&with_null, &json!({"metadata.bundleId": null})).unwrap());
        let with_value = json!({"metadata": {"bundleId": "xyz"}});
        assert!(!matches(&with_value, &json!({"metadata.bundleId": null})).unwrap());
    }

    #[test]
    fn range_operators() {
        assert!(matches(&doc(), &json!({"content.idData.timestamp": {"$gte": 42}})).unwrap());
        assert!(matches(&doc(), &json!({"content.idData.timestamp": {"$lte": 42}})).unwrap());
        assert!(!matches(&doc(), &json!({"content.idData.timestamp": {"$gte": 43}})).unwrap());
        assert!(!matches(&doc(), &json!({"content.idData.timestamp": {"$lte": 41}})).unwrap());
    }

    #[test]
    fn and_composes() {
        let filter = json!({"$and": [
            {"content.idData.accessLevel": {"$lte": 5}},
            {"content.idData.createdBy": "0xabc"}
        ]});
        assert!(matches(&doc(), &filter).unwrap());

        let failing = json!({"$and": [
            {"content.idData.accessLevel": {"$lte": 2}},
            {"content.idData.createdBy": "0xabc"}
        ]});
        assert!(!matches(&doc(), &failing).unwrap());
    }

    #[test]
    fn elem_match_with_nested_fields() {
        let filter = json!({"content.data": {"$elemMatch": {"acceleration.valueX": 5}}});
        assert!(matches(&doc(), &filter).unwrap());

        let failing = json!({"content.data": {"$elemMatch": {"acceleration.valueX": 6}}});
        assert!(!matches(&doc(), &failing).unwrap());
    }

    #[test]
    fn near_within_and_beyond_distance() {
        let near = |max: f64| {
            json!({"content.data.geoJson": {"$near": {
                "$geometry": {"type": "Point", "coordinates": [13.4, 52.5]},
                "$maxDistance": max
            }}})
        };
        assert!(matches(&doc(), &near(1.0)).unwrap());

        let far = json!({"content.data.geoJson": {"$near": {
            "$geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
            "$maxDistance": 1000.0
        }}});
        assert!(!matches(&doc(), &far).unwrap());
    }

    #[test]
    fn haversine_scale_sanity() {
        // One degree of latitude is roughly 111km.
        let distance = haversine_meters(0.0, 0.0, 0.0, 1.0);
        assert!((distance - 111_195.0).abs() < 100.0);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = matches(&doc(), &json!({"field": {"$regex": "x"}})).unwrap_err();
        assert!(matches!(err, StoreError::MalformedFilter(_)));
    }

    #[test]
    fn set_and_unset_roundtrip() {
        let mut subject = json!({"metadata": {}});
        assert!(apply_update(&mut subject, &json!({"$set": {"metadata.bundleId": "b1"}})).unwrap());
        assert_eq!(subject["metadata"]["bundleId"], "b1");

        // Setting the same value again reports no change.
        assert!(!apply_update(&mut subject, &json!({"$set": {"metadata.bundleId": "b1"}})).unwrap());

        assert!(apply_update(&mut subject, &json!({"$unset": {"metadata.bundleId": ""}})).unwrap());
        assert!(subject["metadata"].get("bundleId").is_none());
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut subject = json!({"content": {}});
        apply_update(&mut subject, &json!({"$set": {"metadata.bundleId": "b1"}})).unwrap();
        assert_eq!(subject["metadata"]["bundleId"], "b1");
    }
}
