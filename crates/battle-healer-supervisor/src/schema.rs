//! Applies field-map/defaults hints to response payloads, recursively and
//! idempotently.

use battle_healer_common::types::SchemaHints;
use serde_json::Value;

/// Recursively applies `hints` to `payload`. Lists are mapped element-wise;
/// non-object, non-array values pass through unchanged.
pub fn apply(hints: &SchemaHints, payload: &Value) -> Value {
    match payload {
        Value::Array(items) => Value::Array(items.iter().map(|item| apply(hints, item)).collect()),
        Value::Object(_) => apply_to_object(hints, payload),
        other => other.clone(),
    }
}

fn apply_to_object(hints: &SchemaHints, payload: &Value) -> Value {
    let mut result = payload.clone();
    let Some(map) = result.as_object_mut() else {
        return result;
    };

    if let Some(field_map) = &hints.field_map {
        for (expected, actual) in field_map {
            if let Some(value) = map.get(actual).cloned() {
                map.insert(expected.clone(), value);
            }
        }
    }

    if let Some(defaults) = &hints.defaults {
        for (key, value) in defaults {
            let missing = !map.contains_key(key) || map.get(key) == Some(&Value::Null);
            if missing {
                map.insert(key.clone(), value.clone());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hints() -> SchemaHints {
        let mut field_map = HashMap::new();
        field_map.insert("amount".to_string(), "total_amount".to_string());
        let mut defaults = HashMap::new();
        defaults.insert("currency".to_string(), serde_json::json!("USD"));
        SchemaHints { field_map: Some(field_map), defaults: Some(defaults) }
    }

    #[test]
    fn maps_actual_field_onto_expected_without_deleting_source() {
        let payload = serde_json::json!({"total_amount": 42});
        let adapted = apply(&hints(), &payload);
        assert_eq!(adapted["amount"], serde_json::json!(42));
        assert_eq!(adapted["total_amount"], serde_json::json!(42));
    }

    #[test]
    fn fills_missing_defaults_only() {
        let payload = serde_json::json!({"total_amount": 42, "currency": "EUR"});
        let adapted = apply(&hints(), &payload);
        assert_eq!(adapted["currency"], serde_json::json!("EUR"));
    }

    #[test]
    fn fills_null_defaults() {
        let payload = serde_json::json!({"total_amount": 42, "currency": null});
        let adapted = apply(&hints(), &payload);
        assert_eq!(adapted["currency"], serde_json::json!("USD"));
    }

    #[test]
    fn maps_over_list_elements() {
        let payload = serde_json::json!([{"total_amount": 1}, {"total_amount": 2}]);
        let adapted = apply(&hints(), &payload);
        assert_eq!(adapted[0]["amount"], serde_json::json!(1));
        assert_eq!(adapted[1]["amount"], serde_json::json!(2));
    }

    #[test]
    fn non_object_payload_passes_through() {
        let payload = serde_json::json!("just a string");
        assert_eq!(apply(&hints(), &payload), payload);
    }

    #[test]
    fn apply_is_idempotent() {
        let payload = serde_json::json!({"total_amount": 42});
        let once = apply(&hints(), &payload);
        let twice = apply(&hints(), &once);
        assert_eq!(once, twice);
    }

    proptest::proptest! {
        #[test]
        fn apply_is_idempotent_for_arbitrary_amounts(amount in -1000i64..1000i64) {
            let payload = serde_json::json!({"total_amount": amount});
            let once = apply(&hints(), &payload);
            let twice = apply(&hints(), &once);
            prop_assert_eq!(once, twice);
        }
    }
}
