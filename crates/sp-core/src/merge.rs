//! Deep-merge engine for session state.
//!
//! Session state is an unconstrained nested JSON mapping. Updates arrive as
//! partial mappings and are combined with the current state by [`deep_merge`]:
//!
//! - Mapping-into-mapping recurses per key.
//! - An explicit `null` deletes the key at the matching path (no-op when the
//!   key is absent).
//! - Any other value replaces whatever was there, including replacing a
//!   mapping with a non-mapping.
//! - Keys not mentioned by the update are preserved at every level.
//! - Arrays replace wholesale; they are never concatenated or merged by index.
//!
//! The agent side uses [`minimal_delta`] to compute the smallest update that
//! turns the last transmitted state into the proposed one, so unchanged
//! subtrees never travel over the wire.

use serde_json::{Map, Value};

/// Merge `update` into `target` in place, following the rules above.
pub fn deep_merge(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        match value {
            Value::Null => {
                target.remove(&key);
            }
            Value::Object(patch) => {
                let slot = target
                    .entry(key)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(existing) = slot {
                    deep_merge(existing, patch);
                }
            }
            other => {
                target.insert(key, other);
            }
        }
    }
}

/// Return a merged copy without mutating either input.
pub fn deep_merged(base: &Map<String, Value>, update: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    deep_merge(&mut merged, update.clone());
    merged
}

/// Compute the minimal update that transforms `prev` into `proposed`.
///
/// A key appears in the delta iff its value differs from `prev` at the same
/// path. Keys present in `prev` but absent from `proposed` are NOT emitted as
/// deletions; deletion is always an explicit null supplied by the caller.
pub fn minimal_delta(
    prev: &Map<String, Value>,
    proposed: &Map<String, Value>,
) -> Map<String, Value> {
    let mut delta = Map::new();
    for (key, value) in proposed {
        match (prev.get(key), value) {
            (Some(Value::Object(old)), Value::Object(new)) => {
                let nested = minimal_delta(old, new);
                if !nested.is_empty() {
                    delta.insert(key.clone(), Value::Object(nested));
                }
            }
            (Some(old), new) if old == new => {}
            (_, new) => {
                delta.insert(key.clone(), new.clone());
            }
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_empty_update_is_identity() {
        let mut state = obj(json!({"a": 1, "b": {"c": true}}));
        let before = state.clone();
        deep_merge(&mut state, Map::new());
        assert_eq!(state, before);
    }

    #[test]
    fn test_merge_preserves_unmentioned_keys() {
        let mut state = obj(json!({"window_state": {"open": ["w1", "w2"], "active": "w1"}}));
        deep_merge(
            &mut state,
            obj(json!({"window_state": {"open": ["w1", "w2", "w3"]}})),
        );
        assert_eq!(state["window_state"]["active"], json!("w1"));
        assert_eq!(state["window_state"]["open"], json!(["w1", "w2", "w3"]));
    }

    #[test]
    fn test_merge_null_deletes_key() {
        let mut state = obj(json!({"window_state": {"open": ["w1"], "active": "w1"}}));
        deep_merge(&mut state, obj(json!({"window_state": {"active": null}})));
        let window = state["window_state"].as_object().unwrap();
        assert!(!window.contains_key("active"));
        assert_eq!(window["open"], json!(["w1"]));
    }

    #[test]
    fn test_merge_null_on_absent_key_is_noop() {
        let mut state = obj(json!({"a": 1}));
        deep_merge(&mut state, obj(json!({"missing": null})));
        assert_eq!(Value::Object(state), json!({"a": 1}));
    }

    #[test]
    fn test_merge_replaces_mapping_with_scalar() {
        let mut state = obj(json!({"a": {"nested": true}}));
        deep_merge(&mut state, obj(json!({"a": 7})));
        assert_eq!(state["a"], json!(7));
    }

    #[test]
    fn test_merge_replaces_scalar_with_mapping() {
        let mut state = obj(json!({"a": 7}));
        deep_merge(&mut state, obj(json!({"a": {"nested": true}})));
        assert_eq!(state["a"], json!({"nested": true}));
    }

    #[test]
    fn test_merge_arrays_replace_not_concatenate() {
        let mut state = obj(json!({"items": [1, 2, 3]}));
        deep_merge(&mut state, obj(json!({"items": [9]})));
        assert_eq!(state["items"], json!([9]));
    }

    #[test]
    fn test_merge_is_left_fold() {
        // Applying updates one at a time equals applying them in sequence to
        // the accumulated state.
        let updates = [
            obj(json!({"a": {"x": 1}})),
            obj(json!({"a": {"y": 2}, "b": true})),
            obj(json!({"a": {"x": null}})),
        ];
        let mut folded = Map::new();
        for update in &updates {
            deep_merge(&mut folded, update.clone());
        }
        assert_eq!(
            Value::Object(folded),
            json!({"a": {"y": 2}, "b": true})
        );
    }

    #[test]
    fn test_merge_fresh_object_drops_null_sentinels() {
        // A sentinel inside a newly introduced subtree deletes nothing but
        // must not linger in the stored state either.
        let mut state = Map::new();
        deep_merge(&mut state, obj(json!({"a": {"gone": null, "kept": 1}})));
        assert_eq!(Value::Object(state), json!({"a": {"kept": 1}}));
    }

    #[test]
    fn test_delta_identical_states_is_empty() {
        let state = obj(json!({"a": 1, "b": {"c": [1, 2]}}));
        assert!(minimal_delta(&state, &state).is_empty());
    }

    #[test]
    fn test_delta_only_changed_keys() {
        let prev = obj(json!({"a": 1, "b": {"c": 1, "d": 2}}));
        let proposed = obj(json!({"a": 1, "b": {"c": 5, "d": 2}}));
        let delta = minimal_delta(&prev, &proposed);
        assert_eq!(Value::Object(delta), json!({"b": {"c": 5}}));
    }

    #[test]
    fn test_delta_new_keys_included_whole() {
        let prev = obj(json!({"a": 1}));
        let proposed = obj(json!({"a": 1, "fresh": {"deep": true}}));
        let delta = minimal_delta(&prev, &proposed);
        assert_eq!(Value::Object(delta), json!({"fresh": {"deep": true}}));
    }

    #[test]
    fn test_delta_does_not_emit_deletions() {
        let prev = obj(json!({"a": 1, "stale": 2}));
        let proposed = obj(json!({"a": 1}));
        assert!(minimal_delta(&prev, &proposed).is_empty());
    }

    #[test]
    fn test_delta_type_change_replaces_whole_value() {
        let prev = obj(json!({"a": {"x": 1}}));
        let proposed = obj(json!({"a": [1, 2]}));
        let delta = minimal_delta(&prev, &proposed);
        assert_eq!(Value::Object(delta), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_delta_applied_to_prev_yields_proposed() {
        let prev = obj(json!({"a": 1, "b": {"c": 1, "d": [1]}}));
        let proposed = obj(json!({"a": 2, "b": {"c": 1, "d": [1, 2]}, "e": "new"}));
        let delta = minimal_delta(&prev, &proposed);
        let rebuilt = deep_merged(&prev, &delta);
        assert_eq!(rebuilt, proposed);
    }
}
