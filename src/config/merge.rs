//! Value-tree merging for layered configuration sources.
//!
//! Sources are folded in order; each later source is overlaid on the result so
//! far. Mappings merge key by key, everything else is replaced whole.

use serde_json::{Map, Value};

/// Overlay `overlay` onto `base`, returning the merged tree.
///
/// - Mappings merge recursively: keys from `overlay` win over keys in `base`
/// - Sequences and scalars from `overlay` replace the base value entirely
/// - A `null` in `overlay` leaves the base value untouched
///
/// # Example
/// ```
/// use serde_json::json;
/// use mesh_app::config::deep_merge;
///
/// let env = json!({ "server": { "port": 80, "host": "0.0.0.0" } });
/// let file = json!({ "server": { "port": 8080 } });
/// let merged = deep_merge(env, file);
/// assert_eq!(merged, json!({ "server": { "port": 8080, "host": "0.0.0.0" } }));
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold `deep_merge` over `values`; the last value has the highest precedence.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

/// Insert `value` into `root` under the nested key `segments`.
///
/// Intermediate mappings are created on demand. An intermediate that already
/// holds a scalar is replaced by a mapping, so `a=1` followed by `a.b=2`
/// yields `{"a": {"b": 2}}`.
pub(crate) fn insert_path(root: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let slot = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Some(next) = slot.as_object_mut() else {
            return;
        };
        current = next;
    }
    current.insert((*last).to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_later_source_wins_on_overlap() {
        let env = json!({"db": {"host": "env-host", "pool": 4}});
        let file = json!({"db": {"host": "file-host"}});
        assert_eq!(
            deep_merge(env, file),
            json!({"db": {"host": "file-host", "pool": 4}})
        );
    }

    #[test]
    fn test_sequences_are_replaced() {
        let base = json!({"peers": ["a", "b", "c"]});
        let overlay = json!({"peers": ["d"]});
        assert_eq!(deep_merge(base, overlay), json!({"peers": ["d"]}));
    }

    #[test]
    fn test_null_does_not_erase() {
        let base = json!({"a": 1, "b": {"c": 2}});
        let overlay = json!({"a": null, "b": {"c": null}});
        assert_eq!(deep_merge(base, overlay), json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn test_merge_all_orders_by_position() {
        let merged = deep_merge_all(vec![
            json!({"level": "debug", "a": 1}),
            json!({"level": "info"}),
            json!({"level": "warn", "b": 2}),
        ]);
        assert_eq!(merged, json!({"level": "warn", "a": 1, "b": 2}));
    }

    #[test]
    fn test_merge_all_of_nothing_is_null() {
        assert_eq!(deep_merge_all(Vec::new()), Value::Null);
    }

    #[test]
    fn test_scalar_and_mapping_swap() {
        assert_eq!(
            deep_merge(json!({"v": 42}), json!({"v": {"nested": true}})),
            json!({"v": {"nested": true}})
        );
        assert_eq!(
            deep_merge(json!({"v": {"nested": true}}), json!({"v": 42})),
            json!({"v": 42})
        );
    }

    #[test]
    fn test_insert_path_builds_nesting() {
        let mut root = Map::new();
        insert_path(&mut root, &["server", "http", "port"], json!(8080));
        insert_path(&mut root, &["server", "name"], json!("edge"));
        assert_eq!(
            Value::Object(root),
            json!({"server": {"http": {"port": 8080}, "name": "edge"}})
        );
    }

    #[test]
    fn test_insert_path_replaces_scalar_parent() {
        let mut root = Map::new();
        insert_path(&mut root, &["a"], json!(1));
        insert_path(&mut root, &["a", "b"], json!(2));
        assert_eq!(Value::Object(root), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_insert_path_ignores_empty_key() {
        let mut root = Map::new();
        insert_path(&mut root, &[], json!(1));
        assert!(root.is_empty());
    }
}
