//! Reverse merge-patch history (RFC 7386 documents).
//!
//! Each history entry stores the patch that turns an item's current entry back into
//! the entry it replaced. Newest entries come first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub patch: Value,
}

/// Produces the merge patch that, applied to `current`, yields `previous`.
#[must_use]
pub fn reverse_patch(current: &Value, previous: &Value) -> Value {
    match (current, previous) {
        (Value::Object(from), Value::Object(to)) => {
            let mut patch = Map::new();
            for (key, old) in from {
                match to.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), reverse_patch(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in to {
                if !from.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        _ => previous.clone(),
    }
}

/// Applies a merge patch to `target` in place.
pub fn apply_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(doc) = target {
        for (key, value) in fields {
            if value.is_null() {
                doc.remove(key);
            } else {
                apply_patch(doc.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Puts `entry` at the front of `history` and drops whatever falls past [`MAX_HISTORY`].
pub fn record(history: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    history.insert(0, entry);
    truncate(history);
}

pub fn truncate(history: &mut Vec<HistoryEntry>) {
    history.truncate(MAX_HISTORY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reverse_patch_restores_changed_field() {
        let previous = json!({"kind": "login", "username": "foo", "password": "bar", "notes": ""});
        let current = json!({"kind": "login", "username": "foo", "password": "baz", "notes": ""});

        let patch = reverse_patch(&current, &previous);
        assert_eq!(patch, json!({"password": "bar"}));

        let mut restored = current.clone();
        apply_patch(&mut restored, &patch);
        assert_eq!(restored, previous);
    }

    #[test]
    fn test_reverse_patch_handles_added_and_removed_keys() {
        let previous = json!({"a": 1, "nested": {"x": true}});
        let current = json!({"b": 2, "nested": {"x": false, "y": "new"}});

        let patch = reverse_patch(&current, &previous);
        assert_eq!(patch, json!({"a": 1, "b": null, "nested": {"x": true, "y": null}}));

        let mut restored = current;
        apply_patch(&mut restored, &patch);
        assert_eq!(restored, previous);
    }

    #[test]
    fn test_identical_documents_produce_empty_patch() {
        let doc = json!({"username": "same"});
        assert_eq!(reverse_patch(&doc, &doc), json!({}));
    }

    #[test]
    fn test_record_keeps_newest_first_and_caps_length() {
        let base = OffsetDateTime::UNIX_EPOCH;
        let mut history = Vec::new();
        for n in 0..(MAX_HISTORY + 5) {
            record(
                &mut history,
                HistoryEntry {
                    created: base + time::Duration::seconds(n as i64),
                    patch: json!({ "n": n }),
                },
            );
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].patch, json!({ "n": MAX_HISTORY + 4 }));
        assert_eq!(history[MAX_HISTORY - 1].patch, json!({ "n": 5 }));
    }
}
