//! Shared helpers

pub mod retry;

use serde_json::Value;

/// Apply an RFC 7386 JSON merge patch to a target value
///
/// Objects merge recursively, `null` removes a key, everything else replaces.
/// This mirrors what the API server does with a merge patch, so callers can
/// predict the post-patch object without a round trip.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                } else {
                    match target_map.get_mut(key) {
                        Some(existing) if existing.is_object() && patch_value.is_object() => {
                            apply_merge_patch(existing, patch_value);
                        }
                        _ => {
                            target_map.insert(key.clone(), patch_value.clone());
                        }
                    }
                }
            }
        }
        (target, patch) => {
            *target = patch.clone();
        }
    }
}
