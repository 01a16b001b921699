use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Map, Value};

/// Attach the observed resourceVersion to a merge patch body
///
/// The API server rejects the patch with 409 if the object changed since it was read.
/// Objects that were never persisted (no resourceVersion) are patched unconditionally.
pub fn with_resource_version(meta: &ObjectMeta, mut body: Value) -> Value {
    if let (Some(rv), Some(obj)) = (meta.resource_version.as_ref(), body.as_object_mut()) {
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), Value::String(rv.clone()));
        }
    }
    body
}

/// JSON merge patch (RFC 7386) turning `old` into `new`
///
/// Objects are diffed key by key, keys missing from `new` become `null`, everything
/// else (arrays included) is replaced wholesale. Returns `None` when nothing differs.
pub fn merge_diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut diff = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) => {
                        if let Some(d) = merge_diff(old_value, new_value) {
                            diff.insert(key.clone(), d);
                        }
                    }
                    None => {
                        diff.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    diff.insert(key.clone(), Value::Null);
                }
            }
            if diff.is_empty() {
                None
            } else {
                Some(Value::Object(diff))
            }
        }
        (old, new) if old == new => None,
        (_, new) => Some(new.clone()),
    }
}

/// Apply a merge patch in place, the way the API server does
#[cfg(test)]
pub(crate) fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
