// Document envelope and merge-write semantics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A loaded document with implicit fields and its data payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub data: T,
}

/// Shallow-merge `patch` into `base`: every top-level field in the patch
/// overwrites the corresponding field in the base, all other fields are
/// left untouched. Non-object bases are replaced wholesale.
pub fn merge_fields(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                base_map.insert(key.clone(), value.clone());
            }
        }
        _ => {
            *base = patch.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_only_patched_fields() {
        let mut base = json!({ "name": "Acme Diner", "ratingCount": 2, "ratingSum": 7.0 });
        let patch = json!({ "ratingCount": 3, "ratingSum": 11.0, "ratingAvg": 11.0 / 3.0 });

        merge_fields(&mut base, &patch);

        assert_eq!(base["name"], "Acme Diner");
        assert_eq!(base["ratingCount"], 3);
        assert_eq!(base["ratingSum"], 11.0);
    }

    #[test]
    fn test_merge_into_non_object_replaces() {
        let mut base = json!(null);
        let patch = json!({ "ratingCount": 1 });

        merge_fields(&mut base, &patch);

        assert_eq!(base, json!({ "ratingCount": 1 }));
    }
}
