//! Deterministic cache keys for content requests.
use serde::Serialize;
use serde_json::Value;

use crate::models::Params;

/// Everything that distinguishes one logical content request from another.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheKeyParts<'a> {
    pub api_key: &'a str,
    pub params: &'a Params,
    pub sem_ver: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub content_ids: &'a [String],
    pub serialized: bool,
    pub full_response: bool,
}

#[derive(Serialize)]
struct CanonicalParts<'a> {
    api_key: &'a str,
    params: Value,
    sem_ver: Option<&'a str>,
    user_id: Option<&'a str>,
    content_ids: Vec<&'a str>,
    serialized: bool,
    full_response: bool,
}

impl CacheKeyParts<'_> {
    /// Hex digest of the canonical JSON encoding of the parts.
    ///
    /// Object keys are sorted at every nesting level and content ids are sorted and deduplicated,
    /// so insertion order never changes the key.
    pub fn derive(&self) -> String {
        let mut content_ids: Vec<&str> = self.content_ids.iter().map(String::as_str).collect();
        content_ids.sort_unstable();
        content_ids.dedup();

        let canonical = CanonicalParts {
            api_key: self.api_key,
            params: canonicalize(&Value::Object(self.params.clone())),
            sem_ver: self.sem_ver,
            user_id: self.user_id,
            content_ids,
            serialized: self.serialized,
            full_response: self.full_response,
        };

        // Serializing plain strings, bools and JSON values cannot fail.
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        format!("{:x}", md5::compute(encoded))
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(left, _), (right, _)| left.cmp(right));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
