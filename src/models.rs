use std::{collections::HashMap, fmt};

use derive_more::From;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Error, Result};

/// Arbitrary key-value context forwarded to the service to select content variants.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Raw content entries of one combine call, keyed by content id. This is what gets cached.
pub type ContentBatch = HashMap<String, ContentResponse>;

/// A single content entry as returned by the combine endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentResponse {
    /// Either a JSON string (serialized mode) or an already structured value.
    pub data: serde_json::Value,
    /// Content hash computed by the service.
    pub hash: String,
    /// Metadata describing which variant was served.
    pub meta: Meta,
}

/// Metadata attached to a [`ContentResponse`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Meta {
    /// Id of the content.
    #[serde(default)]
    pub uid: u64,
    /// Modification counter.
    #[serde(rename = "mod", default)]
    pub modified: u64,
    /// Segments the request matched.
    #[serde(rename = "seg", default)]
    pub segments: Vec<serde_json::Value>,
    /// Variants served for the request.
    #[serde(rename = "var", default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<serde_json::Value>,
}

/// Inline failure for one content id in a combine response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentResponseError {
    /// Error details, keyed by field or error code.
    pub errors: serde_json::Map<String, serde_json::Value>,
    /// Short description.
    #[serde(default)]
    pub title: String,
    /// Status the service assigned to this entry.
    #[serde(default)]
    pub status: u16,
}

impl fmt::Display for ContentResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (status {}): {}",
            self.title,
            self.status,
            serde_json::Value::Object(self.errors.clone())
        )
    }
}

/// Per-call overrides for [`Client::get_contents`](crate::Client::get_contents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentOptions {
    /// Skip the cache read. The fetched result is still written to the cache.
    pub refresh: bool,
    /// Return `data` as the raw JSON string. Falls back to the client default when `None`.
    pub serialized: Option<bool>,
    /// Return the full `{data, hash, meta}` envelope instead of bare data.
    pub full_response: bool,
}

impl ContentOptions {
    /// Options that bypass the cache read.
    pub fn refresh() -> Self {
        ContentOptions {
            refresh: true,
            ..Default::default()
        }
    }

    /// Set [`ContentOptions::serialized`].
    pub fn with_serialized(mut self, serialized: bool) -> Self {
        self.serialized = Some(serialized);
        self
    }

    /// Set [`ContentOptions::full_response`].
    pub fn with_full_response(mut self, full_response: bool) -> Self {
        self.full_response = full_response;
        self
    }
}

/// Content data in the representation the caller asked for.
#[derive(Debug, Clone, PartialEq, From)]
pub enum ContentData {
    /// Raw JSON text exactly as served.
    Serialized(String),
    /// Parsed JSON value.
    Parsed(serde_json::Value),
}

impl ContentData {
    /// Raw JSON text, if in serialized mode.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContentData::Serialized(s) => Some(s),
            ContentData::Parsed(_) => None,
        }
    }

    /// Parsed value, if in parsed mode.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ContentData::Serialized(_) => None,
            ContentData::Parsed(v) => Some(v),
        }
    }

    /// Deserialize the data into `T`, regardless of representation.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            ContentData::Serialized(s) => Ok(serde_json::from_str(s)?),
            ContentData::Parsed(v) => Ok(T::deserialize(v)?),
        }
    }

    /// Convert cached `data` into the requested representation.
    ///
    /// Serialized mode keeps strings untouched so the caller sees the exact bytes the service
    /// sent. Parsed mode decodes strings as JSON and passes structured values through.
    pub(crate) fn shape(data: &serde_json::Value, serialized: bool) -> Result<ContentData> {
        match (data, serialized) {
            (serde_json::Value::String(s), true) => Ok(ContentData::Serialized(s.clone())),
            (other, true) => Ok(ContentData::Serialized(serde_json::to_string(other)?)),
            (serde_json::Value::String(s), false) => {
                Ok(ContentData::Parsed(serde_json::from_str(s)?))
            }
            (other, false) => Ok(ContentData::Parsed(other.clone())),
        }
    }
}

/// A content entry shaped per [`ContentOptions`].
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Bare data (`full_response = false`).
    Data(ContentData),
    /// Full envelope (`full_response = true`).
    Full {
        /// Shaped data.
        data: ContentData,
        /// Content hash.
        hash: String,
        /// Content metadata.
        meta: Meta,
    },
}

impl Content {
    /// Data of the entry.
    pub fn data(&self) -> &ContentData {
        match self {
            Content::Data(data) | Content::Full { data, .. } => data,
        }
    }

    /// Hash, only present on full responses.
    pub fn hash(&self) -> Option<&str> {
        match self {
            Content::Data(_) => None,
            Content::Full { hash, .. } => Some(hash),
        }
    }

    /// Metadata, only present on full responses.
    pub fn meta(&self) -> Option<&Meta> {
        match self {
            Content::Data(_) => None,
            Content::Full { meta, .. } => Some(meta),
        }
    }

    pub(crate) fn shape(
        response: &ContentResponse,
        serialized: bool,
        full_response: bool,
    ) -> Result<Content> {
        let data = ContentData::shape(&response.data, serialized)?;
        if !full_response {
            return Ok(Content::Data(data));
        }
        Ok(Content::Full {
            data,
            hash: response.hash.clone(),
            meta: response.meta.clone(),
        })
    }
}

/// Payload for [`Client::publish_content_update`](crate::Client::publish_content_update).
///
/// Content and dynamic content map are converted to JSON when set, so a value that cannot be
/// represented as JSON is rejected before any request is made.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishContentUpdate {
    pub(crate) description: String,
    pub(crate) content: serde_json::Value,
    pub(crate) dynamic_content_map: Vec<serde_json::Value>,
}

impl PublishContentUpdate {
    /// Create a payload with `description` and JSON-encodable `content`.
    ///
    /// ```
    /// # use joystick::PublishContentUpdate;
    /// let update = PublishContentUpdate::new("bump timeout", &serde_json::json!({"timeout": 30}))
    ///     .unwrap();
    /// ```
    pub fn new(description: impl Into<String>, content: &impl Serialize) -> Result<Self> {
        let content = serde_json::to_value(content).map_err(|err| {
            Error::invalid_argument(format!(
                "Invalid content. It should be JSON encodable: {err}"
            ))
        })?;
        Ok(PublishContentUpdate {
            description: description.into(),
            content,
            dynamic_content_map: Vec::new(),
        })
    }

    /// Attach a dynamic content map. It must encode to a JSON array.
    pub fn with_dynamic_content_map(mut self, map: &impl Serialize) -> Result<Self> {
        let invalid = |detail: String| {
            Error::invalid_argument(format!(
                "Invalid dynamicContentMap. It should be a JSON encodable array: {detail}"
            ))
        };
        match serde_json::to_value(map).map_err(|err| invalid(err.to_string()))? {
            serde_json::Value::Array(entries) => {
                self.dynamic_content_map = entries;
                Ok(self)
            }
            other => Err(invalid(format!("got {other}"))),
        }
    }

    /// Description of the change.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Content to publish.
    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    /// Dynamic content map, empty when not set.
    pub fn dynamic_content_map(&self) -> &[serde_json::Value] {
        &self.dynamic_content_map
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn response(data: serde_json::Value) -> ContentResponse {
        ContentResponse {
            data,
            hash: "h".to_owned(),
            meta: Meta {
                uid: 1,
                modified: 2,
                segments: vec![json!({"name": "all"})],
                variants: vec![],
            },
        }
    }

    #[test]
    fn parses_wire_meta() {
        let parsed: ContentResponse = serde_json::from_value(json!({
            "data": "{\"a\":1}",
            "hash": "abc",
            "meta": {"uid": 7, "mod": 3, "seg": [], "var": [{"id": 1}]}
        }))
        .unwrap();

        assert_eq!(parsed.meta.uid, 7);
        assert_eq!(parsed.meta.modified, 3);
        assert_eq!(parsed.meta.variants, vec![json!({"id": 1})]);
    }

    #[test]
    fn serialized_mode_keeps_exact_text() {
        let raw = "{ \"b\": 2,  \"a\": 1 }";
        let shaped = ContentData::shape(&json!(raw), true).unwrap();
        assert_eq!(shaped.as_str(), Some(raw));
    }

    #[test]
    fn parsed_mode_decodes_strings() {
        let shaped = ContentData::shape(&json!("{\"name\":\"Miguel\"}"), false).unwrap();
        assert_eq!(shaped, ContentData::Parsed(json!({"name": "Miguel"})));
    }

    #[test]
    fn parsed_mode_rejects_invalid_json_text() {
        let err = ContentData::shape(&json!("{not json"), false).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Deserialization);
    }

    #[test]
    fn string_content_is_decoded_once() {
        let raw = json!("\"hello\"");
        assert_eq!(
            ContentData::shape(&raw, false).unwrap(),
            ContentData::Parsed(json!("hello"))
        );
        assert_eq!(
            ContentData::shape(&raw, true).unwrap().as_str(),
            Some("\"hello\"")
        );
    }

    #[test]
    fn structured_data_is_encoded_in_serialized_mode() {
        let shaped = ContentData::shape(&json!({"a": 1}), true).unwrap();
        assert_eq!(shaped.as_str(), Some("{\"a\":1}"));
    }

    #[test]
    fn full_response_keeps_envelope() {
        let content = Content::shape(&response(json!("[1,2]")), false, true).unwrap();
        assert_eq!(content.data(), &ContentData::Parsed(json!([1, 2])));
        assert_eq!(content.hash(), Some("h"));
        assert_eq!(content.meta().map(|m| m.uid), Some(1));

        let bare = Content::shape(&response(json!("[1,2]")), false, false).unwrap();
        assert_eq!(bare.hash(), None);
        assert_eq!(bare.meta(), None);
    }

    #[test]
    fn deserializes_either_representation() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Greeting {
            name: String,
        }

        let serialized = ContentData::Serialized("{\"name\":\"Ana\"}".to_owned());
        let parsed = ContentData::Parsed(json!({"name": "Ana"}));
        assert_eq!(
            serialized.deserialize::<Greeting>().unwrap(),
            parsed.deserialize::<Greeting>().unwrap()
        );
    }

    #[test]
    fn rejects_content_that_is_not_json_encodable() {
        let mut content = HashMap::new();
        content.insert((1, 2), "tuple keys cannot be JSON object keys");

        let err = PublishContentUpdate::new("desc", &content).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn dynamic_content_map_must_be_an_array() {
        let update = PublishContentUpdate::new("desc", &json!({"a": 1})).unwrap();

        assert!(update
            .clone()
            .with_dynamic_content_map(&json!({"not": "array"}))
            .is_err());

        let update = update
            .with_dynamic_content_map(&vec![json!({"segment": "beta"})])
            .unwrap();
        assert_eq!(update.dynamic_content_map().len(), 1);
    }

    #[test]
    fn describes_inline_errors() {
        let err: ContentResponseError = serde_json::from_value(json!({
            "errors": {"code": "missing"},
            "title": "Not found",
            "status": 404
        }))
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Not found (status 404): {\"code\":\"missing\"}"
        );
    }
}
