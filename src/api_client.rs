//! Client for the Joystick content endpoints.
use std::{collections::BTreeMap, time::Duration};

use reqwest::{Method, Url};
use serde::Serialize;

use crate::{
    models::{ContentBatch, ContentResponse, ContentResponseError, Params, PublishContentUpdate},
    transport::{HttpRequest, Transport},
    Error, Result,
};

const COMBINE_ENDPOINT: &str = "/combine/";
const CONFIG_ENDPOINT: &str = "/config/";

/// Context sent along with a combine request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DynamicContentPayload<'a> {
    pub user_id: Option<&'a str>,
    pub sem_ver: Option<&'a str>,
    pub params: &'a Params,
}

#[derive(Serialize)]
struct CombineBody<'a> {
    u: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<&'a str>,
    p: &'a Params,
}

#[derive(Serialize)]
struct PublishBody<'a> {
    d: &'a str,
    c: &'a serde_json::Value,
    m: &'a [serde_json::Value],
}

pub(crate) struct ApiClientConfig {
    pub base_url: String,
    pub publish_base_url: String,
    pub timeout: Option<Duration>,
    pub retry_publish: bool,
}

/// Translates content requests into calls to the combine and config endpoints.
pub(crate) struct ApiClient<T> {
    transport: T,
    config: ApiClientConfig,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, config: ApiClientConfig) -> Result<Self> {
        // Fail at construction rather than on the first request.
        Url::parse(&config.base_url).map_err(Error::InvalidBaseUrl)?;
        Url::parse(&config.publish_base_url).map_err(Error::InvalidBaseUrl)?;
        Ok(ApiClient { transport, config })
    }

    /// Fetch `content_ids` in one combine call.
    ///
    /// `data` is always requested in serialized form, so every cached entry holds the raw JSON
    /// text and parsing happens once, when the batch is shaped for the caller.
    ///
    /// If any id failed server-side, the whole call fails with [`Error::MultipleContents`] and
    /// the successful siblings are dropped.
    pub fn get_dynamic_content(
        &self,
        content_ids: &[String],
        payload: DynamicContentPayload<'_>,
    ) -> Result<ContentBatch> {
        let body = serde_json::to_value(CombineBody {
            u: payload.user_id.unwrap_or(""),
            v: payload.sem_ver,
            p: payload.params,
        })?;

        let query = vec![
            ("c".to_owned(), serde_json::to_string(content_ids)?),
            ("dynamic".to_owned(), "true".to_owned()),
            ("responseType".to_owned(), "serialized".to_owned()),
        ];

        let request = HttpRequest {
            query,
            timeout: self.config.timeout,
            ..HttpRequest::new(
                Method::POST,
                join_url(&self.config.base_url, COMBINE_ENDPOINT),
                body,
            )
        };

        log::debug!(target: "joystick", content_ids:serde = content_ids; "requesting dynamic content");
        let response = self.transport.send(&request)?;

        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(&response.body)?;
        parse_combine_response(entries)
    }

    /// Publish a new version of `content_id`. Validation happens in the caller.
    pub fn publish_content_update(
        &self,
        content_id: &str,
        update: &PublishContentUpdate,
    ) -> Result<()> {
        let body = serde_json::to_value(PublishBody {
            d: &update.description,
            c: &update.content,
            m: &update.dynamic_content_map,
        })?;

        let url = format!(
            "{}{}",
            join_url(&self.config.publish_base_url, CONFIG_ENDPOINT),
            encode_path_segment(content_id)
        );
        let request = HttpRequest {
            timeout: self.config.timeout,
            retry_allowed: self.config.retry_publish,
            ..HttpRequest::new(Method::PUT, url, body)
        };

        log::debug!(target: "joystick", content_id; "publishing content update");
        self.transport.send(&request)?;
        Ok(())
    }
}

/// Split a combine response into successes and failures, failing if there is any failure.
fn parse_combine_response(entries: BTreeMap<String, serde_json::Value>) -> Result<ContentBatch> {
    let mut batch = ContentBatch::with_capacity(entries.len());
    let mut failures: Vec<(String, String)> = Vec::new();

    for (content_id, value) in entries {
        match value {
            serde_json::Value::String(message) => failures.push((content_id, message)),
            value if value.get("errors").is_some() => {
                let error: ContentResponseError = serde_json::from_value(value)?;
                failures.push((content_id, error.to_string()));
            }
            value => {
                let response: ContentResponse = serde_json::from_value(value)?;
                batch.insert(content_id, response);
            }
        }
    }

    if failures.is_empty() {
        return Ok(batch);
    }

    let message = failures
        .iter()
        .map(|(content_id, message)| format!("- {content_id}: {message}"))
        .collect::<Vec<_>>()
        .join("\n");
    Err(Error::MultipleContents {
        message,
        failed_ids: failures.into_iter().map(|(content_id, _)| content_id).collect(),
    })
}

fn join_url(base_url: &str, endpoint: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), endpoint)
}

fn encode_path_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        // form encoding turns spaces into '+', which is literal in a path
        .replace('+', "%20")
}
