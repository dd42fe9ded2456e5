use std::collections::HashMap;

use serde::Serialize;

use crate::{
    api_client::{ApiClient, ApiClientConfig, DynamicContentPayload},
    cache::{ContentCache, InMemoryCache},
    cache_key::CacheKeyParts,
    models::{Content, ContentBatch, ContentOptions, Params, PublishContentUpdate},
    properties::{validate_content_ids, validate_description, Properties},
    retry::RetryingTransport,
    transport::{ReqwestTransport, Transport},
    ClientConfig, Error, ErrorKind, Result,
};

/// A client for the Joystick remote configuration API.
///
/// Content is fetched through the combine endpoint and cached per logical request. A client
/// owns its cache, so two clients never see each other's entries even when configured
/// identically.
///
/// Concurrent fetches are not coalesced: two threads missing the cache for the same request
/// (each through its own client) both hit the network.
///
/// # Examples
/// ```
/// # use joystick::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::from_api_key("api-key")).unwrap();
/// assert_eq!(client.api_key(), "api-key");
/// ```
pub struct Client {
    properties: Properties,
    api: ApiClient<RetryingTransport<Box<dyn Transport + Send>>>,
    cache: Box<dyn ContentCache + Send>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// Fails with an invalid-argument error if the API key is blank, the user id is blank, the
    /// semVer is not `major.minor.patch`, or the cache expiration is negative.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if let Some(err) = config.invalid_param {
            return Err(err);
        }

        let mut properties = Properties::new(
            config.api_key,
            config.cache_expiration_seconds,
            config.serialized,
        )?;
        properties.set_user_id(config.user_id)?;
        properties.set_sem_ver(config.sem_ver)?;
        properties.set_params(config.params);

        let transport: Box<dyn Transport + Send> = match config.transport {
            Some(transport) => transport,
            None => Box::new(ReqwestTransport::new(properties.api_key())?),
        };
        let api = ApiClient::new(
            RetryingTransport::new(transport, config.retry),
            ApiClientConfig {
                base_url: config.base_url,
                publish_base_url: config.publish_base_url,
                timeout: config.timeout,
                retry_publish: config.retry_publish,
            },
        )?;

        let cache: Box<dyn ContentCache + Send> = match config.cache {
            Some(mut cache) => {
                cache.set_expiration_seconds(config.cache_expiration_seconds)?;
                cache
            }
            None => Box::new(InMemoryCache::new(
                config.cache_expiration_seconds,
                config.cache_max_items,
            )?),
        };

        Ok(Client {
            properties,
            api,
            cache,
        })
    }

    /// Get one content entry. Delegates to [`Client::get_contents`].
    ///
    /// Returns `None` if the service answered without an entry for `content_id`.
    pub fn get_content(
        &mut self,
        content_id: &str,
        options: ContentOptions,
    ) -> Result<Option<Content>> {
        let mut contents = self.get_contents(&[content_id], options)?;
        Ok(contents.remove(content_id))
    }

    /// Get several content entries in a single request.
    ///
    /// The cache is consulted first unless [`ContentOptions::refresh`] is set. On a miss the
    /// batch is fetched and cached. Fetch failures are logged and returned; stale entries are
    /// never served as a fallback. A failed cache write is logged and the fetched content is
    /// still returned.
    pub fn get_contents<S: AsRef<str>>(
        &mut self,
        content_ids: &[S],
        options: ContentOptions,
    ) -> Result<HashMap<String, Content>> {
        validate_content_ids(content_ids)?;
        let content_ids: Vec<String> = content_ids
            .iter()
            .map(|id| id.as_ref().to_owned())
            .collect();

        let serialized = options.serialized.unwrap_or(self.properties.serialized());
        let cache_key = CacheKeyParts {
            api_key: self.properties.api_key(),
            params: self.properties.params(),
            sem_ver: self.properties.sem_ver(),
            user_id: self.properties.user_id(),
            content_ids: &content_ids,
            serialized,
            full_response: options.full_response,
        }
        .derive();

        let cached = if options.refresh {
            None
        } else {
            self.cache.get(&cache_key)?
        };

        let batch = match cached {
            Some(batch) => {
                log::debug!(target: "joystick", content_ids:serde = content_ids; "serving content from cache");
                batch
            }
            None => {
                log::debug!(target: "joystick", content_ids:serde = content_ids, refresh = options.refresh; "fetching content");
                let batch = self
                    .fetch(&content_ids)
                    .inspect_err(|err| log_fetch_error(&content_ids, err))?;
                if let Err(err) = self.cache.set(&cache_key, batch.clone()) {
                    log::warn!(target: "joystick", content_ids:serde = content_ids; "failed to cache fetched content: {}", err);
                }
                batch
            }
        };

        let contents = shape(&batch, serialized, options.full_response)?;
        log::trace!(target: "joystick", content_ids:serde = content_ids; "shaped {} content entries", contents.len());
        Ok(contents)
    }

    fn fetch(&self, content_ids: &[String]) -> Result<ContentBatch> {
        self.api.get_dynamic_content(
            content_ids,
            DynamicContentPayload {
                user_id: self.properties.user_id(),
                sem_ver: self.properties.sem_ver(),
                params: self.properties.params(),
            },
        )
    }

    /// Publish a new version of `content_id`.
    ///
    /// The description must be 1 to 50 characters long. The cache is left untouched, so cached
    /// reads of the same content keep being served until they expire or
    /// [`Client::clear_cache`] is called.
    pub fn publish_content_update(
        &self,
        content_id: &str,
        update: &PublishContentUpdate,
    ) -> Result<()> {
        validate_content_ids(&[content_id])?;
        validate_description(&update.description)?;

        self.api
            .publish_content_update(content_id, update)
            .inspect_err(|err| {
                log::warn!(target: "joystick", content_id, kind:debug = err.kind(); "failed to publish content update: {}", err);
            })
    }

    /// Remove every cached batch this client wrote.
    pub fn clear_cache(&mut self) -> Result<()> {
        self.cache.clear()
    }

    /// API key used to authenticate.
    pub fn api_key(&self) -> &str {
        self.properties.api_key()
    }

    /// Current user id.
    pub fn user_id(&self) -> Option<&str> {
        self.properties.user_id()
    }

    /// Set the user id. Blank ids are rejected.
    ///
    /// The cache is not cleared: the user id is part of the cache key, so entries for the
    /// previous value simply stop matching.
    pub fn set_user_id(&mut self, user_id: Option<&str>) -> Result<()> {
        self.properties.set_user_id(user_id.map(str::to_owned))
    }

    /// Current semantic version.
    pub fn sem_ver(&self) -> Option<&str> {
        self.properties.sem_ver()
    }

    /// Set the semantic version. It must match `major.minor.patch`.
    pub fn set_sem_ver(&mut self, sem_ver: Option<&str>) -> Result<()> {
        self.properties.set_sem_ver(sem_ver.map(str::to_owned))
    }

    /// Current dynamic params.
    pub fn params(&self) -> &Params {
        self.properties.params()
    }

    /// Value of one dynamic param.
    pub fn param_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.params().get(key)
    }

    /// Replace the dynamic params.
    pub fn set_params(&mut self, params: Params) {
        self.properties.set_params(params)
    }

    /// Set one dynamic param. The value must be JSON encodable.
    pub fn set_param_value(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|err| Error::invalid_argument(format!("Invalid param value: {err}")))?;
        self.properties.set_param_value(key.into(), value);
        Ok(())
    }

    /// Current cache expiration.
    pub fn cache_expiration_seconds(&self) -> u64 {
        self.properties.cache_expiration_seconds()
    }

    /// Change the cache expiration. Applies to entries read from now on.
    pub fn set_cache_expiration_seconds(&mut self, seconds: i64) -> Result<()> {
        self.properties.set_cache_expiration_seconds(seconds)?;
        self.cache.set_expiration_seconds(seconds)
    }

    /// Whether content is returned serialized by default.
    pub fn serialized(&self) -> bool {
        self.properties.serialized()
    }
}

fn shape(
    batch: &ContentBatch,
    serialized: bool,
    full_response: bool,
) -> Result<HashMap<String, Content>> {
    batch
        .iter()
        .map(|(content_id, response)| {
            Ok((
                content_id.clone(),
                Content::shape(response, serialized, full_response)?,
            ))
        })
        .collect()
}

fn log_fetch_error(content_ids: &[String], err: &Error) {
    match err.kind() {
        ErrorKind::MultipleContents => {
            log::warn!(target: "joystick", content_ids:serde = content_ids; "some contents failed to load:\n{}", err)
        }
        ErrorKind::BadRequest | ErrorKind::UnknownHttp => {
            log::warn!(target: "joystick", content_ids:serde = content_ids, status:debug = err.status(); "content request was rejected: {}", err)
        }
        ErrorKind::ServerError | ErrorKind::Network => {
            log::warn!(target: "joystick", content_ids:serde = content_ids; "content service unavailable: {}", err)
        }
        _ => {
            log::error!(target: "joystick", content_ids:serde = content_ids; "error occurred while fetching content: {:?}", err)
        }
    }
}
