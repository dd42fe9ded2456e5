use std::time::Duration;

use serde::Serialize;

use crate::{
    cache::{ContentCache, InMemoryCache},
    models::Params,
    retry::RetryConfig,
    transport::Transport,
    Client, Error, Result,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use joystick::ClientConfig;
/// let client = ClientConfig::from_api_key("api-key")
///     .user_id("user-42")
///     .sem_ver("1.4.0")
///     .param_value("country", "pt")
///     .to_client()
///     .unwrap();
/// ```
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) user_id: Option<String>,
    pub(crate) sem_ver: Option<String>,
    pub(crate) params: Params,
    pub(crate) cache_expiration_seconds: i64,
    pub(crate) serialized: bool,
    pub(crate) base_url: String,
    pub(crate) publish_base_url: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: RetryConfig,
    pub(crate) retry_publish: bool,
    pub(crate) cache_max_items: usize,
    pub(crate) transport: Option<Box<dyn Transport + Send>>,
    pub(crate) cache: Option<Box<dyn ContentCache + Send>>,
    pub(crate) invalid_param: Option<Error>,
}

impl ClientConfig {
    /// Default base URL for content requests.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.getjoystick.com/api/v1";

    /// Default base URL for publishing content updates.
    pub const DEFAULT_PUBLISH_BASE_URL: &'static str = "https://capi.getjoystick.com/api/v1";

    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2_500);

    /// Default cache expiration.
    pub const DEFAULT_CACHE_EXPIRATION_SECONDS: i64 = 300;

    /// Default bound on the number of cached batches.
    pub const DEFAULT_CACHE_MAX_ITEMS: usize = InMemoryCache::DEFAULT_MAX_ITEMS;

    /// Environment variable holding the API key.
    pub const ENV_API_KEY: &'static str = "JOYSTICK_API_KEY";

    /// Environment variable overriding [`ClientConfig::DEFAULT_BASE_URL`].
    pub const ENV_BASE_URL: &'static str = "JOYSTICK_BASE_URL";

    /// Environment variable overriding [`ClientConfig::DEFAULT_TIMEOUT`], in milliseconds.
    pub const ENV_TIMEOUT_MS: &'static str = "JOYSTICK_TIMEOUT_MS";

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use joystick::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            user_id: None,
            sem_ver: None,
            params: Params::new(),
            cache_expiration_seconds: ClientConfig::DEFAULT_CACHE_EXPIRATION_SECONDS,
            serialized: false,
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            publish_base_url: ClientConfig::DEFAULT_PUBLISH_BASE_URL.to_owned(),
            timeout: Some(ClientConfig::DEFAULT_TIMEOUT),
            retry: RetryConfig::default(),
            retry_publish: false,
            cache_max_items: ClientConfig::DEFAULT_CACHE_MAX_ITEMS,
            transport: None,
            cache: None,
            invalid_param: None,
        }
    }

    /// Create a configuration from `JOYSTICK_API_KEY`, applying
    /// [`with_env_overrides`](ClientConfig::with_env_overrides).
    pub fn from_env() -> Result<Self> {
        ClientConfig::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(ClientConfig::ENV_API_KEY).ok_or_else(|| {
            Error::invalid_argument(format!("{} is not set", ClientConfig::ENV_API_KEY))
        })?;
        ClientConfig::from_api_key(api_key).with_overrides_from(lookup)
    }

    /// Apply `JOYSTICK_BASE_URL` and `JOYSTICK_TIMEOUT_MS` if they are set.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(base_url) = lookup(ClientConfig::ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(timeout) = lookup(ClientConfig::ENV_TIMEOUT_MS) {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                Error::invalid_argument(format!(
                    "{} must be a whole number of milliseconds, got {timeout:?}",
                    ClientConfig::ENV_TIMEOUT_MS
                ))
            })?;
            self.timeout = Some(Duration::from_millis(millis));
        }
        Ok(self)
    }

    /// Set the user id sent with content requests.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the semantic version (`major.minor.patch`) sent with content requests.
    pub fn sem_ver(mut self, sem_ver: impl Into<String>) -> Self {
        self.sem_ver = Some(sem_ver.into());
        self
    }

    /// Replace the dynamic params.
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set one dynamic param. A value that cannot be encoded as JSON makes
    /// [`to_client`](ClientConfig::to_client) fail.
    pub fn param_value(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.params.insert(key.into(), value);
            }
            Err(err) => {
                self.invalid_param = Some(Error::invalid_argument(format!(
                    "Invalid param value: {err}"
                )));
            }
        }
        self
    }

    /// Set how long fetched content stays cached. Negative values make
    /// [`to_client`](ClientConfig::to_client) fail.
    pub fn cache_expiration_seconds(mut self, seconds: i64) -> Self {
        self.cache_expiration_seconds = seconds;
        self
    }

    /// Return `data` as raw JSON strings unless a call says otherwise.
    pub fn serialized(mut self, serialized: bool) -> Self {
        self.serialized = serialized;
        self
    }

    /// Override base URL for content requests. Clients should use the default setting in most
    /// cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override base URL for publishing content updates.
    pub fn publish_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.publish_base_url = base_url.into();
        self
    }

    /// Set the request timeout. `None` disables it.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Allow the retry policy to re-send content updates. Off by default.
    pub fn retry_publish(mut self, retry_publish: bool) -> Self {
        self.retry_publish = retry_publish;
        self
    }

    /// Bound the default in-memory cache to `max_items` batches.
    pub fn cache_max_items(mut self, max_items: usize) -> Self {
        self.cache_max_items = max_items;
        self
    }

    /// Use a custom transport instead of the default `reqwest` one. The retry policy still
    /// applies on top of it.
    pub fn transport(mut self, transport: impl Transport + Send + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Use a custom cache instead of the default in-memory one.
    pub fn cache(mut self, cache: impl ContentCache + Send + 'static) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use joystick::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client().unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }
}
