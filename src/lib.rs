//! The Rust SDK for Joystick, a remote configuration service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that fetches configuration *contents* by id. Several ids
//! are combined into a single request, and results are cached per logical request (API key,
//! params, semVer, user id, content ids and response shape), so repeated reads do not hit the
//! network until the cache entry expires.
//!
//! Content data is returned either parsed ([`ContentData::Parsed`]) or as the exact JSON text the
//! service sent ([`ContentData::Serialized`]), optionally wrapped in the full envelope with hash
//! and metadata. See [`ContentOptions`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum; [`Error::kind()`] groups them into categories.
//! Invalid arguments are reported before any request is made. Transient network failures and
//! server errors on idempotent requests are retried with exponential backoff (see
//! [`RetryConfig`]). If any content id of a batch fails server-side, the whole call fails with
//! [`Error::MultipleContents`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `joystick` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # use joystick::{ClientConfig, ContentOptions};
//! let mut client = ClientConfig::from_api_key("api-key").to_client()?;
//! let content = client.get_content("first_config", ContentOptions::default())?;
//! # Ok::<(), joystick::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod api_client;
pub mod cache;
mod cache_key;
mod client;
mod clock;
mod config;
mod error;
mod models;
mod properties;
pub mod retry;
pub mod transport;

pub use cache::{ContentCache, InMemoryCache, KeyValueStore, SharedCache};
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use error::{Error, ErrorKind, NetworkError, NetworkErrorKind, Result};
pub use models::{
    Content, ContentBatch, ContentData, ContentOptions, ContentResponse, ContentResponseError,
    Meta, Params, PublishContentUpdate,
};
pub use retry::{RetryConfig, RetryingTransport};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
