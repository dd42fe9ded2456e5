use std::sync::OnceLock;

use regex::Regex;

use crate::{models::Params, Error, Result};

/// Mutable client properties that participate in content requests.
///
/// Every setter validates its argument, so the struct can never hold an invalid API key, user
/// id or semVer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Properties {
    api_key: String,
    user_id: Option<String>,
    sem_ver: Option<String>,
    params: Params,
    cache_expiration_seconds: u64,
    serialized: bool,
}

impl Properties {
    pub fn new(api_key: String, cache_expiration_seconds: i64, serialized: bool) -> Result<Self> {
        validate_api_key(&api_key)?;
        Ok(Properties {
            api_key,
            user_id: None,
            sem_ver: None,
            params: Params::new(),
            cache_expiration_seconds: validate_cache_expiration(cache_expiration_seconds)?,
            serialized,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn set_user_id(&mut self, user_id: Option<String>) -> Result<()> {
        if let Some(user_id) = &user_id {
            if user_id.trim().is_empty() {
                return Err(Error::invalid_argument(format!(
                    "Invalid userId: {user_id:?}"
                )));
            }
        }
        self.user_id = user_id;
        Ok(())
    }

    pub fn sem_ver(&self) -> Option<&str> {
        self.sem_ver.as_deref()
    }

    pub fn set_sem_ver(&mut self, sem_ver: Option<String>) -> Result<()> {
        if let Some(sem_ver) = &sem_ver {
            if !sem_ver_regex().is_match(sem_ver) {
                return Err(Error::invalid_argument(format!(
                    "Invalid semVer: {sem_ver:?}"
                )));
            }
        }
        self.sem_ver = sem_ver;
        Ok(())
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn set_param_value(&mut self, key: String, value: serde_json::Value) {
        self.params.insert(key, value);
    }

    pub fn cache_expiration_seconds(&self) -> u64 {
        self.cache_expiration_seconds
    }

    pub fn set_cache_expiration_seconds(&mut self, seconds: i64) -> Result<u64> {
        self.cache_expiration_seconds = validate_cache_expiration(seconds)?;
        Ok(self.cache_expiration_seconds)
    }

    pub fn serialized(&self) -> bool {
        self.serialized
    }
}

fn sem_ver_regex() -> &'static Regex {
    static SEM_VER: OnceLock<Regex> = OnceLock::new();
    SEM_VER.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semVer regex is valid"))
}

fn validate_api_key(api_key: &str) -> Result<()> {
    if api_key.trim().is_empty() {
        return Err(Error::invalid_argument(format!(
            "Invalid apiKey: {api_key:?}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_cache_expiration(seconds: i64) -> Result<u64> {
    u64::try_from(seconds).map_err(|_| {
        Error::invalid_argument(format!(
            "Invalid cacheExpirationSeconds: {seconds}. It should be greater than or equal to 0."
        ))
    })
}

/// Reject empty id lists and blank ids.
pub(crate) fn validate_content_ids<S: AsRef<str>>(content_ids: &[S]) -> Result<()> {
    if content_ids.is_empty() || content_ids.iter().any(|id| id.as_ref().trim().is_empty()) {
        return Err(Error::invalid_argument(
            "The contentIds parameter must be a non-empty array of non-blank strings.",
        ));
    }
    Ok(())
}

/// Publishing requires a description of 1 to 50 characters.
pub(crate) fn validate_description(description: &str) -> Result<()> {
    let len = description.chars().count();
    if !(1..=50).contains(&len) {
        return Err(Error::invalid_argument(format!(
            "Invalid description: {description:?}. It should be between 1 and 50 characters long."
        )));
    }
    Ok(())
}
