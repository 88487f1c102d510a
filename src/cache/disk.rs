use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::feed::http::{self, FetchError};
use crate::feed::redirect;

/// Errors raised by the on-disk cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Transport(#[from] FetchError),
    #[error("No cache directory assigned")]
    NoDirectory,
}

/// Outcome of one cache-backed request hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheReply {
    /// The resource redirects to this absolute URL.
    Redirect(String),
    Body(Vec<u8>),
}

/// Sidecar metadata stored next to each cached body.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    stored_at: i64,
}

/// A directory-backed HTTP cache with prefer-cache loads.
///
/// Entries are keyed by the SHA-256 of the request URL. Only successful
/// responses and redirects are stored; a redirect entry replays its
/// `Location` without touching the network.
#[derive(Debug, Clone)]
pub struct DiskCache {
    client: reqwest::Client,
    directory: Option<PathBuf>,
    max_response_bytes: usize,
}

impl DiskCache {
    pub fn new(client: reqwest::Client, max_response_bytes: usize) -> Self {
        Self {
            client,
            directory: None,
            max_response_bytes,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Points the cache at `dir`. Existing entries in the old directory are
    /// left on disk.
    pub fn set_directory(&mut self, dir: impl Into<PathBuf>) {
        self.directory = Some(dir.into());
    }

    /// Hex-encoded SHA-256 of `url`, the entry's file stem.
    pub fn entry_key(url: &str) -> String {
        Sha256::digest(url.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn entry_paths(&self, url: &str) -> Result<(PathBuf, PathBuf), CacheError> {
        let dir = self.directory.as_ref().ok_or(CacheError::NoDirectory)?;
        let key = Self::entry_key(url);
        Ok((dir.join(format!("{key}.json")), dir.join(format!("{key}.body"))))
    }

    /// Returns the cached reply for `url`, if any.
    pub async fn lookup(&self, url: &str) -> Result<Option<CacheReply>, CacheError> {
        let (meta_path, body_path) = self.entry_paths(url)?;
        let meta = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = match serde_json::from_slice(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Ignoring corrupt cache entry");
                return Ok(None);
            }
        };
        if let Some(location) = meta.location {
            return Ok(Some(CacheReply::Redirect(location)));
        }
        match tokio::fs::read(&body_path).await {
            Ok(body) => Ok(Some(CacheReply::Body(body))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `reply` for `url`, replacing any previous entry.
    pub async fn store(&self, url: &str, reply: &CacheReply) -> Result<(), CacheError> {
        let (meta_path, body_path) = self.entry_paths(url)?;
        if let Some(dir) = meta_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let location = match reply {
            CacheReply::Redirect(location) => Some(location.clone()),
            CacheReply::Body(body) => {
                write_atomic(&body_path, body).await?;
                None
            }
        };
        let meta = EntryMeta {
            url: url.to_owned(),
            location,
            stored_at: chrono::Utc::now().timestamp(),
        };
        let meta = serde_json::to_vec(&meta).map_err(std::io::Error::other)?;
        write_atomic(&meta_path, &meta).await
    }

    /// Serves `url` from the cache, falling back to one network request.
    ///
    /// Redirects are not followed: a `Location` comes back as
    /// [`CacheReply::Redirect`] so the caller can charge the hop.
    ///
    /// # Errors
    ///
    /// [`CacheError::NoDirectory`] before [`set_directory`](Self::set_directory);
    /// [`CacheError::Transport`] for network failures and non-2xx responses.
    pub async fn load_prefer_cache(&self, url: &str) -> Result<CacheReply, CacheError> {
        if let Some(reply) = self.lookup(url).await? {
            tracing::debug!(url = %url, "Cache hit");
            return Ok(reply);
        }

        let request_url =
            Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        tracing::debug!(url = %url, "Cache miss");
        let response = self
            .client
            .get(request_url)
            .send()
            .await
            .map_err(FetchError::from)?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| redirect::resolve(v, response.url()));

        let reply = match location {
            Some(next) => CacheReply::Redirect(next),
            None if response.status().is_success() => {
                CacheReply::Body(http::read_limited_bytes(response, self.max_response_bytes).await?)
            }
            None => return Err(FetchError::HttpStatus(response.status().as_u16()).into()),
        };

        if let Err(e) = self.store(url, &reply).await {
            tracing::warn!(url = %url, error = %e, "Failed to store cache entry");
        }
        Ok(reply)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{suffix:016x}"));

    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}
