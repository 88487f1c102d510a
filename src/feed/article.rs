use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::http::{self, FetchError};
use super::rules::ArticleRules;
use super::settings::FetchSettings;
use super::state::SessionState;
use crate::util::fix_relative_urls;

/// A media attachment (`<enclosure url type>`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
}

/// One normalized article, as written to the output document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArticleRecord {
    pub author: String,
    /// Sanitized HTML fragment.
    pub body: String,
    pub categories: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub enclosures: Vec<Enclosure>,
    pub title: String,
    pub url: String,
}

impl ArticleRecord {
    /// Field-by-field merge: values from `self` (the article page) win when
    /// non-empty, otherwise the channel entry's value is kept.
    pub fn overlay(self, channel: &ArticleRecord) -> ArticleRecord {
        fn pick(page: String, channel: &str) -> String {
            if page.is_empty() {
                channel.to_owned()
            } else {
                page
            }
        }
        fn pick_list<T: Clone>(page: Vec<T>, channel: &[T]) -> Vec<T> {
            if page.is_empty() {
                channel.to_vec()
            } else {
                page
            }
        }

        ArticleRecord {
            author: pick(self.author, &channel.author),
            body: pick(self.body, &channel.body),
            categories: pick_list(self.categories, &channel.categories),
            date: self.date.or(channel.date),
            enclosures: pick_list(self.enclosures, &channel.enclosures),
            title: pick(self.title, &channel.title),
            url: pick(self.url, &channel.url),
        }
    }
}

#[derive(Debug, Default)]
struct FetcherSlot {
    status: SessionState,
    error: String,
    cancel: Option<CancellationToken>,
    result: Option<ArticleRecord>,
}

struct FetcherInner {
    client: reqwest::Client,
    rules: Arc<ArticleRules>,
    max_response_bytes: usize,
    slot: Mutex<FetcherSlot>,
}

/// Retrieves one article page and extracts its fields with a source's rules.
///
/// Cheap to clone; clones share status, so a session can hand one handle to
/// its pipeline task and keep another for [`cancel`](Self::cancel).
#[derive(Clone)]
pub struct ArticleFetcher {
    inner: Arc<FetcherInner>,
}

impl ArticleFetcher {
    pub fn new(client: reqwest::Client, rules: Arc<ArticleRules>, max_response_bytes: usize) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                client,
                rules,
                max_response_bytes,
                slot: Mutex::new(FetcherSlot::default()),
            }),
        }
    }

    pub fn status(&self) -> SessionState {
        self.slot().status
    }

    /// Message for the last `Error`, empty otherwise.
    pub fn error_string(&self) -> String {
        self.slot().error.clone()
    }

    /// The record from the last `Ready` fetch.
    pub fn result(&self) -> Option<ArticleRecord> {
        self.slot().result.clone()
    }

    /// Requests cancellation of the active fetch. The outstanding request is
    /// aborted and the fetch finishes as `Canceled`. Always succeeds.
    pub fn cancel(&self) -> bool {
        let slot = self.slot();
        if slot.status == SessionState::Active {
            if let Some(token) = &slot.cancel {
                token.cancel();
            }
        }
        true
    }

    /// Fetches and extracts `url`.
    ///
    /// # Errors
    ///
    /// [`FetchError::AlreadyActive`] if a fetch is already running on this
    /// fetcher; otherwise any error from [`http::get_page`].
    pub async fn fetch(&self, url: &str, settings: &FetchSettings) -> Result<ArticleRecord, FetchError> {
        self.fetch_linked(url, settings, &CancellationToken::new())
            .await
    }

    /// Like [`fetch`](Self::fetch), but also canceled when `parent` is.
    pub async fn fetch_linked(
        &self,
        url: &str,
        settings: &FetchSettings,
        parent: &CancellationToken,
    ) -> Result<ArticleRecord, FetchError> {
        let token = parent.child_token();
        {
            let mut slot = self.slot();
            let Some(next) = slot.status.begin() else {
                return Err(FetchError::AlreadyActive);
            };
            *slot = FetcherSlot {
                status: next,
                cancel: Some(token.clone()),
                ..FetcherSlot::default()
            };
        }

        tracing::debug!(url = %url, "Fetching article");
        let outcome = self.retrieve(url, settings, &token).await;

        let mut slot = self.slot();
        if let Some(next) = slot.status.finish(&outcome) {
            slot.status = next;
        }
        slot.cancel = None;
        match &outcome {
            Ok(record) => slot.result = Some(record.clone()),
            Err(e) if !e.is_canceled() => slot.error = e.to_string(),
            Err(_) => {}
        }
        outcome
    }

    async fn retrieve(
        &self,
        url: &str,
        settings: &FetchSettings,
        token: &CancellationToken,
    ) -> Result<ArticleRecord, FetchError> {
        let page = http::get_page(&self.inner.client, url, token, self.inner.max_response_bytes).await?;

        let html = fix_relative_urls(&page.text(), &page.url);
        let mut record = self.inner.rules.extract(&html, settings.include_images);
        record.url = page.url.to_string();
        Ok(record)
    }

    fn slot(&self) -> MutexGuard<'_, FetcherSlot> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
