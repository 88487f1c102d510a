use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::article::ArticleFetcher;
use super::channel::ChannelReader;
use super::http::{self, FetchError};
use super::settings::FetchSettings;
use super::source::SourceDescriptor;
use super::state::{self, Action, SessionState};
use super::writer::{FeedWriter, SharedBuffer};
use crate::util::fix_relative_urls;

#[derive(Debug, Default)]
struct SessionSlot {
    error: String,
    cancel: CancellationToken,
}

struct SessionInner {
    client: reqwest::Client,
    source: Arc<SourceDescriptor>,
    max_response_bytes: usize,
    fetcher: ArticleFetcher,
    output: SharedBuffer,
    state: watch::Sender<SessionState>,
    slot: Mutex<SessionSlot>,
}

/// One run of fetch → filter → extract → serialize for a single source.
///
/// [`start`](Self::start) spawns the pipeline on the current Tokio runtime and
/// returns immediately. The output document grows while the session runs and
/// is always closed by the time a terminal state is reported, whichever one
/// it is. Articles are processed strictly one after another.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct FeedSession {
    inner: Arc<SessionInner>,
}

impl FeedSession {
    pub fn new(client: reqwest::Client, source: Arc<SourceDescriptor>, max_response_bytes: usize) -> Self {
        let fetcher = ArticleFetcher::new(
            client.clone(),
            Arc::new(source.article.clone()),
            max_response_bytes,
        );
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(SessionInner {
                client,
                source,
                max_response_bytes,
                fetcher,
                output: SharedBuffer::new(),
                state,
                slot: Mutex::new(SessionSlot::default()),
            }),
        }
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.inner.source
    }

    /// Starts a run with `settings`.
    ///
    /// Returns `false`, changing nothing, if the session is already active.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, settings: FetchSettings) -> bool {
        let token = {
            let mut slot = self.inner.slot();
            let current = *self.inner.state.borrow();
            let Some(next) = current.begin() else {
                return false;
            };
            *slot = SessionSlot::default();
            self.inner.output.clear();
            self.inner.state.send_replace(next);
            slot.cancel.clone()
        };

        tracing::info!(source = %self.inner.source.id, "Feed session started");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run(settings, token));
        true
    }

    /// Cancels an active run.
    ///
    /// The session token is always canceled. An article fetch in progress
    /// runs on a child token, so it is aborted too and its completion drives
    /// the session to `Canceled`. A no-op that still returns `true` when
    /// nothing is running.
    pub fn cancel(&self) -> bool {
        let slot = self.inner.slot();
        if *self.inner.state.borrow() != SessionState::Active {
            return true;
        }

        if self.inner.fetcher.status() == SessionState::Active {
            tracing::debug!("Canceling session with active article fetch");
        }
        slot.cancel.cancel();
        true
    }

    pub fn status(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Message describing why the last run ended in `Error`; empty otherwise.
    pub fn error_string(&self) -> String {
        self.inner.slot().error.clone()
    }

    /// The output document as written so far.
    pub fn result(&self) -> Vec<u8> {
        self.inner.output.snapshot()
    }

    /// Waits until the session is no longer `Active` and returns its state.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.inner.state.subscribe();
        let waited = rx
            .wait_for(|s| *s != SessionState::Active)
            .await
            .map(|state| *state);
        match waited {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }
}

impl SessionInner {
    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, settings: FetchSettings, cancel: CancellationToken) {
        let mut writer = FeedWriter::new(self.output.clone());

        let mut outcome = self.pipeline(&settings, &cancel, &mut writer).await;
        if matches!(&outcome, Err(e) if !e.is_canceled()) && cancel.is_cancelled() {
            outcome = Err(FetchError::Canceled);
        }

        let index_url = self
            .source
            .index_url(settings.section.as_deref())
            .unwrap_or_default();
        if let Err(e) = self.close(&mut writer, &index_url) {
            tracing::error!(error = %e, "Failed to close output document");
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }

        let mut slot = self.slot();
        let current = *self.state.borrow();
        let Some(next) = current.finish(&outcome) else {
            return;
        };
        match &outcome {
            Ok(written) => {
                tracing::info!(source = %self.source.id, items = written, "Feed session ready");
            }
            Err(e) if e.is_canceled() => {
                tracing::info!(source = %self.source.id, "Feed session canceled");
            }
            Err(e) => {
                tracing::warn!(source = %self.source.id, error = %e, "Feed session failed");
                slot.error = e.to_string();
            }
        }
        self.state.send_replace(next);
    }

    /// Fetches the index, then walks its articles. Returns the number of
    /// items written.
    async fn pipeline(
        &self,
        settings: &FetchSettings,
        cancel: &CancellationToken,
        writer: &mut FeedWriter<SharedBuffer>,
    ) -> Result<usize, FetchError> {
        let url = self.source.index_url(settings.section.as_deref())?;
        let page = http::get_page(&self.client, &url, cancel, self.max_response_bytes).await?;

        let mut reader = ChannelReader::new();
        let parsed = match &self.source.index.listing {
            Some(listing) => {
                reader.set_content(fix_relative_urls(&page.text(), &page.url));
                reader.read_listing(listing, page.url.as_str())
            }
            None => {
                reader.set_content(page.body.as_slice());
                reader.read_channel()
            }
        };
        if !parsed {
            return Err(FetchError::Parse(reader.error_string().to_owned()));
        }

        // Header goes out before any article is resolved, so a feed with no
        // qualifying articles still yields a valid document.
        writer.start_feed(&self.source.description, self.source.icon_url.as_deref())?;
        writer.write_feed_title(reader.title())?;
        let link = if reader.link().is_empty() {
            page.url.as_str()
        } else {
            reader.link()
        };
        writer.write_feed_link(link)?;

        let mut written = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Canceled);
            }

            reader.read_next_article();
            let action = state::classify(
                reader.article(),
                written,
                settings,
                self.source.full_article,
            );
            let Some(entry) = reader.article() else {
                break;
            };

            match action {
                Action::Stop(reason) => {
                    tracing::debug!(?reason, written, "Article loop finished");
                    break;
                }
                Action::WriteDirect => {
                    writer.write_item(entry)?;
                    written += 1;
                }
                Action::FetchFull => {
                    match self.fetcher.fetch_linked(&entry.url, settings, cancel).await {
                        Ok(_) if cancel.is_cancelled() => return Err(FetchError::Canceled),
                        Ok(record) => {
                            writer.write_item(&record.overlay(entry))?;
                            written += 1;
                        }
                        Err(e) if e.is_canceled() => return Err(FetchError::Canceled),
                        Err(e) => {
                            tracing::warn!(url = %entry.url, error = %e, "Skipping article");
                        }
                    }
                }
            }
        }

        Ok(written)
    }

    /// Ends the document. If the index never produced a header, a bare one
    /// with an empty title and the index URL as link is written first.
    fn close(&self, writer: &mut FeedWriter<SharedBuffer>, index_url: &str) -> Result<(), FetchError> {
        if !writer.is_started() {
            writer.start_feed(&self.source.description, self.source.icon_url.as_deref())?;
            writer.write_feed_title("")?;
            writer.write_feed_link(index_url)?;
        }
        writer.end_feed()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::source::IndexSpec;
    use crate::feed::writer::tests::assert_well_formed;
    use crate::feed::ArticleRules;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    fn source(server: &MockServer, full_article: bool) -> Arc<SourceDescriptor> {
        Arc::new(SourceDescriptor {
            id: "test".into(),
            name: "Test".into(),
            description: "Test articles".into(),
            icon_url: None,
            index: IndexSpec {
                base_url: server.uri(),
                suffix: "/rss.xml".into(),
                ..IndexSpec::default()
            },
            article: ArticleRules::default(),
            full_article,
        })
    }

    fn rss(server: &MockServer, items: usize) -> String {
        const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
        let items: String = (1..=items)
            .map(|i| {
                format!(
                    "<item><title>Story {i}</title><link>{}/a/{i}</link>\
                     <pubDate>{}, 0{i} Jan 2024 10:00:00 GMT</pubDate></item>",
                    server.uri(),
                    WEEKDAYS[(i - 1) % 7]
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test feed</title><link>{}/</link>{items}</channel></rss>"#,
            server.uri()
        )
    }

    #[tokio::test]
    async fn test_unparsable_index_is_error_with_closed_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let session = FeedSession::new(client(), source(&server, false), http::MAX_RESPONSE_SIZE);
        assert!(session.start(FetchSettings::default()));
        assert_eq!(session.wait().await, SessionState::Error);
        assert!(session.error_string().contains("parse"));

        let out = session.result();
        assert_well_formed(&out);
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("Test articles"));
        assert!(xml.contains("<title><![CDATA[]]></title>"));
        assert!(xml.contains(&format!("<link>{}/rss.xml</link>", server.uri())));
    }

    #[tokio::test]
    async fn test_cancel_during_article_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&server, 3)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body></body></html>")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .expect(0)
            .mount(&server)
            .await;

        let session = FeedSession::new(client(), source(&server, true), http::MAX_RESPONSE_SIZE);
        assert!(session.start(FetchSettings::default()));
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.inner.fetcher.status() != SessionState::Active
                || !String::from_utf8_lossy(&session.result()).contains("Story 1")
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(session.cancel());
        // the session token itself is canceled, not only the fetch's child
        assert!(session.inner.slot().cancel.is_cancelled());
        assert_eq!(session.wait().await, SessionState::Canceled);
        assert!(session.error_string().is_empty());
        assert_eq!(session.inner.fetcher.status(), SessionState::Canceled);

        let out = session.result();
        assert_well_formed(&out);
        let xml = String::from_utf8(out).unwrap();
        assert_eq!(xml.matches("<item>").count(), 1);
        assert!(!xml.contains("Story 2"));
        assert!(!xml.contains("Story 3"));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_late_article_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&server, 2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/1"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let session = FeedSession::new(client(), source(&server, true), http::MAX_RESPONSE_SIZE);
        assert!(session.start(FetchSettings::default()));
        while session.inner.fetcher.status() != SessionState::Active {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(session.cancel());
        assert_eq!(session.wait().await, SessionState::Canceled);
        assert!(session.error_string().is_empty());
        let out = session.result();
        assert_well_formed(&out);
        assert_eq!(String::from_utf8(out).unwrap().matches("<item>").count(), 0);
    }

    #[tokio::test]
    async fn test_per_article_error_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&server, 3)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&server)
            .await;

        let session = FeedSession::new(client(), source(&server, true), http::MAX_RESPONSE_SIZE);
        assert!(session.start(FetchSettings::default()));
        assert_eq!(session.wait().await, SessionState::Ready);
        assert!(session.error_string().is_empty());

        let out = session.result();
        assert_well_formed(&out);
        let xml = String::from_utf8(out).unwrap();
        assert_eq!(xml.matches("<item>").count(), 2);
        assert!(xml.contains("Story 1"));
        assert!(!xml.contains("Story 2"));
        assert!(xml.contains("Story 3"));
    }

    #[tokio::test]
    async fn test_cancel_during_index_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&server, 1))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let session = FeedSession::new(client(), source(&server, false), http::MAX_RESPONSE_SIZE);
        assert!(session.start(FetchSettings::default()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.cancel());
        assert_eq!(session.wait().await, SessionState::Canceled);
        assert_well_formed(&session.result());

        // canceling a finished session changes nothing
        assert!(session.cancel());
        assert_eq!(session.status(), SessionState::Canceled);
    }

    #[tokio::test]
    async fn test_wait_on_idle_session_returns_immediately() {
        let server = MockServer::start().await;
        let session = FeedSession::new(client(), source(&server, false), http::MAX_RESPONSE_SIZE);
        assert_eq!(session.wait().await, SessionState::Idle);
        assert!(session.cancel());
        assert_eq!(session.status(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_restart_after_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&server, 1)))
            .mount(&server)
            .await;

        let session = FeedSession::new(client(), source(&server, false), http::MAX_RESPONSE_SIZE);
        assert!(session.start(FetchSettings::default()));
        assert_eq!(session.wait().await, SessionState::Ready);
        let first = session.result();

        assert!(session.start(FetchSettings::default()));
        assert_eq!(session.wait().await, SessionState::Ready);
        assert_eq!(session.result(), first);
    }
}
