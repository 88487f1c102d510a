//! The scrape-and-aggregate pipeline.
//!
//! A [`FeedSession`] turns one source's index document into a normalized
//! RSS 2.0 document:
//!
//! 1. fetch the index (RSS/Atom feed or HTML listing page), following up to
//!    [`MAX_REDIRECTS`] redirects
//! 2. walk its articles newest-first, stopping at the `lastUpdated` watermark
//!    or the `maxResults` cap
//! 3. optionally fetch each article page and extract fields with the source's
//!    [`ArticleRules`]
//! 4. stream every item through a [`FeedWriter`] as it completes
//!
//! # Architecture
//!
//! - [`redirect`] / [`http`]: bounded redirect chains over a client with
//!   automatic redirects disabled
//! - [`html`] / [`rules`]: declarative DOM queries and field extraction
//! - [`channel`]: pull-style cursor over an index document
//! - [`writer`]: incremental XML output
//! - [`article`] / [`session`] / [`state`]: the article fetcher and the session
//!   state machine
//! - [`source`]: per-publisher descriptors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use newsmill::feed::{FeedSession, FetchSettings, SessionState, SourceRegistry};
//!
//! # async fn run(client: reqwest::Client) {
//! let registry = SourceRegistry::builtin();
//! let source = Arc::new(registry.get("bbc").unwrap().clone());
//! let session = FeedSession::new(client, source, newsmill::feed::MAX_RESPONSE_SIZE);
//!
//! session.start(FetchSettings::default());
//! if session.wait().await == SessionState::Ready {
//!     println!("{}", String::from_utf8_lossy(&session.result()));
//! }
//! # }
//! ```

pub mod article;
pub mod channel;
pub mod html;
pub mod http;
pub mod redirect;
pub mod rules;
pub mod session;
pub mod settings;
pub mod source;
pub mod state;
pub mod writer;

pub use article::{ArticleFetcher, ArticleRecord, Enclosure};
pub use channel::ChannelReader;
pub use html::{AttributeMatch, AttributeQuery, Document, Element, MatchMode};
pub use http::{get_page, FetchError, Page, MAX_RESPONSE_SIZE};
pub use redirect::{resolve as resolve_redirect, RedirectState, MAX_REDIRECTS};
pub use rules::{ArticleRules, ListingRules};
pub use session::FeedSession;
pub use settings::FetchSettings;
pub use source::{IndexSpec, SourceDescriptor, SourceRegistry};
pub use state::SessionState;
pub use writer::{FeedWriter, SharedBuffer, WriterError};
