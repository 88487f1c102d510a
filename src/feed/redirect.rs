//! Redirect resolution with a bounded hop budget.
//!
//! The HTTP client is built with automatic redirects disabled, so every
//! `Location` header passes through [`resolve`] and every hop is charged to a
//! [`RedirectState`]. The state is threaded through the fetch loop by value
//! rather than kept as mutable instance state.

use url::Url;

use super::http::FetchError;
use crate::util::absolutize;

/// Maximum redirects followed for a single fetch chain.
pub const MAX_REDIRECTS: u32 = 8;

/// Computes the absolute follow-up URL for a `Location` header.
///
/// Returns `None` when the header is empty. Absolute locations are returned
/// unchanged; relative ones are anchored at the request's scheme and authority.
///
/// # Examples
///
/// ```
/// use newsmill::feed::resolve_redirect;
/// use url::Url;
///
/// let from = Url::parse("https://feeds.example.com/news/rss.xml").unwrap();
/// assert_eq!(resolve_redirect("", &from), None);
/// assert_eq!(
///     resolve_redirect("/news/rss2.xml", &from).as_deref(),
///     Some("https://feeds.example.com/news/rss2.xml")
/// );
/// ```
pub fn resolve(location: &str, request_url: &Url) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    Some(absolutize(location, request_url))
}

/// Hop accounting for one fetch chain.
///
/// Invariant: `hops <= max_hops`. Asking for one more hop than the budget
/// allows is a terminal [`FetchError::RedirectLimitExceeded`], never a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectState {
    original: String,
    hops: u32,
    max_hops: u32,
}

impl RedirectState {
    pub fn new(original: impl Into<String>) -> Self {
        Self::with_limit(original, MAX_REDIRECTS)
    }

    pub fn with_limit(original: impl Into<String>, max_hops: u32) -> Self {
        Self {
            original: original.into(),
            hops: 0,
            max_hops,
        }
    }

    /// The URL the chain started from.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn max_hops(&self) -> u32 {
        self.max_hops
    }

    /// Charges one hop, returning the advanced state.
    pub fn follow(self) -> Result<Self, FetchError> {
        if self.hops >= self.max_hops {
            return Err(FetchError::RedirectLimitExceeded(self.max_hops));
        }
        Ok(Self {
            hops: self.hops + 1,
            ..self
        })
    }
}
