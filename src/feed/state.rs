//! Session status and the pure decisions that drive the pipeline loop.
//!
//! Everything here is free of I/O so each transition can be tested without a
//! runtime or a network.

use super::article::ArticleRecord;
use super::http::FetchError;
use super::settings::FetchSettings;

/// Lifecycle of a feed session or article fetch.
///
/// `Idle → Active → {Ready | Error | Canceled}`. A terminal state may be
/// restarted; an `Active` one may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    Ready,
    Error,
    Canceled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Error | SessionState::Canceled
        )
    }

    /// The state after a start request, or `None` if one is already running.
    pub fn begin(self) -> Option<SessionState> {
        match self {
            SessionState::Active => None,
            _ => Some(SessionState::Active),
        }
    }

    /// The terminal state for `outcome`, or `None` unless currently `Active`.
    ///
    /// Only one transition out of `Active` is ever produced.
    pub fn finish<T>(self, outcome: &Result<T, FetchError>) -> Option<SessionState> {
        if self != SessionState::Active {
            return None;
        }
        Some(match outcome {
            Ok(_) => SessionState::Ready,
            Err(e) if e.is_canceled() => SessionState::Canceled,
            Err(_) => SessionState::Error,
        })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
            SessionState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Why the article loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    LimitReached,
    /// The current article is not newer than the watermark.
    NotNewer,
}

/// What to do with the next channel article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stop(StopReason),
    /// Write the channel entry as-is.
    WriteDirect,
    /// Fetch the article page and overlay its fields on the channel entry.
    FetchFull,
}

/// Decides the next step of the article loop. The first matching stop
/// condition wins.
pub fn classify(
    candidate: Option<&ArticleRecord>,
    written: usize,
    settings: &FetchSettings,
    full_article: bool,
) -> Action {
    let Some(article) = candidate else {
        return Action::Stop(StopReason::Exhausted);
    };
    if written >= settings.max_results {
        return Action::Stop(StopReason::LimitReached);
    }
    if !settings.is_newer(article.date) {
        return Action::Stop(StopReason::NotNewer);
    }
    if full_article && settings.fetch_full_article {
        Action::FetchFull
    } else {
        Action::WriteDirect
    }
}
