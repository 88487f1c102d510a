use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// Default cap on items written per session.
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Per-invocation settings for one feed session.
///
/// Built from a freeform key/value bag ([`FetchSettings::from_map`]) or
/// deserialized directly. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchSettings {
    /// Source-specific category selector (a path segment, or a full URL for
    /// URL-indexed sources).
    pub section: Option<String>,
    /// Exclusive lower bound on article dates.
    pub last_updated: Option<DateTime<Utc>>,
    pub max_results: usize,
    pub include_images: bool,
    pub fetch_full_article: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            section: None,
            last_updated: None,
            max_results: DEFAULT_MAX_RESULTS,
            include_images: false,
            fetch_full_article: true,
        }
    }
}

impl FetchSettings {
    /// Reads the recognized keys from a settings bag.
    ///
    /// Values that fail to parse are logged and replaced by their default.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut settings = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "section" => {
                    let value = value.trim();
                    settings.section = (!value.is_empty()).then(|| value.to_owned());
                }
                "lastUpdated" => match parse_timestamp(value) {
                    Some(ts) => settings.last_updated = Some(ts),
                    None if value.trim().is_empty() => {}
                    None => tracing::warn!(value = %value, "Ignoring unparsable lastUpdated"),
                },
                "maxResults" => match value.trim().parse() {
                    Ok(n) => settings.max_results = n,
                    Err(_) => tracing::warn!(value = %value, "Ignoring unparsable maxResults"),
                },
                "includeImages" => match parse_bool(value) {
                    Some(b) => settings.include_images = b,
                    None => tracing::warn!(value = %value, "Ignoring unparsable includeImages"),
                },
                "fetchFullArticle" => match parse_bool(value) {
                    Some(b) => settings.fetch_full_article = b,
                    None => tracing::warn!(value = %value, "Ignoring unparsable fetchFullArticle"),
                },
                _ => tracing::trace!(key = %key, "Ignoring unknown setting"),
            }
        }

        settings
    }

    /// True when `date` lies strictly after the watermark.
    ///
    /// An article without a date is never newer, so it stops the session
    /// rather than slipping past the watermark.
    pub fn is_newer(&self, date: Option<DateTime<Utc>>) -> bool {
        match (date, self.last_updated) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(date), Some(watermark)) => date > watermark,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// RFC 3339, offset-less ISO-8601 (UTC), or epoch seconds.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|n| n.and_utc())
        })
        .or_else(|| {
            value
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        })
}
