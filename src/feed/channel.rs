use std::collections::VecDeque;

use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;

use super::article::{ArticleRecord, Enclosure};
use super::rules::ListingRules;
use crate::util::strip_control_chars;

/// Cursor over a source index: an RSS/Atom document or an HTML listing page.
///
/// Usage mirrors a pull parser: [`set_content`](Self::set_content), then
/// [`read_channel`](Self::read_channel) (or [`read_listing`](Self::read_listing)),
/// then [`read_next_article`](Self::read_next_article) until it returns
/// `false`, reading the current entry through [`article`](Self::article).
#[derive(Debug, Default)]
pub struct ChannelReader {
    content: Vec<u8>,
    title: String,
    link: String,
    description: String,
    pending: VecDeque<ArticleRecord>,
    current: Option<ArticleRecord>,
    error: String,
}

impl ChannelReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the document and resets the cursor.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        *self = Self {
            content: content.into(),
            ..Self::default()
        };
    }

    /// Parses the content as an RSS/Atom feed.
    ///
    /// Returns `false` and records an error string when the content is not a
    /// feed.
    pub fn read_channel(&mut self) -> bool {
        match parser::parse(self.content.as_slice()) {
            Ok(feed) => {
                self.load_feed(feed);
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Index is not a feed");
                self.error = format!("Unable to parse channel: {e}");
                false
            }
        }
    }

    /// Reads the content as an HTML listing page served from `page_url`.
    ///
    /// Relative links should already have been made absolute. A page without
    /// any entries still counts as a channel.
    pub fn read_listing(&mut self, rules: &ListingRules, page_url: &str) -> bool {
        let page = String::from_utf8_lossy(&self.content);
        if page.trim().is_empty() {
            self.error = "Unable to parse channel: empty listing page".to_owned();
            return false;
        }

        let (title, entries) = rules.read(&page);
        self.title = title;
        self.link = page_url.to_owned();
        self.pending = entries.into();
        self.error.clear();
        true
    }

    /// Advances to the next article. Returns `false` once the channel is
    /// exhausted.
    pub fn read_next_article(&mut self) -> bool {
        self.current = self.pending.pop_front();
        self.current.is_some()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The current article, or `None` before the first
    /// [`read_next_article`](Self::read_next_article) or after exhaustion.
    pub fn article(&self) -> Option<&ArticleRecord> {
        self.current.as_ref()
    }

    pub fn error_string(&self) -> &str {
        &self.error
    }

    fn load_feed(&mut self, feed: Feed) {
        self.title = feed
            .title
            .map(|t| clean(&t.content))
            .unwrap_or_default();
        self.link = page_link(&feed.links).unwrap_or_default();
        self.description = feed
            .description
            .map(|t| clean(&t.content))
            .unwrap_or_default();
        self.pending = feed.entries.into_iter().map(entry_record).collect();
        self.error.clear();
    }
}

fn clean(s: &str) -> String {
    strip_control_chars(s.trim()).into_owned()
}

/// First link that points at the page itself rather than an enclosure,
/// a self-reference or similar.
fn page_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_owned())
}

fn entry_record(entry: Entry) -> ArticleRecord {
    let mut enclosures: Vec<Enclosure> = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| Enclosure {
            url: l.href.clone(),
            mime_type: l.media_type.clone().unwrap_or_default(),
        })
        .collect();
    enclosures.extend(entry.media.iter().flat_map(|m| &m.content).filter_map(|c| {
        Some(Enclosure {
            url: c.url.as_ref()?.to_string(),
            mime_type: c
                .content_type
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_default(),
        })
    }));
    enclosures.dedup_by(|a, b| a.url == b.url);

    let body = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .map(|b| clean(&b))
        .unwrap_or_default();

    ArticleRecord {
        author: entry
            .authors
            .iter()
            .map(|p| clean(&p.name))
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        body,
        categories: entry
            .categories
            .iter()
            .map(|c| clean(&c.term))
            .filter(|c| !c.is_empty())
            .collect(),
        date: entry.published.or(entry.updated),
        enclosures,
        title: entry.title.map(|t| clean(&t.content)).unwrap_or_default(),
        url: page_link(&entry.links).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::html::AttributeMatch;
    use crate::feed::rules::{ExtractionRule, Step};
    use chrono::{TimeZone, Utc};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News - World</title>
    <link>https://news.example.com/world</link>
    <description>World news</description>
    <item>
      <title>First story</title>
      <link>https://news.example.com/world/1</link>
      <description>Summary one</description>
      <category>World</category>
      <category>Europe</category>
      <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
      <enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg" length="100"/>
    </item>
    <item>
      <title>Second story</title>
      <link>https://news.example.com/world/2</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_read_rss_channel() {
        let mut reader = ChannelReader::new();
        reader.set_content(RSS);
        assert!(reader.read_channel());
        assert_eq!(reader.title(), "Example News - World");
        assert_eq!(reader.link(), "https://news.example.com/world");
        assert_eq!(reader.description(), "World news");
        assert!(reader.article().is_none());

        assert!(reader.read_next_article());
        let first = reader.article().unwrap();
        assert_eq!(first.title, "First story");
        assert_eq!(first.url, "https://news.example.com/world/1");
        assert_eq!(first.body, "Summary one");
        assert_eq!(first.categories, vec!["World", "Europe"]);
        assert_eq!(
            first.date,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap())
        );
        assert_eq!(first.enclosures.len(), 1);
        assert_eq!(first.enclosures[0].url, "https://cdn.example.com/1.mp3");

        assert!(reader.read_next_article());
        let second = reader.article().unwrap();
        assert_eq!(second.title, "Second story");
        assert_eq!(second.date, None);

        assert!(!reader.read_next_article());
        assert!(reader.article().is_none());
    }

    #[test]
    fn test_read_atom_channel() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <link rel="self" href="https://example.org/feed.atom"/>
  <link rel="alternate" href="https://example.org/"/>
  <id>urn:example</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <id>urn:example:1</id>
    <link rel="alternate" href="https://example.org/1"/>
    <updated>2024-01-03T00:00:00Z</updated>
    <author><name>Sam</name></author>
  </entry>
</feed>"#;
        let mut reader = ChannelReader::new();
        reader.set_content(atom);
        assert!(reader.read_channel());
        assert_eq!(reader.link(), "https://example.org/");
        assert!(reader.read_next_article());
        let entry = reader.article().unwrap();
        assert_eq!(entry.url, "https://example.org/1");
        assert_eq!(entry.author, "Sam");
        assert!(entry.date.is_some());
    }

    #[test]
    fn test_unparsable_channel() {
        let mut reader = ChannelReader::new();
        reader.set_content("<html><body>not a feed</body></html>");
        assert!(!reader.read_channel());
        assert!(!reader.error_string().is_empty());
        assert!(!reader.read_next_article());
    }

    #[test]
    fn test_set_content_resets_cursor() {
        let mut reader = ChannelReader::new();
        reader.set_content(RSS);
        assert!(reader.read_channel());
        assert!(reader.read_next_article());

        reader.set_content(Vec::<u8>::new());
        assert!(reader.article().is_none());
        assert_eq!(reader.title(), "");
        assert!(!reader.read_next_article());
    }

    #[test]
    fn test_read_listing() {
        let page = r#"<html><head><title>Latest</title></head><body>
<li class="story"><a href="https://example.com/a">A</a></li>
<li class="story"><a href="https://example.com/b">B</a></li>
</body></html>"#;
        let rules = ListingRules {
            item: Step::new("li", AttributeMatch::exact("class", "story")).into(),
            link: ExtractionRule::attribute(Step::any("a"), "href"),
            title: ExtractionRule::text(Step::any("a")),
            date: None,
            description: None,
            author: None,
        };

        let mut reader = ChannelReader::new();
        reader.set_content(page);
        assert!(reader.read_listing(&rules, "https://example.com/latest"));
        assert_eq!(reader.title(), "Latest");
        assert_eq!(reader.link(), "https://example.com/latest");
        assert!(reader.read_next_article());
        assert_eq!(reader.article().unwrap().url, "https://example.com/a");
        assert!(reader.read_next_article());
        assert!(!reader.read_next_article());
    }
}
