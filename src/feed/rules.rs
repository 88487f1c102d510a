//! Declarative extraction rules.
//!
//! A source describes *where* each article field lives on its pages as plain
//! data: a [`Path`] of `(tag, attribute-query)` steps plus a [`ValueSource`]
//! saying what to read from the element found. Several rules for the same
//! field are tried in order until one yields a non-empty value.
//!
//! All functions here are synchronous; they parse a page into a
//! [`Document`](super::html::Document), query it, and return owned results.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use super::article::{ArticleRecord, Enclosure};
use super::html::{AttributeQuery, Document, Element};
use crate::util::strip_control_chars;

/// One hop of a [`Path`]: the first (or every) descendant named `tag`
/// satisfying `query`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Step {
    pub tag: String,
    #[serde(default)]
    pub query: AttributeQuery,
}

impl Step {
    pub fn new(tag: &str, query: impl Into<AttributeQuery>) -> Self {
        Self {
            tag: tag.to_owned(),
            query: query.into(),
        }
    }

    /// Matches any element named `tag`.
    pub fn any(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            query: AttributeQuery::Any,
        }
    }
}

/// A chain of steps, each searched within the previous step's result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<Step>);

impl Path {
    pub fn new(steps: Vec<Step>) -> Self {
        Self(steps)
    }

    /// Follows the first match at every step.
    pub fn locate<'a>(&self, root: Element<'a>) -> Option<Element<'a>> {
        self.0
            .iter()
            .try_fold(root, |scope, step| scope.first_element_by_tag(&step.tag, &step.query))
    }

    /// Follows every match at every step, in document order.
    pub fn locate_all<'a>(&self, root: Element<'a>) -> Vec<Element<'a>> {
        self.0.iter().fold(vec![root], |scopes, step| {
            scopes
                .iter()
                .flat_map(|scope| scope.elements_by_tag(&step.tag, &step.query))
                .collect()
        })
    }
}

impl From<Step> for Path {
    fn from(step: Step) -> Self {
        Path(vec![step])
    }
}

/// What to read from a located element.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Whitespace-collapsed text content.
    #[default]
    Text,
    /// Serialized markup, tags included.
    Html,
    Attribute(String),
}

impl ValueSource {
    fn read(&self, element: &Element<'_>) -> Option<String> {
        let value = match self {
            ValueSource::Text => element.text(),
            ValueSource::Html => element.outer_html(),
            ValueSource::Attribute(name) => element.attribute(name)?.to_owned(),
        };
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(strip_control_chars(value).into_owned())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractionRule {
    pub path: Path,
    #[serde(default)]
    pub value: ValueSource,
}

impl ExtractionRule {
    pub fn text(path: impl Into<Path>) -> Self {
        Self {
            path: path.into(),
            value: ValueSource::Text,
        }
    }

    pub fn attribute(path: impl Into<Path>, name: &str) -> Self {
        Self {
            path: path.into(),
            value: ValueSource::Attribute(name.to_owned()),
        }
    }

    /// Non-empty trimmed value of the first located element.
    pub fn extract(&self, root: Element<'_>) -> Option<String> {
        self.path.locate(root).and_then(|el| self.value.read(&el))
    }

    fn extract_all(&self, root: Element<'_>) -> Vec<String> {
        self.path
            .locate_all(root)
            .iter()
            .filter_map(|el| self.value.read(el))
            .collect()
    }
}

/// First non-empty value among `rules`.
fn first_value(rules: &[ExtractionRule], root: Element<'_>) -> Option<String> {
    rules.iter().find_map(|rule| rule.extract(root))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRule {
    pub rule: ExtractionRule,
    /// Read every match instead of only the first.
    #[serde(default)]
    pub all: bool,
    /// Split each value on this separator (e.g. `,` for `meta name=keywords`).
    #[serde(default)]
    pub separator: Option<String>,
}

impl CategoryRule {
    pub fn single(rule: ExtractionRule) -> Self {
        Self {
            rule,
            all: false,
            separator: None,
        }
    }

    pub fn every(rule: ExtractionRule) -> Self {
        Self {
            rule,
            all: true,
            separator: None,
        }
    }

    pub fn split(rule: ExtractionRule, separator: &str) -> Self {
        Self {
            rule,
            all: false,
            separator: Some(separator.to_owned()),
        }
    }

    fn extract(&self, root: Element<'_>) -> Vec<String> {
        let values = if self.all {
            self.rule.extract_all(root)
        } else {
            self.rule.extract(root).into_iter().collect()
        };

        match self.separator.as_deref() {
            Some(sep) if !sep.is_empty() => values
                .iter()
                .flat_map(|v| v.split(sep))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            _ => values,
        }
    }
}

/// How a date string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFormat {
    /// ISO-8601 / RFC 3339; a missing offset is taken as UTC.
    #[default]
    Rfc3339,
    /// A `chrono` strftime pattern, interpreted as UTC.
    Pattern(String),
    EpochSeconds,
}

impl DateFormat {
    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        match self {
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(value)
                .map(|d| d.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            DateFormat::Pattern(pattern) => NaiveDateTime::parse_from_str(value, pattern)
                .ok()
                .map(|naive| naive.and_utc()),
            DateFormat::EpochSeconds => value
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DateRule {
    pub rule: ExtractionRule,
    #[serde(default)]
    pub format: DateFormat,
}

impl DateRule {
    pub fn new(rule: ExtractionRule, format: DateFormat) -> Self {
        Self { rule, format }
    }

    pub fn extract(&self, root: Element<'_>) -> Option<DateTime<Utc>> {
        self.rule
            .extract(root)
            .and_then(|value| self.format.parse(&value))
    }
}

/// Media enclosures, e.g. every `video > source`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnclosureRule {
    pub path: Path,
    #[serde(default = "default_url_attribute")]
    pub url_attribute: String,
    #[serde(default = "default_type_attribute")]
    pub type_attribute: String,
    /// Used when the element carries no type attribute.
    #[serde(default)]
    pub mime_type: Option<String>,
}

fn default_url_attribute() -> String {
    "src".to_owned()
}

fn default_type_attribute() -> String {
    "type".to_owned()
}

impl EnclosureRule {
    pub fn sources(container: &str) -> Self {
        Self {
            path: Path::new(vec![Step::any(container), Step::any("source")]),
            url_attribute: default_url_attribute(),
            type_attribute: default_type_attribute(),
            mime_type: None,
        }
    }

    fn extract(&self, root: Element<'_>) -> Vec<Enclosure> {
        self.path
            .locate_all(root)
            .iter()
            .filter_map(|el| {
                let url = el.attribute(&self.url_attribute)?.trim();
                if url.is_empty() {
                    return None;
                }
                let mime_type = el
                    .attribute(&self.type_attribute)
                    .map(str::to_owned)
                    .or_else(|| self.mime_type.clone())
                    .unwrap_or_default();
                Some(Enclosure {
                    url: url.to_owned(),
                    mime_type,
                })
            })
            .collect()
    }
}

/// Body clean-up applied to the located body element's markup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SanitizeRules {
    /// Always removed (scripts, styles, adverts, share widgets).
    pub strip: Vec<Step>,
    /// Removed when images are not wanted.
    pub strip_without_images: Vec<Step>,
    /// When images are wanted, replace each `<figure>` with its first `<img>`.
    pub inline_figures: bool,
}

impl Default for SanitizeRules {
    fn default() -> Self {
        Self {
            strip: vec![Step::any("script"), Step::any("style"), Step::any("link")],
            strip_without_images: vec![
                Step::any("figure"),
                Step::any("figcaption"),
                Step::any("img"),
            ],
            inline_figures: true,
        }
    }
}

impl SanitizeRules {
    pub fn apply(&self, body: Element<'_>, include_images: bool) -> String {
        let mut html = body.outer_html();

        if include_images {
            if self.inline_figures {
                for figure in body.elements_by_tag("figure", &AttributeQuery::Any) {
                    let image = figure
                        .first_element_by_tag("img", &AttributeQuery::Any)
                        .map(|img| img.outer_html())
                        .unwrap_or_default();
                    replace_first(&mut html, &figure.outer_html(), &image);
                }
            }
        } else {
            remove_matching(&mut html, body, &self.strip_without_images);
        }
        remove_matching(&mut html, body, &self.strip);

        strip_control_chars(&html).into_owned()
    }
}

fn remove_matching(html: &mut String, body: Element<'_>, steps: &[Step]) {
    for step in steps {
        for el in body.elements_by_tag(&step.tag, &step.query) {
            replace_first(html, &el.outer_html(), "");
        }
    }
}

/// Replaces the first occurrence of `needle`; nested matches already removed
/// with their parent are silently skipped.
fn replace_first(haystack: &mut String, needle: &str, replacement: &str) {
    if needle.is_empty() {
        return;
    }
    if let Some(pos) = haystack.find(needle) {
        haystack.replace_range(pos..pos + needle.len(), replacement);
    }
}

/// Field rules for a source's article pages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ArticleRules {
    pub author: Vec<ExtractionRule>,
    /// Candidate body containers, tried in order.
    pub body: Vec<Path>,
    /// The first rule producing any category wins.
    pub categories: Vec<CategoryRule>,
    pub dates: Vec<DateRule>,
    /// All rules contribute.
    pub enclosures: Vec<EnclosureRule>,
    pub title: Vec<ExtractionRule>,
    pub sanitize: SanitizeRules,
}

impl ArticleRules {
    /// Extracts every field from an article page.
    ///
    /// Missing fields are left empty so the caller can fall back to channel
    /// values field by field. `url` is never set here.
    pub fn extract(&self, page: &str, include_images: bool) -> ArticleRecord {
        let document = Document::parse(page);
        let root = document.root();

        let body = self
            .body
            .iter()
            .find_map(|path| path.locate(root))
            .map(|el| self.sanitize.apply(el, include_images))
            .unwrap_or_default();

        ArticleRecord {
            author: first_value(&self.author, root).unwrap_or_default(),
            body,
            categories: self
                .categories
                .iter()
                .map(|rule| rule.extract(root))
                .find(|c| !c.is_empty())
                .unwrap_or_default(),
            date: self.dates.iter().find_map(|rule| rule.extract(root)),
            enclosures: self
                .enclosures
                .iter()
                .flat_map(|rule| rule.extract(root))
                .collect(),
            title: first_value(&self.title, root).unwrap_or_default(),
            url: String::new(),
        }
    }
}

/// Rules for an HTML listing page used as a source index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListingRules {
    /// Every match is one article entry.
    pub item: Path,
    /// Relative to the item; read as an absolute URL after link fix-up.
    pub link: ExtractionRule,
    pub title: ExtractionRule,
    #[serde(default)]
    pub date: Option<DateRule>,
    #[serde(default)]
    pub description: Option<ExtractionRule>,
    #[serde(default)]
    pub author: Option<ExtractionRule>,
}

impl ListingRules {
    /// Page title and entries, in document order. Entries without a link are
    /// dropped.
    pub fn read(&self, page: &str) -> (String, Vec<ArticleRecord>) {
        let document = Document::parse(page);
        let root = document.root();

        let page_title = root
            .first_element_by_tag("title", &AttributeQuery::Any)
            .map(|el| el.text())
            .unwrap_or_default();

        let entries = self
            .item
            .locate_all(root)
            .into_iter()
            .filter_map(|item| {
                let url = self.link.extract(item)?;
                Some(ArticleRecord {
                    author: self
                        .author
                        .as_ref()
                        .and_then(|r| r.extract(item))
                        .unwrap_or_default(),
                    body: self
                        .description
                        .as_ref()
                        .and_then(|r| r.extract(item))
                        .unwrap_or_default(),
                    categories: Vec::new(),
                    date: self.date.as_ref().and_then(|r| r.extract(item)),
                    enclosures: Vec::new(),
                    title: self.title.extract(item).unwrap_or_default(),
                    url,
                })
            })
            .collect();

        (page_title, entries)
    }
}
