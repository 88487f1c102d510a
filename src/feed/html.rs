//! Tag-and-attribute queries over a parsed HTML document.
//!
//! Publisher pages are located with declarative `(tag, attribute-match)`
//! queries rather than CSS selectors, so a source's rules can be written as
//! plain data (see [`super::rules`]). Matching compares the *whole* attribute
//! value: `class="story-body"` does not match `class="story-body wide"` under
//! [`MatchMode::Exact`].
//!
//! [`Document`] wraps `scraper::Html`, which is not `Send`; parse, query and
//! drop it inside synchronous code, never across an `.await`.

use scraper::{ElementRef, Html};
use serde::Deserialize;

/// How an attribute value is compared against the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    StartsWith,
    Contains,
}

/// A single `name <mode> value` attribute constraint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttributeMatch {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub mode: MatchMode,
}

impl AttributeMatch {
    pub fn exact(name: &str, value: &str) -> Self {
        Self::with_mode(name, value, MatchMode::Exact)
    }

    pub fn starts_with(name: &str, value: &str) -> Self {
        Self::with_mode(name, value, MatchMode::StartsWith)
    }

    pub fn contains(name: &str, value: &str) -> Self {
        Self::with_mode(name, value, MatchMode::Contains)
    }

    fn with_mode(name: &str, value: &str, mode: MatchMode) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
            mode,
        }
    }

    fn matches(&self, element: &scraper::node::Element) -> bool {
        let Some(actual) = element.attr(&self.name) else {
            return false;
        };
        match self.mode {
            MatchMode::Exact => actual == self.value,
            MatchMode::StartsWith => actual.starts_with(&self.value),
            MatchMode::Contains => actual.contains(&self.value),
        }
    }
}

/// Attribute constraint for a tag query.
///
/// Deserializes from nothing (`Any`), a single table (`One`), or an array of
/// tables (`AnyOf`, satisfied when at least one entry matches).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(untagged)]
pub enum AttributeQuery {
    #[default]
    Any,
    One(AttributeMatch),
    AnyOf(Vec<AttributeMatch>),
}

impl AttributeQuery {
    fn matches(&self, element: &scraper::node::Element) -> bool {
        match self {
            AttributeQuery::Any => true,
            AttributeQuery::One(m) => m.matches(element),
            AttributeQuery::AnyOf(ms) => ms.iter().any(|m| m.matches(element)),
        }
    }
}

impl From<AttributeMatch> for AttributeQuery {
    fn from(m: AttributeMatch) -> Self {
        AttributeQuery::One(m)
    }
}

impl From<Vec<AttributeMatch>> for AttributeQuery {
    fn from(ms: Vec<AttributeMatch>) -> Self {
        AttributeQuery::AnyOf(ms)
    }
}

/// A parsed HTML page.
pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
        }
    }

    /// The `<html>` element.
    pub fn root(&self) -> Element<'_> {
        Element(self.html.root_element())
    }
}

/// A borrowed element within a [`Document`].
#[derive(Debug, Clone, Copy)]
pub struct Element<'a>(ElementRef<'a>);

impl<'a> Element<'a> {
    /// First descendant (document order) named `tag` that satisfies `query`.
    pub fn first_element_by_tag(&self, tag: &str, query: &AttributeQuery) -> Option<Element<'a>> {
        self.descendants_matching(tag, query).next()
    }

    /// All descendants named `tag` that satisfy `query`, in document order.
    pub fn elements_by_tag(&self, tag: &str, query: &AttributeQuery) -> Vec<Element<'a>> {
        self.descendants_matching(tag, query).collect()
    }

    fn descendants_matching<'q>(
        &self,
        tag: &'q str,
        query: &'q AttributeQuery,
    ) -> impl Iterator<Item = Element<'a>> + 'q
    where
        'a: 'q,
    {
        self.0
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(move |el| {
                el.value().name().eq_ignore_ascii_case(tag) && query.matches(el.value())
            })
            .map(Element)
    }

    pub fn name(&self) -> &'a str {
        self.0.value().name()
    }

    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.0.value().attr(name)
    }

    /// Concatenated text content, whitespace-collapsed.
    pub fn text(&self) -> String {
        self.0
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Serialized markup of this element, including its own tags.
    pub fn outer_html(&self) -> String {
        self.0.html()
    }

    pub fn inner_html(&self) -> String {
        self.0.inner_html()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head>
  <meta property="og:title" content="Big &amp; Bold">
  <meta name="keywords" content="world, politics">
</head><body>
  <div class="story-body wide" id="main">
    <p class="lead">First <b>para</b></p>
    <div class="bbccom_advert">ad</div>
    <p>Second   para</p>
  </div>
  <div property="articleBody">alt body</div>
</body></html>"#;

    #[test]
    fn test_exact_match_compares_whole_value() {
        let doc = Document::parse(PAGE);
        let root = doc.root();
        let exact: AttributeQuery = AttributeMatch::exact("class", "story-body").into();
        assert!(root.first_element_by_tag("div", &exact).is_none());

        let exact: AttributeQuery = AttributeMatch::exact("class", "story-body wide").into();
        assert_eq!(
            root.first_element_by_tag("div", &exact)
                .and_then(|e| e.attribute("id")),
            Some("main")
        );
    }

    #[test]
    fn test_starts_with_and_contains() {
        let doc = Document::parse(PAGE);
        let root = doc.root();
        let ad: AttributeQuery = AttributeMatch::starts_with("class", "bbccom").into();
        assert_eq!(root.elements_by_tag("div", &ad).len(), 1);

        let wide: AttributeQuery = AttributeMatch::contains("class", "wide").into();
        assert!(root.first_element_by_tag("div", &wide).is_some());
    }

    #[test]
    fn test_any_of_takes_first_in_document_order() {
        let doc = Document::parse(PAGE);
        let query: AttributeQuery = vec![
            AttributeMatch::exact("property", "articleBody"),
            AttributeMatch::exact("id", "main"),
        ]
        .into();
        let found = doc.root().first_element_by_tag("div", &query).unwrap();
        assert_eq!(found.attribute("id"), Some("main"));
    }

    #[test]
    fn test_attribute_and_text() {
        let doc = Document::parse(PAGE);
        let root = doc.root();
        let title = root
            .first_element_by_tag("meta", &AttributeMatch::exact("property", "og:title").into())
            .unwrap();
        assert_eq!(title.attribute("content"), Some("Big & Bold"));

        let lead = root
            .first_element_by_tag("p", &AttributeMatch::exact("class", "lead").into())
            .unwrap();
        assert_eq!(lead.text(), "First para");
        assert!(lead.outer_html().starts_with("<p class=\"lead\">"));
    }

    #[test]
    fn test_search_excludes_self() {
        let doc = Document::parse(PAGE);
        let body = doc
            .root()
            .first_element_by_tag("div", &AttributeMatch::exact("id", "main").into())
            .unwrap();
        let nested = body.elements_by_tag("div", &AttributeQuery::Any);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].text(), "ad");
    }

    #[test]
    fn test_query_deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(default)]
            query: AttributeQuery,
        }

        let one: Wrapper = toml::from_str(
            r#"query = { name = "class", value = "story", mode = "starts_with" }"#,
        )
        .unwrap();
        assert_eq!(
            one.query,
            AttributeQuery::One(AttributeMatch::starts_with("class", "story"))
        );

        let many: Wrapper = toml::from_str(
            r#"query = [{ name = "id", value = "a" }, { name = "id", value = "b" }]"#,
        )
        .unwrap();
        assert!(matches!(many.query, AttributeQuery::AnyOf(ref v) if v.len() == 2));

        let none: Wrapper = toml::from_str("").unwrap();
        assert_eq!(none.query, AttributeQuery::Any);
    }
}
