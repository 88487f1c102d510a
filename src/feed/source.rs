//! Source descriptors: everything that differs between publishers.
//!
//! One generic session runs every source; a [`SourceDescriptor`] supplies the
//! index URL scheme, channel metadata and the article extraction rules.
//! Built-in descriptors live in [`SourceRegistry::builtin`]; more can be
//! declared in the configuration file under `[[sources]]`.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::html::AttributeMatch;
use super::http::FetchError;
use super::rules::{
    ArticleRules, CategoryRule, DateFormat, DateRule, EnclosureRule, ExtractionRule,
    ListingRules, Path, SanitizeRules, Step,
};

/// Where a source's index document lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct IndexSpec {
    pub base_url: String,
    /// Appended after the optional section segment (`/rss.xml`).
    pub suffix: String,
    /// The `section` setting is the complete index URL.
    pub section_is_url: bool,
    /// Section used when the settings carry none.
    pub default_section: Option<String>,
    /// Present when the index is an HTML listing page rather than a feed.
    pub listing: Option<ListingRules>,
}

impl IndexSpec {
    /// Builds the index URL for `section`.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] when the source needs a URL and none is
    /// available.
    pub fn url(&self, section: Option<&str>) -> Result<String, FetchError> {
        let section = section
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(self.default_section.as_deref());

        if self.section_is_url {
            return section
                .map(str::to_owned)
                .ok_or_else(|| FetchError::InvalidUrl("no index URL given".to_owned()));
        }

        let mut url = self.base_url.trim_end_matches('/').to_owned();
        if let Some(section) = section {
            url.push('/');
            url.push_str(section.trim_matches('/'));
        }
        url.push_str(&self.suffix);
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub name: String,
    /// Channel `<description>`.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub index: IndexSpec,
    #[serde(default)]
    pub article: ArticleRules,
    /// False for sources whose entries are written straight from the index.
    #[serde(default = "default_full_article")]
    pub full_article: bool,
}

fn default_full_article() -> bool {
    true
}

impl SourceDescriptor {
    pub fn index_url(&self, section: Option<&str>) -> Result<String, FetchError> {
        self.index.url(section)
    }
}

/// Known sources keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceDescriptor>,
}

impl SourceRegistry {
    /// The built-in publishers plus the generic `rss` source.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for source in [bbc(), guardian(), telegraph(), politico(), generic_rss()] {
            registry.insert(source);
        }
        registry
    }

    /// Adds `source`, replacing any existing source with the same id.
    pub fn insert(&mut self, source: SourceDescriptor) {
        if self.sources.contains_key(&source.id) {
            tracing::info!(id = %source.id, "Overriding source definition");
        }
        self.sources.insert(source.id.clone(), source);
    }

    pub fn extend(&mut self, sources: impl IntoIterator<Item = SourceDescriptor>) {
        for source in sources {
            self.insert(source);
        }
    }

    pub fn get(&self, id: &str) -> Option<&SourceDescriptor> {
        self.sources.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn meta(attr: &str, value: &str) -> Step {
    Step::new("meta", AttributeMatch::exact(attr, value))
}

fn meta_content(attr: &str, value: &str) -> ExtractionRule {
    ExtractionRule::attribute(meta(attr, value), "content")
}

fn iso_date(rule: ExtractionRule) -> DateRule {
    DateRule::new(rule, DateFormat::Rfc3339)
}

fn keywords() -> CategoryRule {
    CategoryRule::split(meta_content("name", "keywords"), ",")
}

fn bbc() -> SourceDescriptor {
    SourceDescriptor {
        id: "bbc".into(),
        name: "BBC News".into(),
        description: "News articles from the BBC".into(),
        icon_url: Some(
            "http://static.bbci.co.uk/news/1.207.11915/apple-touch-icon-72x72-precomposed.png".into(),
        ),
        index: IndexSpec {
            base_url: "http://feeds.bbci.co.uk".into(),
            suffix: "/rss.xml".into(),
            default_section: Some("news".into()),
            ..IndexSpec::default()
        },
        article: ArticleRules {
            author: vec![meta_content("property", "article:author")],
            body: vec![Path::from(Step::new(
                "div",
                vec![
                    AttributeMatch::exact("property", "articleBody"),
                    AttributeMatch::exact("class", "main_article_text"),
                    AttributeMatch::exact("id", "story-body"),
                    AttributeMatch::exact("class", "vxp-media__summary"),
                ],
            ))],
            categories: vec![CategoryRule::single(meta_content(
                "property",
                "article:section",
            ))],
            dates: vec![
                DateRule::new(
                    meta_content("property", "rnews:datePublished"),
                    DateFormat::Pattern("%Y/%m/%d %H:%M:%S".into()),
                ),
                DateRule::new(
                    ExtractionRule::attribute(
                        Step::new("div", AttributeMatch::exact("class", "date date--v2")),
                        "data-seconds",
                    ),
                    DateFormat::EpochSeconds,
                ),
            ],
            enclosures: Vec::new(),
            title: vec![
                ExtractionRule::text(Step::new(
                    "h1",
                    AttributeMatch::exact("class", "story-body__h1"),
                )),
                meta_content("property", "og:title"),
            ],
            sanitize: SanitizeRules {
                strip: vec![
                    Step::new("div", AttributeMatch::starts_with("class", "bbccom")),
                    Step::any("link"),
                    Step::any("script"),
                ],
                strip_without_images: vec![
                    Step::new("div", AttributeMatch::contains("class", "ns_datapic")),
                    Step::any("figure"),
                    Step::any("style"),
                ],
                inline_figures: true,
            },
        },
        full_article: true,
    }
}

fn guardian() -> SourceDescriptor {
    SourceDescriptor {
        id: "guardian".into(),
        name: "The Guardian".into(),
        description: "News articles from The Guardian".into(),
        icon_url: Some(
            "https://assets.guim.co.uk/images/favicons/b5050517955e7cf1e493ccc53e64ca05/72x72.png"
                .into(),
        ),
        index: IndexSpec {
            base_url: "https://www.theguardian.com".into(),
            suffix: "/rss".into(),
            ..IndexSpec::default()
        },
        article: ArticleRules {
            author: vec![meta_content("name", "author")],
            body: vec![
                Path::from(Step::new(
                    "div",
                    vec![
                        AttributeMatch::exact("itemprop", "articleBody"),
                        AttributeMatch::exact("data-test-id", "article-review-body"),
                    ],
                )),
                Path::from(Step::new(
                    "div",
                    AttributeMatch::exact("data-link-name", "standfirst"),
                )),
            ],
            categories: vec![keywords()],
            dates: vec![
                iso_date(meta_content("property", "article:modified_time")),
                iso_date(meta_content("property", "article:published_time")),
            ],
            enclosures: vec![EnclosureRule::sources("video"), EnclosureRule::sources("audio")],
            title: vec![meta_content("property", "og:title")],
            sanitize: SanitizeRules {
                strip: vec![
                    Step::any("aside"),
                    Step::new("div", AttributeMatch::starts_with("class", "block-share")),
                    Step::new("div", AttributeMatch::starts_with("id", "share-modal")),
                    Step::any("script"),
                ],
                strip_without_images: vec![Step::any("figure"), Step::any("img")],
                inline_figures: true,
            },
        },
        full_article: true,
    }
}

fn telegraph() -> SourceDescriptor {
    SourceDescriptor {
        id: "telegraph".into(),
        name: "The Telegraph".into(),
        description: "News articles from The Telegraph".into(),
        icon_url: Some(
            "http://www.telegraph.co.uk/etc/designs/telegraph/core/clientlibs/themes/cars/img/favicon/apple-touch-icon-72x72.png"
                .into(),
        ),
        index: IndexSpec {
            base_url: "http://www.telegraph.co.uk".into(),
            suffix: "/rss.xml".into(),
            ..IndexSpec::default()
        },
        article: ArticleRules {
            author: vec![meta_content("name", "DCSext.author")],
            body: vec![Path::from(Step::new(
                "article",
                AttributeMatch::exact("itemprop", "articleBody"),
            ))],
            categories: vec![keywords()],
            dates: vec![
                iso_date(meta_content("itemprop", "dateModified")),
                iso_date(meta_content("itemprop", "datePublished")),
            ],
            enclosures: Vec::new(),
            title: vec![meta_content("property", "og:title")],
            sanitize: SanitizeRules {
                strip: vec![
                    Step::any("aside"),
                    Step::new(
                        "div",
                        vec![
                            AttributeMatch::contains("class", "videoPlayer"),
                            AttributeMatch::contains("class", "advert"),
                            AttributeMatch::exact("class", "apester-media"),
                        ],
                    ),
                    Step::any("script"),
                ],
                strip_without_images: vec![Step::any("figure")],
                inline_figures: true,
            },
        },
        full_article: true,
    }
}

fn politico() -> SourceDescriptor {
    SourceDescriptor {
        id: "politico".into(),
        name: "Politico Europe".into(),
        description: "News articles from Politico Europe".into(),
        icon_url: Some(
            "http://g8fip1kplyr33r3krz5b97d1.wpengine.netdna-cdn.com/wp-content/themes/politico-eu/static/images/favicon/apple-touch-icon-72x72-precomposed.png"
                .into(),
        ),
        index: IndexSpec {
            section_is_url: true,
            default_section: Some("http://www.politico.eu/feed/".into()),
            ..IndexSpec::default()
        },
        article: ArticleRules {
            author: vec![
                ExtractionRule::attribute(
                    Path::new(vec![
                        Step::new("div", AttributeMatch::exact("itemprop", "author")),
                        Step::new("meta", AttributeMatch::exact("itemprop", "name")),
                    ]),
                    "content",
                ),
                ExtractionRule::text(Step::new("a", AttributeMatch::exact("rel", "author"))),
            ],
            body: vec![Path::from(Step::new(
                "div",
                AttributeMatch::starts_with("class", "story-text"),
            ))],
            categories: vec![CategoryRule::every(ExtractionRule::text(Path::new(vec![
                Step::new("ul", AttributeMatch::exact("class", "categories-list")),
                Step::any("a"),
            ])))],
            dates: vec![
                iso_date(ExtractionRule::text(Step::new(
                    "span",
                    AttributeMatch::exact("itemprop", "dateModified"),
                ))),
                iso_date(meta_content("property", "article:modified_time")),
                iso_date(ExtractionRule::attribute(
                    Step::new("time", AttributeMatch::exact("itemprop", "datePublished")),
                    "datetime",
                )),
                iso_date(meta_content("property", "article:published_time")),
            ],
            enclosures: Vec::new(),
            title: vec![meta_content("property", "og:title")],
            sanitize: SanitizeRules {
                strip: vec![
                    Step::any("aside"),
                    Step::new("p", AttributeMatch::contains("class", "")),
                    Step::any("script"),
                ],
                ..SanitizeRules::default()
            },
        },
        full_article: true,
    }
}

/// Any RSS/Atom feed; `section` is the feed URL and entries are written as
/// the feed presents them.
fn generic_rss() -> SourceDescriptor {
    SourceDescriptor {
        id: "rss".into(),
        name: "RSS/Atom feed".into(),
        description: "Articles from an RSS or Atom feed".into(),
        icon_url: None,
        index: IndexSpec {
            section_is_url: true,
            ..IndexSpec::default()
        },
        article: ArticleRules::default(),
        full_article: false,
    }
}
