//! Utility functions shared by the scrape pipeline and the disk cache.
//!
//! - **Text processing**: entity unescaping and control-character stripping
//!   for strings lifted out of untrusted feeds and pages
//! - **URL handling**: absolutizing references against a response's origin
//!
//! # Examples
//!
//! ```
//! use newsmill::util::{absolutize, unescape_entities};
//! use url::Url;
//!
//! let base = Url::parse("https://example.com/news/story").unwrap();
//! assert_eq!(absolutize("/img/a.png", &base), "https://example.com/img/a.png");
//! assert_eq!(unescape_entities("Q&amp;A"), "Q&A");
//! ```

mod text;
mod urls;

pub use text::{strip_control_chars, unescape_entities};
pub use urls::{absolutize, fix_relative_urls, has_scheme, origin};
