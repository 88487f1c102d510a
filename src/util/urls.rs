use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Matches the opening of an `href`/`src` attribute value in raw page text.
fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"( href=| src=)(['"])"#).expect("static regex"))
}

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("static regex"))
}

/// Returns `scheme://authority` for a URL (port included only when non-default).
///
/// # Examples
///
/// ```
/// use newsmill::util::origin;
/// use url::Url;
///
/// let url = Url::parse("http://example.com:8080/a/b?c").unwrap();
/// assert_eq!(origin(&url), "http://example.com:8080");
/// ```
pub fn origin(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// True when `reference` starts with a URL scheme (`https:`, `mailto:`, `data:` ...).
pub fn has_scheme(reference: &str) -> bool {
    scheme_re().is_match(reference)
}

/// Makes `reference` absolute against the scheme and authority of `base`.
///
/// - already absolute (`scheme:`): returned unchanged
/// - scheme-relative (`//host/x`): `scheme:` prepended
/// - root-relative (`/x`): `scheme://authority` prepended
/// - anything else: `scheme://authority/` prepended
///
/// The base path is ignored; relative references are anchored at the site root.
pub fn absolutize(reference: &str, base: &Url) -> String {
    if has_scheme(reference) {
        reference.to_owned()
    } else if reference.starts_with("//") {
        format!("{}:{}", base.scheme(), reference)
    } else if reference.starts_with('/') {
        format!("{}{}", origin(base), reference)
    } else {
        format!("{}/{}", origin(base), reference)
    }
}

/// Rewrites relative `href=`/`src=` attribute values in raw page text to absolute form.
///
/// Runs on the page source before it is parsed, so every fragment later
/// extracted from the document carries references that resolve outside the
/// original page. Values that already carry a scheme, and fragment-only
/// anchors (`#top`), are left alone.
///
/// # Examples
///
/// ```
/// use newsmill::util::fix_relative_urls;
/// use url::Url;
///
/// let base = Url::parse("https://news.example.com/world/story-1").unwrap();
/// let page = r#"<a href="/world">W</a><img src="//cdn.example.com/x.jpg">"#;
/// assert_eq!(
///     fix_relative_urls(page, &base),
///     r#"<a href="https://news.example.com/world">W</a><img src="https://cdn.example.com/x.jpg">"#
/// );
/// ```
pub fn fix_relative_urls(page: &str, base: &Url) -> String {
    let origin = origin(base);
    let mut out = String::with_capacity(page.len() + page.len() / 16);
    let mut last = 0;

    for m in attribute_re().find_iter(page) {
        out.push_str(&page[last..m.end()]);
        last = m.end();

        let value = &page[m.end()..];
        if has_scheme(value) || value.starts_with('#') {
            continue;
        }

        if value.starts_with("//") {
            out.push_str(base.scheme());
            out.push(':');
        } else if value.starts_with('/') {
            out.push_str(&origin);
        } else {
            out.push_str(&origin);
            out.push('/');
        }
    }

    out.push_str(&page[last..]);
    out
}
