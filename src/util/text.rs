use std::borrow::Cow;

/// The five predefined XML entities, in the order they are replaced.
///
/// `&amp;` goes first so that `&amp;lt;` decodes to the literal text `&lt;`
/// in a single pass rather than collapsing to `<`.
const ENTITIES: [(&str, &str); 5] = [
    ("&amp;", "&"),
    ("&apos;", "'"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
];

/// Decodes the predefined XML entities in a title or similar short field.
///
/// Titles are written back out inside CDATA, where entities would be shown
/// verbatim. Numeric character references are left untouched.
///
/// # Examples
///
/// ```
/// use newsmill::util::unescape_entities;
///
/// assert_eq!(unescape_entities("Tom &amp; Jerry"), "Tom & Jerry");
/// assert_eq!(unescape_entities("plain"), "plain");
/// ```
pub fn unescape_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        match ENTITIES
            .iter()
            .find(|(entity, _)| tail.starts_with(entity))
        {
            Some((entity, replacement)) => {
                out.push_str(replacement);
                rest = &tail[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// Strips C0 control characters (except tab, newline, carriage return) and DEL.
///
/// Raw control bytes are not legal in XML 1.0 output.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
///
/// # Examples
///
/// ```
/// use newsmill::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("a\u{0}b\u{7f}c"), "abc");
/// assert_eq!(strip_control_chars("line\nbreak"), "line\nbreak");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_stripped = |c: char| c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.chars().filter(|&c| !is_stripped(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_all_predefined() {
        assert_eq!(
            unescape_entities("&lt;b&gt; &quot;x&quot; &apos;y&apos; &amp;"),
            "<b> \"x\" 'y' &"
        );
    }

    #[test]
    fn test_unescape_is_single_pass() {
        assert_eq!(unescape_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_unescape_leaves_unknown_entities() {
        assert_eq!(unescape_entities("&nbsp;&#8217;"), "&nbsp;&#8217;");
        assert_eq!(unescape_entities("AT&T"), "AT&T");
    }

    #[test]
    fn test_unescape_borrows_when_clean() {
        assert!(matches!(unescape_entities("no entities"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("\u{1b}[31mred"), "[31mred");
        assert_eq!(strip_control_chars("tab\tok"), "tab\tok");
        assert!(matches!(strip_control_chars("clean"), Cow::Borrowed(_)));
    }
}
