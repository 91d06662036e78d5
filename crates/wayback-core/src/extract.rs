//! Plain-text and URL extraction for incoming messages.

use std::{collections::HashSet, sync::OnceLock};

use regex::Regex;
use scraper::{node::Node, Html};
use url::Url;

/// Flatten an HTML message body into plain text.
///
/// Text nodes are concatenated in document order (each trimmed of leading and
/// trailing CR/LF), `<br>` becomes `\n`, all other markup is dropped. The
/// html5ever parser recovers from malformed markup instead of failing, so a
/// body without markup only gets the same CR/LF trim.
pub fn text_content(body: &str) -> String {
    if !body.contains('<') && !body.contains('&') {
        return trim_newlines(body).to_string();
    }

    let fragment = Html::parse_fragment(body);
    let mut out = String::with_capacity(body.len());
    for node in fragment.tree.root().descendants() {
        match node.value() {
            Node::Text(text) => {
                out.push_str(trim_newlines(text));
            }
            Node::Element(el) if el.name().eq_ignore_ascii_case("br") => out.push('\n'),
            _ => {}
        }
    }
    out
}

fn trim_newlines(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\r' || c == '\n')
}

fn scheme_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bhttps?://[^\s<>"'`]+"#).expect("valid regex"))
}

fn bare_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}(?::\d{1,5})?(?:/[^\s<>"'`]*)?"#,
        )
        .expect("valid regex")
    })
}

/// Find URLs in free text.
///
/// Scheme-qualified `http(s)` URLs win; only when there are none does the
/// bare-domain form (`example.com/page`) count, normalised to `http://`.
/// Handles and e-mail addresses are skipped. Order is preserved and
/// duplicates are dropped.
pub fn match_urls(text: &str) -> Vec<String> {
    let found = scheme_urls(text);
    if !found.is_empty() {
        return found;
    }
    bare_domain_urls(text)
}

fn scheme_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    scheme_url_re()
        .find_iter(text)
        .filter_map(|m| validate(trim_trailing(m.as_str())))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn bare_domain_urls(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for m in bare_domain_re().find_iter(text) {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        // `@alice@example.social` and `alice@example.com` are not links.
        if matches!(before, Some('@' | '.' | '-' | '/' | ':')) || after == Some('@') {
            continue;
        }

        let candidate = format!("http://{}", trim_trailing(m.as_str()));
        if let Some(url) = validate(&candidate) {
            if seen.insert(url.clone()) {
                out.push(url);
            }
        }
    }
    out
}

/// Drop sentence punctuation and unbalanced closing brackets glued to a URL.
fn trim_trailing(raw: &str) -> &str {
    let mut s = raw;
    loop {
        let Some(last) = s.chars().next_back() else {
            return s;
        };
        let strip = match last {
            '.' | ',' | ';' | ':' | '!' | '?' => true,
            ')' => s.matches('(').count() < s.matches(')').count(),
            ']' => s.matches('[').count() < s.matches(']').count(),
            '}' => s.matches('{').count() < s.matches('}').count(),
            _ => false,
        };
        if !strip {
            return s;
        }
        s = &s[..s.len() - last.len_utf8()];
    }
}

fn validate(candidate: &str) -> Option<String> {
    let parsed = Url::parse(candidate).ok()?;
    parsed.host_str().filter(|h| !h.is_empty())?;
    // Keep the user's spelling; `Url` would append a trailing slash.
    Some(candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn br_becomes_newline_and_other_markup_is_dropped() {
        assert_eq!(text_content("<p>Hello</p><br>World"), "Hello\nWorld");
    }

    #[test]
    fn mastodon_mention_and_ellipsised_link_flatten_to_full_url() {
        let body = concat!(
            r#"<p><span class="h-card"><a href="https://social.example/@wayback" class="u-url mention">@<span>wayback</span></a></span> "#,
            r#"<a href="https://example.com/some/long/path" rel="nofollow noopener" target="_blank">"#,
            r#"<span class="invisible">https://</span><span class="ellipsis">example.com/some/lo</span>"#,
            r#"<span class="invisible">ng/path</span></a></p>"#,
        );
        assert_eq!(
            text_content(body),
            "@wayback https://example.com/some/long/path"
        );
    }

    #[test]
    fn entities_are_decoded_and_newlines_between_tags_ignored() {
        assert_eq!(
            text_content("<p>a &amp; b</p>\n<p>c</p>"),
            "a & bc"
        );
    }

    #[test]
    fn malformed_markup_does_not_fail() {
        assert_eq!(text_content("<p>unclosed <b>bold"), "unclosed bold");
        assert_eq!(text_content("plain text only"), "plain text only");
    }

    #[test]
    fn plain_and_markup_bodies_trim_newlines_alike() {
        assert_eq!(text_content("hello\r\n"), "hello");
        assert_eq!(text_content("<p>hello\n</p>"), "hello");
    }

    #[test]
    fn finds_single_scheme_url() {
        assert_eq!(
            match_urls("see http://example.com/x and more"),
            vec!["http://example.com/x".to_string()]
        );
    }

    #[test]
    fn trims_trailing_punctuation_and_dedupes() {
        let text = "Look: https://example.com/a, (https://example.org/b). again https://example.com/a";
        assert_eq!(
            match_urls(text),
            vec![
                "https://example.com/a".to_string(),
                "https://example.org/b".to_string()
            ]
        );
    }

    #[test]
    fn keeps_balanced_parentheses() {
        assert_eq!(
            match_urls("https://en.wikipedia.org/wiki/Rust_(programming_language)"),
            vec!["https://en.wikipedia.org/wiki/Rust_(programming_language)".to_string()]
        );
    }

    #[test]
    fn falls_back_to_bare_domains_only_without_scheme_urls() {
        assert_eq!(
            match_urls("please archive example.com/page."),
            vec!["http://example.com/page".to_string()]
        );
        assert_eq!(
            match_urls("https://a.example.org and b.example.net"),
            vec!["https://a.example.org".to_string()]
        );
    }

    #[test]
    fn handles_and_emails_are_not_urls() {
        assert!(match_urls("@wayback@mastodon.social hello").is_empty());
        assert!(match_urls("mail me at alice@example.com").is_empty());
        assert!(match_urls("nothing to see here").is_empty());
    }
}
