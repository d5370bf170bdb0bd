use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a").unwrap();
}

/// Extract every anchor's href from an HTML page and resolve it against
/// the page's own URL. Links come back in document order with duplicates
/// preserved; dedup happens at claim time. The parser recovers from
/// broken markup, and unparsable or non-http(s) references are skipped.
/// Fragments are stripped so the frontier only ever sees normalized URLs.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for anchor in document.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        if matches!(resolved.scheme(), "http" | "https") {
            links.push(resolved);
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page.html?x=1").unwrap()
    }

    fn links(html: &str) -> Vec<String> {
        extract_links(html, &base())
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn resolves_relative_references() {
        let html = r##"
            <a href="/abs">abs</a>
            <a href="sibling">sib</a>
            <a href="../up">up</a>
            <a href="//other.com/x">proto-relative</a>
            <a href="?y=2">query-only</a>
            <a href="#frag">fragment-only</a>
        "##;
        assert_eq!(
            links(html),
            vec![
                "https://example.com/abs",
                "https://example.com/dir/sibling",
                "https://example.com/up",
                "https://other.com/x",
                "https://example.com/dir/page.html?y=2",
                "https://example.com/dir/page.html?x=1",
            ]
        );
    }

    #[test]
    fn filters_non_http_schemes() {
        let html = r#"
            <a href="mailto:a@b.c">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="ftp://example.com/f">ftp</a>
            <a href="https://example.com/ok">ok</a>
        "#;
        assert_eq!(links(html), vec!["https://example.com/ok"]);
    }

    #[test]
    fn keeps_duplicates_in_document_order() {
        let html = r#"<a href="/a">1</a><a href="/b">2</a><a href="/a">3</a>"#;
        assert_eq!(
            links(html),
            vec![
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/a",
            ]
        );
    }

    #[test]
    fn anchors_without_href_are_skipped() {
        let html = r#"<a name="top">top</a><a href="/a">a</a>"#;
        assert_eq!(links(html), vec!["https://example.com/a"]);
    }

    #[test]
    fn recovers_from_broken_markup() {
        let html = r#"<div><a href="/a">unclosed <p><a href="/b"</a> <a href="/c">c</a>"#;
        let found = links(html);
        assert!(found.contains(&"https://example.com/a".to_string()));
        assert!(found.contains(&"https://example.com/c".to_string()));
    }

    #[test]
    fn total_garbage_yields_no_links() {
        assert!(links("\u{0}\u{1}%%%% not html at all").is_empty());
    }
}
