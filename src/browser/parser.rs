//! HTML extraction for the HTTP engine
//!
//! This module parses a loaded document and extracts:
//! - Page title and visible body text
//! - Links to follow (from <a> tags and canonical links)
//! - Image URLs
//! - Media-bearing elements for the media pipeline

use super::{ExtractedPage, MediaElement, MediaElementKind};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Elements whose text never counts as page content
const HIDDEN_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Parses an HTML document and extracts title, text, links and images
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only links
///
/// Links are returned in document order without de-duplication.
///
/// # Example
///
/// ```
/// use harvester::browser::parse_page;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let page = parse_page(html, &base_url);
/// assert_eq!(page.title, Some("Test".to_string()));
/// assert_eq!(page.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_page(html: &str, base_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);

    ExtractedPage {
        title: extract_title(&document),
        content: extract_text(&document),
        links: extract_links(&document, base_url),
        images: select_attr(&document, "img[src]", "src")
            .filter_map(|src| resolve_link(src, base_url))
            .collect(),
    }
}

/// Enumerates images, video/audio elements, their `<source>` children and
/// outbound links, with their raw URL attributes
pub fn extract_media_elements(html: &str) -> Vec<MediaElement> {
    let document = Html::parse_document(html);

    let groups: [(&str, &str, MediaElementKind); 6] = [
        ("img[src]", "src", MediaElementKind::Image),
        ("video[src]", "src", MediaElementKind::Video),
        ("audio[src]", "src", MediaElementKind::Audio),
        ("video source[src]", "src", MediaElementKind::Source),
        ("audio source[src]", "src", MediaElementKind::Source),
        ("a[href]", "href", MediaElementKind::Link),
    ];

    groups
        .iter()
        .flat_map(|(selector, attr, kind)| {
            select_attr(&document, selector, attr)
                .map(|src| src.trim())
                .filter(|src| !src.is_empty())
                .map(|src| MediaElement {
                    kind: *kind,
                    src: src.to_string(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Collects visible body text, skipping scripts and styles
fn extract_text(document: &Html) -> String {
    let Some(body) = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
    else {
        return String::new();
    };

    let mut words: Vec<&str> = Vec::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ElementRef::wrap(ancestor)
                .map(|el| HIDDEN_TEXT_ELEMENTS.contains(&el.value().name()))
                .unwrap_or(false)
        });

        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}

/// Extracts all followable links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(absolute_url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute_url);
            }
        }
    }

    links.extend(
        select_attr(document, "link[rel='canonical'][href]", "href")
            .filter_map(|href| resolve_link(href, base_url)),
    );

    links
}

fn select_attr<'a>(
    document: &'a Html,
    selector: &str,
    attr: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    let selector = Selector::parse(selector).ok();
    selector
        .into_iter()
        .flat_map(move |selector| {
            document
                .select(&selector)
                .filter_map(|element| element.value().attr(attr))
                .collect::<Vec<_>>()
        })
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None for special schemes, data URIs, fragment-only hrefs and
/// anything that does not resolve.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
        .map(String::from)
}
