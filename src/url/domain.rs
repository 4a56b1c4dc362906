use url::Url;

/// Host placeholder used in storage paths when a URL cannot be parsed
pub const UNKNOWN_DOMAIN: &str = "unknown-domain";

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use harvester::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Extracts the host from a raw URL string, falling back to a placeholder
///
/// Used when building object-storage keys, where a key must always be
/// produced even for odd input.
pub fn domain_or_unknown(url: &str) -> String {
    Url::parse(url)
        .ok()
        .as_ref()
        .and_then(extract_domain)
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}

/// Extracts the lowercase file extension from a URL's path
///
/// Only the last path segment is inspected, so dots in directory names or
/// in the query string never produce an extension.
pub fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    let (_, ext) = segment.rsplit_once('.')?;

    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}
