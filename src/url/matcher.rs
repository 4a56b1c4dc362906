/// Checks if a hostname is covered by an allowed domain
///
/// A hostname is allowed when it equals the allowed domain or is a
/// subdomain of it, separated by a dot:
/// - "example.com" allows "example.com"
/// - "example.com" allows "blog.example.com" and "api.v2.example.com"
/// - "example.com" does NOT allow "myexample.com"
///
/// Both sides are compared case-insensitively.
///
/// # Arguments
///
/// * `allowed` - The allowed domain (e.g. "example.com")
/// * `host` - The hostname of the candidate URL
///
/// # Examples
///
/// ```
/// use harvester::url::matches_allowed_domain;
///
/// assert!(matches_allowed_domain("example.com", "example.com"));
/// assert!(matches_allowed_domain("example.com", "sub.example.com"));
/// assert!(!matches_allowed_domain("example.com", "other.com"));
/// assert!(!matches_allowed_domain("example.com", "notexample.com"));
/// ```
pub fn matches_allowed_domain(allowed: &str, host: &str) -> bool {
    let allowed = allowed.trim().trim_start_matches("*.").to_ascii_lowercase();
    let host = host.to_ascii_lowercase();

    if allowed.is_empty() {
        return false;
    }

    host == allowed
        || (host.len() > allowed.len()
            && host.ends_with(&allowed)
            && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
}

/// Returns true if the host is allowed by any domain in the list
///
/// An empty list allows every host.
pub fn is_host_allowed(allowed_domains: &[String], host: &str) -> bool {
    allowed_domains.is_empty()
        || allowed_domains
            .iter()
            .any(|domain| matches_allowed_domain(domain, host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_allowed_domain("example.com", "example.com"));
        assert!(matches_allowed_domain("blog.example.com", "blog.example.com"));
    }

    #[test]
    fn test_subdomain_match() {
        assert!(matches_allowed_domain("example.com", "sub.example.com"));
        assert!(matches_allowed_domain("example.com", "api.v2.example.com"));
    }

    #[test]
    fn test_parent_domain_not_allowed_by_subdomain() {
        assert!(!matches_allowed_domain("blog.example.com", "example.com"));
    }

    #[test]
    fn test_no_partial_label_match() {
        assert!(!matches_allowed_domain("example.com", "myexample.com"));
        assert!(!matches_allowed_domain("example.com", "example.com.org"));
        assert!(!matches_allowed_domain("example.com", "other.com"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(matches_allowed_domain("Example.COM", "sub.example.com"));
        assert!(matches_allowed_domain("example.com", "SUB.EXAMPLE.COM"));
    }

    #[test]
    fn test_wildcard_prefix_is_tolerated() {
        assert!(matches_allowed_domain("*.example.com", "example.com"));
        assert!(matches_allowed_domain("*.example.com", "a.example.com"));
    }

    #[test]
    fn test_empty_allowed_domain_matches_nothing() {
        assert!(!matches_allowed_domain("", "example.com"));
        assert!(!matches_allowed_domain("", ""));
    }

    #[test]
    fn test_empty_list_allows_everything() {
        assert!(is_host_allowed(&[], "anything.org"));
    }

    #[test]
    fn test_list_membership() {
        let allowed = vec!["example.com".to_string(), "example.org".to_string()];
        assert!(is_host_allowed(&allowed, "www.example.org"));
        assert!(!is_host_allowed(&allowed, "example.net"));
    }
}
