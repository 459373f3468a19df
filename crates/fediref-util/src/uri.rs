use url::Url;

/// Lowercased host of an absolute URI, if it has one.
pub fn host_of(uri: &str) -> Option<String> {
    let parsed = Url::parse(uri).ok()?;
    parsed.host_str().map(|host| host.to_ascii_lowercase())
}

/// Whether `uri` parses and uses a scheme we can dereference.
pub fn is_dereferenceable(uri: &str) -> bool {
    Url::parse(uri)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some())
        .unwrap_or(false)
}

/// Whether both URIs share a host, ignoring case.
pub fn same_host(a: &str, b: &str) -> bool {
    match (host_of(a), host_of(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Placeholder key for an account whose URI is not known yet.
pub fn account_key(protocol: &str, domain: &str, username: &str) -> String {
    format!("{protocol}://{domain}/users/{username}")
}

/// `host` followed by each parent domain, e.g. `a.b.example.org`,
/// `b.example.org`, `example.org`. Single labels are not yielded as parents.
pub fn domain_and_parents(host: &str) -> Vec<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let mut out = vec![host.clone()];
    let mut rest = host.as_str();
    while let Some((_, parent)) = rest.split_once('.') {
        if !parent.contains('.') {
            break;
        }
        out.push(parent.to_string());
        rest = parent;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_lowercased() {
        assert_eq!(
            host_of("https://Example.ORG/users/alice").as_deref(),
            Some("example.org")
        );
        assert_eq!(host_of("not a uri"), None);
    }

    #[test]
    fn only_http_schemes_are_dereferenceable() {
        assert!(is_dereferenceable("https://example.org/users/alice"));
        assert!(is_dereferenceable("http://example.org/users/alice"));
        assert!(!is_dereferenceable("ftp://example.org/users/alice"));
        assert!(!is_dereferenceable("acct:alice@example.org"));
        assert!(!is_dereferenceable(""));
    }

    #[test]
    fn parents_stop_before_tld() {
        assert_eq!(
            domain_and_parents("a.b.example.org"),
            vec!["a.b.example.org", "b.example.org", "example.org"]
        );
        assert_eq!(domain_and_parents("example.org"), vec!["example.org"]);
        assert_eq!(domain_and_parents("localhost"), vec!["localhost"]);
    }

    #[test]
    fn same_host_compares_hosts_only() {
        assert!(same_host(
            "https://example.org/users/alice",
            "https://EXAMPLE.org/notes/1"
        ));
        assert!(!same_host(
            "https://example.org/users/alice",
            "https://evil.example/notes/1"
        ));
    }
}
