use dashmap::DashSet;
use url::Url;

/// Normalize a URL for dedup purposes: scheme, host, path and query are
/// kept, the fragment is stripped.
pub fn normalize(url: &Url) -> String {
    if url.fragment().is_none() {
        return url.to_string();
    }
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Concurrent registry of every URL claimed for fetching. Membership
/// test-and-insert is atomic, so exactly one task wins each URL no matter
/// how many times or at what depths it is discovered.
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: DashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff this call was the first to claim `url`.
    pub fn try_claim(&self, url: &Url) -> bool {
        self.urls.insert(normalize(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let visited = VisitedSet::new();
        assert!(visited.is_empty());
        let url = Url::parse("https://example.com/a").unwrap();
        assert!(visited.try_claim(&url));
        assert!(!visited.try_claim(&url));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn fragments_do_not_distinguish_urls() {
        let visited = VisitedSet::new();
        let plain = Url::parse("https://example.com/a?q=1").unwrap();
        let fragged = Url::parse("https://example.com/a?q=1#section").unwrap();
        assert!(visited.try_claim(&fragged));
        assert!(!visited.try_claim(&plain));
    }

    #[test]
    fn query_is_significant() {
        let visited = VisitedSet::new();
        assert!(visited.try_claim(&Url::parse("https://example.com/a?q=1").unwrap()));
        assert!(visited.try_claim(&Url::parse("https://example.com/a?q=2").unwrap()));
        assert_eq!(visited.len(), 2);
    }
}
