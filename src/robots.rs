use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Delay applied to a host whose robots.txt declares none (or can't be
/// fetched at all).
pub const DEFAULT_CRAWL_DELAY: Duration = Duration::from_secs(1);

/// Parsed robots.txt rules for a single host, plus that host's politeness
/// clock. Parsed at most once per crawl run.
#[derive(Debug)]
pub struct RobotRules {
    disallow: Vec<Regex>,
    crawl_delay: Duration,
    last_access: Mutex<Option<Instant>>,
}

impl RobotRules {
    /// Default-permissive rules: nothing disallowed, default delay.
    pub fn permissive() -> Self {
        Self {
            disallow: Vec::new(),
            crawl_delay: DEFAULT_CRAWL_DELAY,
            last_access: Mutex::new(None),
        }
    }

    /// Parse robots.txt content. Only directives inside a user-agent block
    /// applicable to `user_agent` (`*`, or a case-insensitive substring of
    /// the agent string) are honored. Unknown directives and unparsable
    /// values are skipped; parsing never fails.
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let mut rules = Self::permissive();
        let agent_lower = user_agent.to_lowercase();
        let mut agent_match = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            if directive == "user-agent" {
                agent_match = value == "*" || agent_lower.contains(&value.to_lowercase());
                continue;
            }
            if !agent_match {
                continue;
            }

            match directive.as_str() {
                "disallow" => {
                    // An empty disallow value allows everything.
                    if !value.is_empty() {
                        if let Some(re) = disallow_pattern(value) {
                            rules.disallow.push(re);
                        }
                    }
                }
                "crawl-delay" => {
                    if let Ok(secs) = value.parse::<u64>() {
                        if secs > 0 {
                            rules.crawl_delay = Duration::from_secs(secs);
                        }
                    }
                }
                _ => {}
            }
        }

        rules
    }

    #[cfg(test)]
    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        let path = normalize_path(url.path());
        !self.disallow.iter().any(|re| re.is_match(&path))
    }

    /// Wait until at least `crawl_delay` has elapsed since this host was
    /// last accessed, then stamp the new access time. Same-host callers
    /// serialize on the mutex, so consecutive fetch starts stay spaced;
    /// other hosts are unaffected.
    pub async fn await_turn(&self) {
        let mut last = self.last_access.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.crawl_delay).await;
        }
        *last = Some(Instant::now());
    }
}

/// Start-anchored pattern with `*` matching any characters and everything
/// else literal.
fn disallow_pattern(value: &str) -> Option<Regex> {
    let pattern = format!("^{}", regex::escape(value).replace("\\*", ".*"));
    Regex::new(&pattern).ok()
}

/// Treat extension-less paths as directory-like: append a trailing slash
/// unless the path already ends with one or its final segment contains a
/// dot.
fn normalize_path(path: &str) -> String {
    if path.ends_with('/') {
        return path.to_string();
    }
    let last = path.rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Per-host robots.txt cache. Populated lazily on first reference to a
/// host; duplicate concurrent fetches of the same robots.txt are allowed
/// and the last writer wins, which is harmless since the rules for a host
/// are deterministic given its content.
pub struct RobotsCache {
    rules: DashMap<String, Arc<RobotRules>>,
    user_agent: String,
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            rules: DashMap::new(),
            user_agent: user_agent.into(),
        }
    }

    /// Cached rules for the URL's authority, fetching
    /// `scheme://authority/robots.txt` on first reference. Fetch failure
    /// of any kind degrades to default-permissive rules; robots.txt
    /// absence never aborts a crawl.
    pub async fn rules_for(&self, client: &reqwest::Client, url: &Url) -> Arc<RobotRules> {
        let authority = authority_of(url);
        if let Some(rules) = self.rules.get(&authority) {
            return Arc::clone(&rules);
        }

        let rules = Arc::new(self.fetch_rules(client, url.scheme(), &authority).await);
        self.rules.insert(authority, Arc::clone(&rules));
        rules
    }

    async fn fetch_rules(
        &self,
        client: &reqwest::Client,
        scheme: &str,
        authority: &str,
    ) -> RobotRules {
        let robots_url = format!("{scheme}://{authority}/robots.txt");
        match client.get(&robots_url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => match resp.text().await {
                Ok(body) => RobotRules::parse(&body, &self.user_agent),
                Err(e) => {
                    log::warn!("Couldn't read {robots_url}: {e}");
                    RobotRules::permissive()
                }
            },
            Ok(resp) => {
                log::debug!("No robots.txt at {robots_url}: status {}", resp.status());
                RobotRules::permissive()
            }
            Err(e) => {
                log::warn!("Couldn't fetch {robots_url}: {e}");
                RobotRules::permissive()
            }
        }
    }
}

/// Host plus non-default port. Keying the cache (and the robots.txt fetch)
/// by authority keeps one politeness window per actual server.
fn authority_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "WebcrawlBot/1.0";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn disallow_prefix_and_wildcard() {
        let rules = RobotRules::parse(
            "User-agent: *\nDisallow: /private\nDisallow: /tmp*\n",
            UA,
        );
        assert!(!rules.is_allowed(&url("https://h/private/page")));
        assert!(!rules.is_allowed(&url("https://h/tmp123")));
        assert!(!rules.is_allowed(&url("https://h/tmp/old")));
        assert!(rules.is_allowed(&url("https://h/public")));
    }

    #[test]
    fn extension_less_paths_are_directory_like() {
        let rules = RobotRules::parse("User-agent: *\nDisallow: /private/\n", UA);
        // "/private" normalizes to "/private/" and matches.
        assert!(!rules.is_allowed(&url("https://h/private")));
        // "/private.html" keeps its dot-bearing final segment.
        assert!(rules.is_allowed(&url("https://h/private.html")));
    }

    #[test]
    fn crawl_delay_parsing() {
        let rules = RobotRules::parse("User-agent: *\nCrawl-delay: 2\n", UA);
        assert_eq!(rules.crawl_delay(), Duration::from_secs(2));

        for bad in ["0", "-3", "fast", "2.5"] {
            let rules = RobotRules::parse(&format!("User-agent: *\nCrawl-delay: {bad}\n"), UA);
            assert_eq!(rules.crawl_delay(), DEFAULT_CRAWL_DELAY);
        }
    }

    #[test]
    fn rules_scoped_to_matching_agent_block() {
        let content = "User-agent: Googlebot\nDisallow: /google-only\n\n\
                       User-agent: webcrawlbot\nDisallow: /ours\n";
        let rules = RobotRules::parse(content, UA);
        assert!(rules.is_allowed(&url("https://h/google-only/x")));
        assert!(!rules.is_allowed(&url("https://h/ours/x")));
    }

    #[test]
    fn comments_blanks_and_garbage_tolerated() {
        let content = "# robots\n\nnot a directive\nUser-agent: *\nDisallow: /a\nNoise\n";
        let rules = RobotRules::parse(content, UA);
        assert!(!rules.is_allowed(&url("https://h/a/b")));
        assert!(rules.is_allowed(&url("https://h/b")));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let rules = RobotRules::parse("User-agent: *\nDisallow:\n", UA);
        assert!(rules.is_allowed(&url("https://h/anything")));
    }

    #[test]
    fn malformed_content_degrades_to_permissive() {
        let rules = RobotRules::parse("\u{0}\u{1}garbage without structure", UA);
        assert!(rules.is_allowed(&url("https://h/anything")));
        assert_eq!(rules.crawl_delay(), DEFAULT_CRAWL_DELAY);
    }

    #[test]
    fn is_allowed_is_deterministic() {
        let rules = RobotRules::parse("User-agent: *\nDisallow: /private\n", UA);
        let target = url("https://h/private/page");
        for _ in 0..3 {
            assert!(!rules.is_allowed(&target));
        }
    }

    #[test]
    fn authority_includes_non_default_port() {
        assert_eq!(authority_of(&url("http://127.0.0.1:8080/x")), "127.0.0.1:8080");
        assert_eq!(authority_of(&url("https://example.com/x")), "example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn await_turn_spaces_consecutive_accesses() {
        let rules = RobotRules::parse("User-agent: *\nCrawl-delay: 2\n", UA);
        let started = Instant::now();
        rules.await_turn().await;
        rules.await_turn().await;
        rules.await_turn().await;
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn first_access_does_not_wait() {
        let rules = RobotRules::permissive();
        let started = Instant::now();
        rules.await_turn().await;
        assert!(started.elapsed() < Duration::from_millis(1));
    }
}
