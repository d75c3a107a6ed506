//! In-memory cookie jar shared by every request of one session.
//!
//! Cookies are keyed by (domain, path, name). The jar never prunes by age on
//! its own: a cookie only disappears when the vendor sends it again with a
//! zero lifetime, or when the whole jar is cleared or replaced.

use parking_lot::RwLock;
use url::Url;

/// A stored cookie with every attribute the session file persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
    pub domain: Option<String>,
    /// Lifetime in seconds, `-1` for a session cookie.
    pub max_age: i64,
    pub path: Option<String>,
    pub port_list: Option<String>,
    pub version: i32,
    pub secure: bool,
    pub discard: bool,
    /// Set when the cookie came without a `Domain` attribute: it is only
    /// sent back to the exact host it came from. Not part of the session
    /// file, so restored cookies always use domain matching.
    pub host_only: bool,
}

impl StoredCookie {
    /// A programmatic cookie: session lifetime, version 1.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            comment: None,
            comment_url: None,
            domain: None,
            max_age: -1,
            path: None,
            port_list: None,
            version: 1,
            secure: false,
            discard: false,
            host_only: false,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Parse a `Set-Cookie` header value received from `origin`.
    pub fn parse_set_cookie(header: &str, origin: &Url) -> Option<Self> {
        let parsed = match cookie::Cookie::parse(header.to_string()) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("Ignoring malformed Set-Cookie header: {}", e);
                return None;
            }
        };

        let max_age = match (parsed.max_age(), parsed.expires_datetime()) {
            (Some(age), _) => age.whole_seconds().max(0),
            (None, Some(expires)) => {
                (expires.unix_timestamp() - chrono::Utc::now().timestamp()).max(0)
            }
            (None, None) => -1,
        };

        let host_only = parsed.domain().is_none();
        let domain = parsed
            .domain()
            .map(|d| d.to_string())
            .or_else(|| origin.host_str().map(|h| h.to_string()));

        Some(Self {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            comment: None,
            comment_url: None,
            domain,
            max_age,
            path: Some(
                parsed
                    .path()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| default_path(origin)),
            ),
            port_list: None,
            version: 0,
            secure: parsed.secure().unwrap_or(false),
            discard: false,
            host_only,
        })
    }

    /// Whether this cookie should be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let Some(domain) = self.domain.as_deref() else {
            return false;
        };
        let in_scope = if self.host_only {
            domain.eq_ignore_ascii_case(host)
        } else {
            domain_matches(domain, host)
        };
        if !in_scope {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => path_matches(path, url.path()),
            _ => true,
        }
    }

    fn same_key(&self, other: &StoredCookie) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && normalized_domain(self.domain.as_deref()) == normalized_domain(other.domain.as_deref())
            && self.path.as_deref().unwrap_or("/") == other.path.as_deref().unwrap_or("/")
    }
}

/// Thread-safe cookie store.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb every `Set-Cookie` header of a response from `response_url`.
    pub fn store<I, S>(&self, response_url: &Url, set_cookie_headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for header in set_cookie_headers {
            let header = header.as_ref();
            if header.is_empty() {
                continue;
            }
            if let Some(cookie) = StoredCookie::parse_set_cookie(header, response_url) {
                self.insert(cookie);
            }
        }
    }

    /// Add a cookie. A cookie without a domain is scoped to `origin`'s host only.
    pub fn add(&self, origin: Option<&Url>, mut cookie: StoredCookie) {
        if cookie.domain.is_none() {
            cookie.domain = origin.and_then(|u| u.host_str()).map(|h| h.to_string());
            cookie.host_only = cookie.domain.is_some();
        }
        self.insert(cookie);
    }

    fn insert(&self, cookie: StoredCookie) {
        let mut cookies = self.cookies.write();
        cookies.retain(|existing| !existing.same_key(&cookie));
        if cookie.max_age != 0 {
            cookies.push(cookie);
        }
    }

    /// All cookies that apply to a request to `url`, in insertion order.
    pub fn cookies_for(&self, url: &Url) -> Vec<StoredCookie> {
        self.cookies
            .read()
            .iter()
            .filter(|c| c.matches(url))
            .cloned()
            .collect()
    }

    /// Value for a `Cookie` request header, or `None` when nothing matches.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies_for(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join(";"),
        )
    }

    /// Snapshot of every stored cookie.
    pub fn all(&self) -> Vec<StoredCookie> {
        self.cookies.read().clone()
    }

    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }

    pub fn clear(&self) {
        self.cookies.write().clear();
    }

    /// Replace the jar contents wholesale (session restore).
    pub fn replace_all(&self, cookies: Vec<StoredCookie>) {
        let mut guard = self.cookies.write();
        guard.clear();
        drop(guard);
        for cookie in cookies {
            self.insert(cookie);
        }
    }
}

fn normalized_domain(domain: Option<&str>) -> String {
    domain
        .unwrap_or_default()
        .trim_start_matches('.')
        .to_ascii_lowercase()
}

fn domain_matches(domain: &str, host: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == request_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(origin: &Url) -> String {
    let path = origin.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}
