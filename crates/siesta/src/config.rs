use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::{Position, Url};

use crate::error::ServiceError;
use crate::pipeline::Pipeline;
use crate::progress::ProgressConfig;
use crate::transport::HttpRequest;

const DEFAULT_USER_AGENT: &str = concat!("siesta/", env!("CARGO_PKG_VERSION"));

/// Options for the HTTP client behind the default transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// Proxy URL (optional)
    pub proxy: Option<String>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: TransportConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
        }
    }
}

impl TransportConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json;q=0.9,text/*;q=0.8,*/*;q=0.5"),
        );
        default_headers
    }
}

/// Hook run on every outgoing request of the resources it applies to.
pub type RequestMutation = Arc<dyn Fn(&mut HttpRequest) + Send + Sync>;

/// Per-resource behaviour: how responses are processed, how long data stays
/// fresh and what every request carries.
#[derive(Clone)]
pub struct Configuration {
    pub pipeline: Pipeline,

    /// How long fetched data is considered fresh.
    pub expiration_time: Duration,

    /// How long after a failure before a load is attempted again.
    pub retry_time: Duration,

    /// Headers added to requests that don't already set them.
    pub headers: HeaderMap,

    pub progress: ProgressConfig,

    request_mutations: Vec<RequestMutation>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            pipeline: Pipeline::standard(),
            expiration_time: Duration::from_secs(30),
            retry_time: Duration::from_secs(1),
            headers: HeaderMap::new(),
            progress: ProgressConfig::default(),
            request_mutations: Vec::new(),
        }
    }
}

impl Configuration {
    /// Adds a header sent with every request, unless the request sets it itself.
    pub fn header(&mut self, name: &str, value: &str) -> Result<&mut Self, ServiceError> {
        let invalid = || ServiceError::InvalidHeader(format!("{name}: {value}"));
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Registers a hook that may rewrite every outgoing request. Hooks run in
    /// the order they were added.
    pub fn mutate_requests<F>(&mut self, mutation: F) -> &mut Self
    where
        F: Fn(&mut HttpRequest) + Send + Sync + 'static,
    {
        self.request_mutations.push(Arc::new(mutation));
        self
    }

    pub fn clear_request_mutations(&mut self) -> &mut Self {
        self.request_mutations.clear();
        self
    }

    /// Applies default headers and request mutations.
    pub(crate) fn prepare(&self, request: &mut HttpRequest) {
        for (name, value) in &self.headers {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }
        for mutation in &self.request_mutations {
            mutation(request);
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("pipeline", &self.pipeline)
            .field("expiration_time", &self.expiration_time)
            .field("retry_time", &self.retry_time)
            .field("headers", &self.headers)
            .field("progress", &self.progress)
            .field("request_mutations", &self.request_mutations.len())
            .finish()
    }
}

/// Selects the resources a configuration block applies to.
#[derive(Clone)]
pub enum ConfigurationPattern {
    All,
    /// URL glob. `*` matches within a path segment, `**` across segments.
    /// The query string is ignored.
    Glob { pattern: String, matcher: Regex },
    Predicate(Arc<dyn Fn(&Url) -> bool + Send + Sync>),
}

impl ConfigurationPattern {
    /// Compiles a glob. Patterns without a scheme are resolved against `base`.
    pub fn glob(pattern: &str, base: Option<&Url>) -> Result<Self, ServiceError> {
        let absolute = match base {
            Some(base) if !pattern.contains("://") => format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                pattern.trim_start_matches('/')
            ),
            _ => pattern.to_owned(),
        };

        let mut source = String::from("^");
        let mut rest = absolute.as_str();
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix("**") {
                source.push_str(".*");
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('*') {
                source.push_str("[^/]*");
                rest = tail;
            } else {
                let end = rest.find('*').unwrap_or(rest.len());
                source.push_str(&regex::escape(&rest[..end]));
                rest = &rest[end..];
            }
        }
        source.push('$');

        let matcher = Regex::new(&source).map_err(|source| ServiceError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(ConfigurationPattern::Glob {
            pattern: absolute,
            matcher,
        })
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Url) -> bool + Send + Sync + 'static,
    {
        ConfigurationPattern::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, url: &Url) -> bool {
        match self {
            ConfigurationPattern::All => true,
            ConfigurationPattern::Glob { matcher, .. } => matcher.is_match(&url[..Position::AfterPath]),
            ConfigurationPattern::Predicate(predicate) => predicate(url),
        }
    }
}

impl fmt::Debug for ConfigurationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationPattern::All => f.write_str("All"),
            ConfigurationPattern::Glob { pattern, .. } => f.debug_tuple("Glob").field(pattern).finish(),
            ConfigurationPattern::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use reqwest::header::{ACCEPT, AUTHORIZATION};

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let base = url("https://api.example.com/v1");
        let pattern = ConfigurationPattern::glob("/users/*", Some(&base)).unwrap();
        assert!(pattern.matches(&url("https://api.example.com/v1/users/42")));
        assert!(pattern.matches(&url("https://api.example.com/v1/users/42?full=1")));
        assert!(!pattern.matches(&url("https://api.example.com/v1/users/42/posts")));
        assert!(!pattern.matches(&url("https://api.example.com/v1/groups/1")));
    }

    #[test]
    fn test_double_star_spans_segments() {
        let base = url("https://api.example.com/");
        let pattern = ConfigurationPattern::glob("users/**", Some(&base)).unwrap();
        assert!(pattern.matches(&url("https://api.example.com/users/42/posts/7")));
        assert!(!pattern.matches(&url("https://api.example.com/groups")));
    }

    #[test]
    fn test_absolute_pattern_ignores_base() {
        let base = url("https://api.example.com/");
        let pattern = ConfigurationPattern::glob("https://cdn.example.com/**", Some(&base)).unwrap();
        assert!(pattern.matches(&url("https://cdn.example.com/img/a.png")));
        assert!(!pattern.matches(&url("https://api.example.com/img/a.png")));
    }

    #[test]
    fn test_prepare_applies_headers_and_mutations_in_order() {
        let mut config = Configuration::default();
        config.header("authorization", "Bearer default").unwrap();
        config.header("accept", "text/plain").unwrap();
        config
            .mutate_requests(|request| {
                request
                    .headers_mut()
                    .insert("x-step", HeaderValue::from_static("one"));
            })
            .mutate_requests(|request| {
                let seen = request.headers().get("x-step").cloned();
                if let Some(seen) = seen {
                    request.headers_mut().insert("x-seen", seen);
                }
            });

        let mut request = HttpRequest::new(Method::GET, url("https://example.com/"))
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));
        config.prepare(&mut request);

        assert_eq!(request.headers()[AUTHORIZATION], "Bearer default");
        assert_eq!(request.headers()[ACCEPT], "application/json");
        assert_eq!(request.headers()["x-seen"], "one");
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let mut config = Configuration::default();
        assert!(matches!(
            config.header("x-bad", "line\nbreak"),
            Err(ServiceError::InvalidHeader(_))
        ));
    }
}
