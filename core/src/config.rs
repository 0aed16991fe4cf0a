//! Trial and service configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Highest verbosity level `ab` understands
pub const MAX_VERBOSITY: u8 = 5;

/// HTTP method used by a trial
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET (ab default)
    #[default]
    Get,
    /// POST with a request body
    Post,
    /// PUT with a request body
    Put,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl HttpMethod {
    /// Methods that must carry a request body
    pub fn requires_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }

    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic authentication credentials passed with `-A`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

/// Trial configuration
///
/// Describes a single `ab` invocation. Supplied by the caller and never
/// mutated once a session owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Target URL
    pub url: String,

    /// Total number of requests (`-n`)
    pub requests: u64,

    /// Concurrent requests (`-c`)
    pub concurrency: u64,

    /// HTTP method
    #[serde(default)]
    pub method: HttpMethod,

    /// Per-response timeout in seconds (`-s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Maximum seconds to spend benchmarking (`-t`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,

    /// Enable HTTP keep-alive (`-k`)
    #[serde(default)]
    pub keep_alive: bool,

    /// Extra request headers (`-H`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Cookies (`-C`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,

    /// Request body; a JSON string is taken as raw text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Content type of the body (`-T`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Basic auth credentials (`-A`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BasicAuth>,

    /// Proxy URL (`-X`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Requested verbosity; controls which classified events are surfaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<u8>,

    /// Accept responses whose length differs from the first one (`-l`)
    #[serde(default)]
    pub accept_variable_length: bool,
}

impl TrialConfig {
    /// Create a GET trial for the given URL
    pub fn new(url: impl Into<String>, requests: u64, concurrency: u64) -> Self {
        Self {
            url: url.into(),
            requests,
            concurrency,
            method: HttpMethod::Get,
            timeout: None,
            time_limit: None,
            keep_alive: false,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            body: None,
            content_type: None,
            auth: None,
            proxy: None,
            verbosity: None,
            accept_variable_length: false,
        }
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the request body and its content type
    pub fn with_body(mut self, body: serde_json::Value, content_type: Option<&str>) -> Self {
        self.body = Some(body);
        self.content_type = content_type.map(str::to_string);
        self
    }

    /// Add a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a cookie
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Set the requested verbosity
    pub fn with_verbosity(mut self, level: u8) -> Self {
        self.verbosity = Some(level);
        self
    }

    /// Body as text, `None` when absent or JSON null
    pub fn body_text(&self) -> Option<String> {
        match self.body.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Verbosity requested by the caller, 0 when unset
    pub fn requested_verbosity(&self) -> u8 {
        self.verbosity.unwrap_or(0)
    }

    /// Validate the configuration
    ///
    /// Every violated constraint is reported, not only the first one.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        let url = self.url.trim();
        if url.is_empty() {
            errors.push("url is required".to_string());
        } else {
            match Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(format!(
                    "url scheme must be http or https, got {}",
                    parsed.scheme()
                )),
                Err(e) => errors.push(format!("url is not valid: {e}")),
            }
        }

        if self.requests == 0 {
            errors.push("requests must be greater than 0".to_string());
        }

        if self.concurrency == 0 {
            errors.push("concurrency must be greater than 0".to_string());
        } else if self.concurrency > self.requests {
            errors.push(format!(
                "concurrency ({}) cannot exceed requests ({})",
                self.concurrency, self.requests
            ));
        }

        if self.method.requires_body()
            && self
                .body_text()
                .map_or(true, |body| body.trim().is_empty())
        {
            errors.push(format!("{} requests require a body", self.method));
        }

        if self.timeout == Some(0) {
            errors.push("timeout must be greater than 0 seconds".to_string());
        }

        if self.time_limit == Some(0) {
            errors.push("time_limit must be greater than 0 seconds".to_string());
        }

        if let Some(proxy) = &self.proxy {
            if proxy_authority(proxy).is_none() {
                errors.push(format!("proxy is not a valid host:port or URL: {proxy}"));
            }
        }

        if let Some(level) = self.verbosity {
            if level > MAX_VERBOSITY {
                errors.push(format!("verbosity must be at most {MAX_VERBOSITY}"));
            }
        }

        ValidationReport { errors }
    }
}

/// Extract `host:port` from a proxy given either as a URL or as `host:port`
pub(crate) fn proxy_authority(proxy: &str) -> Option<String> {
    let proxy = proxy.trim();
    if proxy.is_empty() {
        return None;
    }
    let candidate = if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    };
    let parsed = Url::parse(&candidate).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

/// Outcome of [`TrialConfig::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Constraint violations, empty when the config is valid
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Whether the config passed validation
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Process supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Path or name of the `ab` executable
    pub ab_path: PathBuf,

    /// Directory for request payload files
    pub scratch_dir: PathBuf,

    /// Seconds between "still running" heartbeat events
    pub heartbeat_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ab_path: PathBuf::from("ab"),
            scratch_dir: std::env::temp_dir().join("ab-bench"),
            heartbeat_secs: 5,
        }
    }
}

impl SupervisorConfig {
    /// Set the `ab` executable
    pub fn with_ab_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ab_path = path.into();
        self
    }

    /// Set the payload scratch directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_secs = interval.as_secs().max(1);
        self
    }

    /// Heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    /// Maximum log entries retained per session
    pub log_capacity: usize,

    /// Seconds after which any session is evicted
    pub session_ttl_secs: u64,

    /// Seconds after which a completed or failed session is evicted
    pub finished_ttl_secs: u64,

    /// Seconds between janitor sweeps
    pub sweep_interval_secs: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1_000,
            session_ttl_secs: 24 * 60 * 60,
            finished_ttl_secs: 60 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl SessionStoreConfig {
    /// Set the per-session log capacity
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Time-to-live for every session
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Time-to-live for completed or failed sessions
    pub fn finished_ttl(&self) -> Duration {
        Duration::from_secs(self.finished_ttl_secs)
    }

    /// Janitor sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_config_has_no_errors() {
        let report = TrialConfig::new("http://localhost:8080/", 100, 10).validate();
        assert!(report.is_ok());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_concurrency_exceeding_requests_reports_once() {
        let report = TrialConfig::new("http://localhost/", 5, 10).validate();
        assert!(!report.is_ok());
        let concurrency_errors = report
            .errors
            .iter()
            .filter(|e| e.contains("concurrency"))
            .count();
        assert_eq!(concurrency_errors, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_all_violations_are_collected() {
        let config = TrialConfig {
            timeout: Some(0),
            ..TrialConfig::new("", 0, 0).with_method(HttpMethod::Post)
        };
        let report = config.validate();
        assert_eq!(report.errors.len(), 5, "{:?}", report.errors);
        assert!(report.errors.iter().any(|e| e.contains("url is required")));
        assert!(report.errors.iter().any(|e| e.contains("requests")));
        assert!(report.errors.iter().any(|e| e.contains("POST requests require a body")));
    }

    #[test]
    fn test_post_body_requirement() {
        let empty = TrialConfig::new("http://localhost/", 10, 1)
            .with_method(HttpMethod::Post)
            .with_body(json!("   "), None);
        assert!(empty
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("require a body")));

        let missing = TrialConfig::new("http://localhost/", 10, 1).with_method(HttpMethod::Put);
        assert!(missing
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("PUT requests require a body")));

        let with_body = TrialConfig::new("http://localhost/", 10, 1)
            .with_method(HttpMethod::Post)
            .with_body(json!({"name": "test"}), Some("application/json"));
        assert!(!with_body
            .validate()
            .errors
            .iter()
            .any(|e| e.contains("require a body")));
    }

    #[test]
    fn test_invalid_url_and_scheme() {
        let report = TrialConfig::new("not a url", 1, 1).validate();
        assert!(report.errors[0].starts_with("url is not valid"));

        let report = TrialConfig::new("ftp://example.com/", 1, 1).validate();
        assert!(report.errors[0].contains("scheme"));
    }

    #[test]
    fn test_proxy_authority() {
        assert_eq!(
            proxy_authority("http://proxy.local:3128").as_deref(),
            Some("proxy.local:3128")
        );
        assert_eq!(proxy_authority("proxy.local:8080").as_deref(), Some("proxy.local:8080"));
        assert_eq!(proxy_authority("http://proxy.local").as_deref(), Some("proxy.local:80"));
        assert!(proxy_authority("").is_none());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: TrialConfig = serde_json::from_value(json!({
            "url": "http://localhost/",
            "requests": 100,
            "concurrency": 4,
            "method": "DELETE",
            "headers": {"X-A": "1"}
        }))
        .unwrap();

        assert_eq!(config.method, HttpMethod::Delete);
        assert_eq!(config.headers.get("X-A").map(String::as_str), Some("1"));
        assert!(!config.keep_alive);
        assert!(config.body_text().is_none());
    }

    #[test]
    fn test_supervisor_config_builder() {
        let config = SupervisorConfig::default()
            .with_ab_path("/usr/local/bin/ab")
            .with_heartbeat(Duration::from_secs(0));
        assert_eq!(config.ab_path, PathBuf::from("/usr/local/bin/ab"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_session_store_config_defaults() {
        let config = SessionStoreConfig::default();
        assert_eq!(config.log_capacity, 1_000);
        assert!(config.finished_ttl() < config.session_ttl());
    }
}
