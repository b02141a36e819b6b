//! Client configuration and credentials.

use std::fmt;
use std::time::Duration;

/// Production SCC instance.
pub const DEFAULT_BASE_URL: &str = "https://scc.imaa.cnr.it/";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Retries after the first attempt of a transient failure
    pub max_retries: u32,
    /// Initial retry delay, doubled after each retry
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Upper bound on uploads in flight during `upload_all`
    pub max_concurrent_uploads: usize,
    /// Delay between polls while waiting for processing
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(60),
            max_concurrent_uploads: 4,
            poll_interval: Duration::from_secs(10),
            max_polls: 360,
        }
    }
}

/// SCC account and, optionally, the HTTP basic-auth pair guarding the site.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub http_username: Option<String>,
    pub http_password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            http_username: None,
            http_password: None,
        }
    }

    pub fn with_http_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.http_username = Some(username.into());
        self.http_password = Some(password.into());
        self
    }

    /// Basic-auth pair, when both halves are set.
    pub fn http_auth(&self) -> Option<(String, String)> {
        match (&self.http_username, &self.http_password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("http_username", &self.http_username)
            .finish()
    }
}
