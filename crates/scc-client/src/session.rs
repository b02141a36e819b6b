//! HTTP session shared by every request of one client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Method, RequestBuilder, Url};

use crate::config::ClientConfig;
use crate::error::{Result, SccError};

/// Cookie-carrying HTTP session against one SCC instance.
///
/// Created once and handed to [`crate::SccClient::new`]; separate sessions
/// never share cookies or login state.
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
    http_auth: Option<(String, String)>,
    authenticated: AtomicBool,
}

impl Session {
    pub fn new(config: &ClientConfig, http_auth: Option<(String, String)>) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| SccError::InvalidConfig(format!("base URL '{}': {}", config.base_url, e)))?;

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| SccError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            jar,
            base_url,
            http_auth,
            authenticated: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path or an absolute URL against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SccError::InvalidResponse(format!("invalid URL '{}': {}", path, e)))
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub(crate) fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.http_auth {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    /// Value of a cookie the session holds for the base URL.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = ClientConfig {
            base_url: "http://localhost:8000/scc".to_string(),
            ..Default::default()
        };
        let session = Session::new(&config, None).unwrap();
        assert_eq!(
            session.url("api/v1/measurements/").unwrap().as_str(),
            "http://localhost:8000/scc/api/v1/measurements/"
        );
        assert_eq!(
            session
                .url("http://other:1/api/v1/measurements/?offset=10")
                .unwrap()
                .as_str(),
            "http://other:1/api/v1/measurements/?offset=10"
        );
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Session::new(&config, None),
            Err(SccError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cookie_lookup() {
        let session = Session::new(&ClientConfig::default(), None).unwrap();
        session.jar.add_cookie_str("csrftoken=abc; Path=/", session.base_url());
        assert_eq!(session.cookie("csrftoken").as_deref(), Some("abc"));
        assert_eq!(session.cookie("sessionid"), None);
    }
}
