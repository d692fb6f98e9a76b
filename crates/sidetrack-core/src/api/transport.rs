//! Network seam between the gateway and the backend.
//!
//! `HttpTransport` is the reqwest implementation. It keeps a cookie jar so the
//! refresh cookie set at login is sent back on `POST /auth/refresh`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{header, Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{ApiError, ApiRequest};

/// Status and body of a settled HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `request`, attaching `bearer` as `Authorization: Bearer` when
    /// given. Any HTTP status is a successful exchange; only failures to get
    /// a response are errors.
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError>;

    /// Cookie header currently held for the API origin, if the transport
    /// keeps cookies.
    fn cookies(&self) -> Option<String> {
        None
    }
}

/// reqwest-backed transport. Clone is cheap; the client and jar are shared.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    origin: Url,
    jar: Arc<Jar>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let origin = Url::parse(&base_url)
            .map_err(|e| ApiError::InvalidResponse(format!("Invalid API base URL {}: {}", base_url, e)))?;
        let jar = Arc::new(Jar::default());

        let client = Client::builder()
            .timeout(timeout)
            .cookie_provider(jar.clone())
            .build()?;

        Ok(Self {
            client,
            base_url,
            origin,
            jar,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Put previously persisted cookies (a `Cookie` header value) back in the
    /// jar.
    pub fn restore_cookies(&self, header: &str) {
        for cookie in header.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.jar.add_cookie_str(cookie, &self.origin);
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        let url = self.url(&request.path);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .header(header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout)
            } else {
                warn!(method = %request.method, path = %request.path, error = %e, "Request failed before a response");
                ApiError::from(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        debug!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            retried = request.retried,
            "API response received"
        );

        Ok(RawResponse { status, body })
    }

    fn cookies(&self) -> Option<String> {
        self.jar
            .cookies(&self.origin)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_base_and_path() {
        let transport =
            HttpTransport::new("http://localhost:4000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:4000/api");
        assert_eq!(transport.url("/projects"), "http://localhost:4000/api/projects");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_restored_cookies_are_reported() {
        let transport =
            HttpTransport::new("http://localhost:4000", Duration::from_secs(5)).unwrap();
        assert!(transport.cookies().is_none());

        transport.restore_cookies("refresh_token=abc123");
        assert_eq!(transport.cookies().as_deref(), Some("refresh_token=abc123"));
    }
}
