//! Outbound request descriptor.
//!
//! An `ApiRequest` carries everything needed to issue a call and, after a
//! token refresh, to issue it again unchanged apart from the bearer token.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::ApiError;

/// Path of the token refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// How the request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: Bearer <token>` from the session, when present.
    Bearer,
    /// Cookie jar only; no bearer header. Used by the refresh call.
    Cookie,
    /// No credentials. A 401 here means the submitted credentials were
    /// wrong, so it is never recovered by a refresh.
    Public,
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub auth: Auth,
    /// Set on the replay after a refresh. A retried request is never
    /// recovered a second time.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            auth: Auth::Bearer,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// The refresh call: `POST /auth/refresh` with cookie credentials.
    pub fn refresh() -> Self {
        Self::post(REFRESH_PATH).with_auth(Auth::Cookie)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::Validation(format!("Unserializable request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Unauthenticated call such as login or registration.
    pub fn public(mut self) -> Self {
        self.auth = Auth::Public;
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn is_refresh(&self) -> bool {
        self.method == Method::POST && self.path == REFRESH_PATH
    }

    /// Copy of this request marked as the single permitted retry.
    pub fn as_retry(&self) -> Self {
        let mut retry = self.clone();
        retry.retried = true;
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refresh_request_uses_cookie_auth() {
        let request = ApiRequest::refresh();
        assert!(request.is_refresh());
        assert_eq!(request.auth, Auth::Cookie);
        assert!(!request.retried);
    }

    #[test]
    fn test_public_request() {
        let request = ApiRequest::post("/auth/login").public();
        assert_eq!(request.auth, Auth::Public);
        assert!(!request.is_refresh());
    }

    #[test]
    fn test_get_on_refresh_path_is_not_refresh() {
        assert!(!ApiRequest::get(REFRESH_PATH).is_refresh());
    }

    #[test]
    fn test_as_retry_keeps_everything_else() {
        let request = ApiRequest::put("/projects/7")
            .json(&json!({"name": "sidetrack"}))
            .unwrap()
            .query("expand", "commits");
        let retry = request.as_retry();
        assert!(retry.retried);
        assert!(!request.retried);
        assert_eq!(retry.path, "/projects/7");
        assert_eq!(retry.method, Method::PUT);
        assert_eq!(retry.body, Some(json!({"name": "sidetrack"})));
        assert_eq!(retry.query, vec![("expand".to_string(), "commits".to_string())]);
    }
}
