//! Scripted in-memory backend for gateway and client tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use super::request::{Auth, REFRESH_PATH};
use super::transport::{RawResponse, Transport};
use super::{ApiError, ApiRequest};

#[derive(Debug, Clone)]
pub(crate) enum RefreshReply {
    /// `{success, message, data: token}` and the token becomes valid.
    Envelope(String),
    /// Bare JSON string token.
    Bare(String),
    /// Failure with this status.
    Status(u16),
    /// Never answers.
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub retried: bool,
    pub body: Option<Value>,
}

struct FakeState {
    valid_token: Option<String>,
    refresh_reply: RefreshReply,
    routes: HashMap<(Method, String), (u16, String)>,
    always_unauthorized: HashSet<String>,
    offline: bool,
    calls: Vec<Call>,
}

pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
    refresh_delay: Duration,
    route_delays: HashMap<String, Duration>,
    cookies: Option<String>,
}

impl FakeBackend {
    /// Backend accepting only `valid_token`, whose refresh answers `reply`.
    pub fn new(valid_token: Option<&str>, reply: RefreshReply) -> Self {
        Self {
            state: Mutex::new(FakeState {
                valid_token: valid_token.map(str::to_string),
                refresh_reply: reply,
                routes: HashMap::new(),
                always_unauthorized: HashSet::new(),
                offline: false,
                calls: Vec::new(),
            }),
            refresh_delay: Duration::ZERO,
            route_delays: HashMap::new(),
            cookies: None,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// `path` answers only after `delay`.
    pub fn with_route_delay(mut self, path: &str, delay: Duration) -> Self {
        self.route_delays.insert(path.to_string(), delay);
        self
    }

    pub fn with_cookies(mut self, cookies: &str) -> Self {
        self.cookies = Some(cookies.to_string());
        self
    }

    /// Canned answer for an authorized request.
    pub fn route(self, method: Method, path: &str, status: u16, body: Value) -> Self {
        self.state()
            .routes
            .insert((method, path.to_string()), (status, body.to_string()));
        self
    }

    pub fn route_raw(self, method: Method, path: &str, status: u16, body: &str) -> Self {
        self.state()
            .routes
            .insert((method, path.to_string()), (status, body.to_string()));
        self
    }

    /// `path` answers 401 whatever token is sent.
    pub fn reject_always(self, path: &str) -> Self {
        self.state().always_unauthorized.insert(path.to_string());
        self
    }

    pub fn offline(self) -> Self {
        self.state().offline = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls_to(REFRESH_PATH).len()
    }

    async fn answer_refresh(&self) -> RawResponse {
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let reply = self.state().refresh_reply.clone();
        match reply {
            RefreshReply::Envelope(token) => {
                self.state().valid_token = Some(token.clone());
                let body = json!({"success": true, "message": "Token refreshed", "data": token});
                RawResponse::new(StatusCode::OK, body.to_string())
            }
            RefreshReply::Bare(token) => {
                self.state().valid_token = Some(token.clone());
                RawResponse::new(StatusCode::OK, Value::String(token).to_string())
            }
            RefreshReply::Status(code) => {
                let error_code = if code == 401 { "UNAUTHORIZED" } else { "SERVER_ERROR" };
                let body = json!({"message": "Refresh failed", "code": error_code});
                RawResponse::new(
                    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    body.to_string(),
                )
            }
            RefreshReply::Hang => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        let offline = {
            let mut state = self.state();
            state.calls.push(Call {
                method: request.method.clone(),
                path: request.path.clone(),
                bearer: bearer.map(str::to_string),
                retried: request.retried,
                body: request.body.clone(),
            });
            state.offline
        };
        if offline {
            return Err(ApiError::Network("connection refused".to_string()));
        }

        if request.is_refresh() {
            return Ok(self.answer_refresh().await);
        }
        if let Some(delay) = self.route_delays.get(&request.path) {
            tokio::time::sleep(*delay).await;
        }

        let state = self.state();
        let authorized = request.auth == Auth::Public
            || (!state.always_unauthorized.contains(&request.path)
                && bearer.map(str::to_string) == state.valid_token);
        if !authorized {
            let body = json!({"message": "Token expired", "code": "UNAUTHORIZED"});
            return Ok(RawResponse::new(StatusCode::UNAUTHORIZED, body.to_string()));
        }

        match state.routes.get(&(request.method.clone(), request.path.clone())) {
            Some((status, body)) => Ok(RawResponse::new(
                StatusCode::from_u16(*status).unwrap_or(StatusCode::OK),
                body.clone(),
            )),
            None => {
                let body = json!({"success": true, "message": "ok", "data": {"path": request.path}});
                Ok(RawResponse::new(StatusCode::OK, body.to_string()))
            }
        }
    }

    fn cookies(&self) -> Option<String> {
        self.cookies.clone()
    }
}
