//! Authenticated request gateway.
//!
//! Every API call goes through [`Gateway::send`]. The gateway attaches the
//! session's bearer token and, when the backend answers 401, recovers with a
//! single token refresh shared by every request that failed meanwhile:
//!
//! - the first request to see a 401 becomes the leader, marks the refresh as
//!   in progress and calls `POST /auth/refresh`;
//! - requests that see a 401 while the refresh is in flight enqueue a oneshot
//!   sender and wait for its outcome;
//! - on success the new token is stored and handed to every waiter in
//!   enqueue order, and each request is replayed once;
//! - on failure every waiter gets the refresh error, the session is cleared
//!   and the user is sent to the login view.
//!
//! A request whose 401 arrives after a refresh has already completed is
//! replayed with the session's newer token instead of refreshing again.
//!
//! The in-progress check and the flag update happen in one critical section
//! that never spans an `.await`, so two requests cannot both start a refresh.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::envelope::Payload;
use super::request::Auth;
use super::transport::{RawResponse, Transport};
use super::{ApiError, ApiRequest};
use crate::auth::Session;
use crate::navigation::{self, Navigator};

/// Timeout for each HTTP exchange (original call, refresh, replay).
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type Waiter = oneshot::Sender<Result<String, ApiError>>;

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    waiters: Vec<Waiter>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    session: Session,
    navigator: Arc<dyn Navigator>,
    timeout: Duration,
    refresh: Mutex<RefreshState>,
}

impl Inner {
    fn refresh_state(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets the refresh state if the leading request is dropped before the
/// refresh settles. Dropping the waiters' senders makes them fail instead of
/// waiting forever.
struct RefreshGuard<'a> {
    inner: &'a Inner,
    finished: bool,
}

impl RefreshGuard<'_> {
    /// Leave REFRESHING and take the queue, in one step.
    fn finish(mut self) -> Vec<Waiter> {
        self.finished = true;
        let mut state = self.inner.refresh_state();
        state.in_progress = false;
        std::mem::take(&mut state.waiters)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = {
            let mut state = self.inner.refresh_state();
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };
        warn!(waiters = abandoned.len(), "Token refresh abandoned");
    }
}

enum Role<'a> {
    Leader(RefreshGuard<'a>),
    Follower(oneshot::Receiver<Result<String, ApiError>>),
}

/// Clone is cheap; clones share the session and the refresh state.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Session,
        navigator: Arc<dyn Navigator>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                session,
                navigator,
                timeout,
                refresh: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.inner.navigator
    }

    /// Cookies the transport currently holds for the API.
    pub fn cookies(&self) -> Option<String> {
        self.inner.transport.cookies()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh_state().in_progress
    }

    #[cfg(test)]
    pub(crate) fn pending_waiters(&self) -> usize {
        self.inner.refresh_state().waiters.len()
    }

    /// Send `request` and return the unwrapped response payload.
    pub async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let bearer = match request.auth {
            Auth::Bearer => self.inner.session.token(),
            Auth::Cookie | Auth::Public => None,
        };
        let response = self.dispatch(&request, bearer.as_deref()).await?;

        let recoverable = response.status == StatusCode::UNAUTHORIZED
            && !request.retried
            && request.auth != Auth::Public;
        if !recoverable {
            return Self::settle(&request, response);
        }

        if request.is_refresh() {
            error!("Refresh call rejected, session is unrecoverable");
            let message = ApiError::from_status(response.status, &response.body).message();
            self.expire_session();
            return Err(ApiError::Unauthorized(message));
        }

        // A refresh that finished while this request was in flight already
        // produced the token to retry with.
        if request.auth == Auth::Bearer {
            if let Some(current) = self.inner.session.token() {
                if bearer.as_deref() != Some(current.as_str()) {
                    debug!(method = %request.method, path = %request.path, "Token changed in flight, replaying");
                    return self.replay(&request, &current).await;
                }
            }
        }

        debug!(method = %request.method, path = %request.path, "Access token rejected");
        let token = self.refresh_session().await?;
        self.replay(&request, &token).await
    }

    /// Send `request` and deserialize the payload into `T`.
    pub async fn send_as<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let value = self.send(request).await?;
        serde_json::from_value(value).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e))
        })
    }

    /// Obtain a fresh access token, joining a refresh already in flight
    /// instead of starting another one.
    pub async fn refresh_session(&self) -> Result<String, ApiError> {
        let role = {
            let mut state = self.inner.refresh_state();
            if state.in_progress {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Role::Follower(rx)
            } else {
                state.in_progress = true;
                Role::Leader(RefreshGuard {
                    inner: &self.inner,
                    finished: false,
                })
            }
        };

        match role {
            Role::Follower(rx) => {
                debug!("Waiting for in-flight token refresh");
                rx.await.unwrap_or_else(|_| {
                    Err(ApiError::Unauthorized(
                        "Token refresh was abandoned".to_string(),
                    ))
                })
            }
            Role::Leader(guard) => self.lead_refresh(guard).await,
        }
    }

    async fn lead_refresh(&self, guard: RefreshGuard<'_>) -> Result<String, ApiError> {
        info!("Refreshing access token");
        match self.request_token().await {
            Ok(token) => {
                self.inner
                    .session
                    .set_refreshed(token.clone(), self.inner.transport.cookies());
                let waiters = guard.finish();
                info!(waiters = waiters.len(), "Access token refreshed");
                for waiter in waiters {
                    // A waiter whose request was dropped no longer listens
                    let _ = waiter.send(Ok(token.clone()));
                }
                Ok(token)
            }
            Err(err) => {
                let waiters = guard.finish();
                error!(error = %err, waiters = waiters.len(), "Token refresh failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.expire_session();
                Err(err)
            }
        }
    }

    /// The refresh call itself. Any failure, including a timeout, is a
    /// failed refresh.
    async fn request_token(&self) -> Result<String, ApiError> {
        let request = ApiRequest::refresh();
        let response = self.dispatch(&request, None).await?;
        if !response.status.is_success() {
            return Err(match ApiError::from_status(response.status, &response.body) {
                err if response.status == StatusCode::UNAUTHORIZED && !err.is_unauthorized() => {
                    ApiError::Unauthorized(err.message())
                }
                err => err,
            });
        }

        let token = match Payload::decode(&response.body).into_data()? {
            Value::String(token) => Some(token),
            Value::Object(obj) => obj
                .get("token")
                .or_else(|| obj.get("accessToken"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        token.filter(|t| !t.is_empty()).ok_or_else(|| {
            ApiError::InvalidResponse("Refresh response did not contain a token".to_string())
        })
    }

    /// The one permitted retry, with the token from the refresh.
    async fn replay(&self, request: &ApiRequest, token: &str) -> Result<Value, ApiError> {
        let retry = request.as_retry();
        debug!(method = %retry.method, path = %retry.path, "Replaying request with refreshed token");
        let bearer = match retry.auth {
            Auth::Bearer => Some(token),
            Auth::Cookie | Auth::Public => None,
        };
        let response = self.dispatch(&retry, bearer).await?;
        Self::settle(&retry, response)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<RawResponse, ApiError> {
        let timeout = self.inner.timeout;
        match tokio::time::timeout(timeout, self.inner.transport.execute(request, bearer)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(method = %request.method, path = %request.path, ?timeout, "Request timed out");
                Err(ApiError::Timeout(timeout))
            }
        }
    }

    /// Turn a settled exchange into the caller's result. A 401 reaching this
    /// point is always `Unauthorized`, whatever code the body carries.
    fn settle(request: &ApiRequest, response: RawResponse) -> Result<Value, ApiError> {
        if response.status.is_success() {
            return Payload::decode(&response.body).into_data();
        }

        let err = ApiError::from_status(response.status, &response.body);
        let err = if response.status == StatusCode::UNAUTHORIZED && !err.is_unauthorized() {
            ApiError::Unauthorized(err.message())
        } else {
            err
        };
        debug!(
            method = %request.method,
            path = %request.path,
            status = response.status.as_u16(),
            code = %err.code(),
            "Request failed"
        );
        Err(err)
    }

    fn expire_session(&self) {
        self.inner.session.clear();
        navigation::redirect_to_login(self.inner.navigator.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeBackend, RefreshReply};
    use crate::navigation::{MemoryNavigator, LOGIN_PATH};
    use reqwest::Method;
    use serde_json::json;

    struct Harness {
        backend: Arc<FakeBackend>,
        navigator: MemoryNavigator,
        gateway: Gateway,
    }

    fn harness(backend: FakeBackend, token: Option<&str>) -> Harness {
        harness_with_timeout(backend, token, DEFAULT_TIMEOUT)
    }

    fn harness_with_timeout(backend: FakeBackend, token: Option<&str>, timeout: Duration) -> Harness {
        let backend = Arc::new(backend);
        let navigator = MemoryNavigator::new("/dashboard");
        let session = Session::in_memory();
        if let Some(token) = token {
            session.set_token(token.to_string());
        }
        let gateway = Gateway::new(
            backend.clone(),
            session,
            Arc::new(navigator.clone()),
            timeout,
        );
        Harness {
            backend,
            navigator,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_attaches_bearer_and_unwraps_envelope() {
        let backend = FakeBackend::new(Some("tok1"), RefreshReply::Status(401)).route(
            Method::GET,
            "/projects/p1",
            200,
            json!({"success": true, "message": "ok", "data": {"foo": 1}}),
        );
        let h = harness(backend, Some("tok1"));

        let value = h.gateway.send(ApiRequest::get("/projects/p1")).await.unwrap();
        assert_eq!(value, json!({"foo": 1}));

        let calls = h.backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bearer.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_raw_body_passes_through() {
        let backend = FakeBackend::new(Some("tok1"), RefreshReply::Status(401)).route(
            Method::GET,
            "/raw",
            200,
            json!({"foo": 1, "items": [1, 2]}),
        );
        let h = harness(backend, Some("tok1"));

        let value = h.gateway.send(ApiRequest::get("/raw")).await.unwrap();
        assert_eq!(value, json!({"foo": 1, "items": [1, 2]}));
    }

    #[tokio::test]
    async fn test_missing_token_sends_no_header() {
        let h = harness(FakeBackend::new(None, RefreshReply::Status(401)), None);
        h.gateway.send(ApiRequest::get("/health")).await.unwrap();
        assert!(h.backend.calls()[0].bearer.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let backend = FakeBackend::new(None, RefreshReply::Envelope("tok2".to_string()))
            .with_refresh_delay(Duration::from_millis(50));
        let h = harness(backend, Some("tok1"));

        let (a, b, c) = tokio::join!(
            h.gateway.send(ApiRequest::get("/projects")),
            h.gateway.send(ApiRequest::get("/auth/me")),
            h.gateway.send(ApiRequest::get("/projects/p1/commits")),
        );

        assert_eq!(a.unwrap(), json!({"path": "/projects"}));
        assert_eq!(b.unwrap(), json!({"path": "/auth/me"}));
        assert_eq!(c.unwrap(), json!({"path": "/projects/p1/commits"}));
        assert_eq!(h.backend.refresh_calls(), 1);

        for path in ["/projects", "/auth/me", "/projects/p1/commits"] {
            let calls = h.backend.calls_to(path);
            assert_eq!(calls.len(), 2, "path {}", path);
            assert_eq!(calls[0].bearer.as_deref(), Some("tok1"));
            assert!(!calls[0].retried);
            assert_eq!(calls[1].bearer.as_deref(), Some("tok2"));
            assert!(calls[1].retried);
        }
        assert_eq!(h.gateway.session().token().as_deref(), Some("tok2"));
        assert!(!h.gateway.is_refreshing());
        assert!(h.navigator.forced().is_empty());
    }

    #[tokio::test]
    async fn test_late_401_reuses_completed_refresh() {
        let backend = FakeBackend::new(None, RefreshReply::Envelope("tok2".to_string()))
            .with_refresh_delay(Duration::from_millis(10))
            .with_route_delay("/slow", Duration::from_millis(100));
        let h = harness(backend, Some("tok1"));

        let (fast, slow) = tokio::join!(
            h.gateway.send(ApiRequest::get("/fast")),
            h.gateway.send(ApiRequest::get("/slow")),
        );

        assert_eq!(fast.unwrap(), json!({"path": "/fast"}));
        assert_eq!(slow.unwrap(), json!({"path": "/slow"}));
        assert_eq!(h.backend.refresh_calls(), 1);

        let calls = h.backend.calls_to("/slow");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].bearer.as_deref(), Some("tok1"));
        assert_eq!(calls[1].bearer.as_deref(), Some("tok2"));
        assert!(calls[1].retried);
        assert_eq!(h.gateway.session().token().as_deref(), Some("tok2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_across_tasks() {
        let backend = FakeBackend::new(None, RefreshReply::Envelope("tok2".to_string()))
            .with_refresh_delay(Duration::from_millis(100));
        let h = harness(backend, Some("tok1"));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let gateway = h.gateway.clone();
                tokio::spawn(async move { gateway.send(ApiRequest::get(format!("/items/{}", i))).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.gateway.session().token().as_deref(), Some("tok2"));
    }

    #[tokio::test]
    async fn test_refresh_call_rejected_logs_out() {
        let h = harness(FakeBackend::new(None, RefreshReply::Status(401)), Some("tok1"));

        let err = h.gateway.send(ApiRequest::refresh()).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!h.gateway.session().is_authenticated());
        assert_eq!(h.navigator.forced(), vec![LOGIN_PATH.to_string()]);
        assert_eq!(h.backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_call_rejected_on_login_view_does_not_navigate() {
        let h = harness(FakeBackend::new(None, RefreshReply::Status(401)), Some("tok1"));
        h.navigator.visit(LOGIN_PATH);

        let err = h.gateway.send(ApiRequest::refresh()).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(h.navigator.forced().is_empty());
        assert!(h.gateway.session().token().is_none());
    }

    #[tokio::test]
    async fn test_retried_401_is_not_refreshed_again() {
        let backend = FakeBackend::new(None, RefreshReply::Envelope("tok3".to_string()))
            .reject_always("/projects");
        let h = harness(backend, Some("tok1"));

        let err = h.gateway.send(ApiRequest::get("/projects")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(h.backend.refresh_calls(), 1);

        let calls = h.backend.calls_to("/projects");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].bearer.as_deref(), Some("tok3"));
        // The refresh itself succeeded, so its token stays
        assert_eq!(h.gateway.session().token().as_deref(), Some("tok3"));
        assert!(h.navigator.forced().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_rejects_every_waiter() {
        let backend = FakeBackend::new(None, RefreshReply::Status(500))
            .with_refresh_delay(Duration::from_millis(50));
        let h = harness(backend, Some("tok1"));

        let (a, b, c) = tokio::join!(
            h.gateway.send(ApiRequest::get("/a")),
            h.gateway.send(ApiRequest::get("/b")),
            h.gateway.send(ApiRequest::get("/c")),
        );

        let a = a.unwrap_err();
        assert_eq!(a, ApiError::Server("Refresh failed".to_string()));
        assert_eq!(b.unwrap_err(), a);
        assert_eq!(c.unwrap_err(), a);

        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(h.backend.calls().iter().all(|c| !c.retried));
        assert!(!h.gateway.session().is_authenticated());
        assert_eq!(h.navigator.forced(), vec![LOGIN_PATH.to_string()]);
        assert!(!h.gateway.is_refreshing());
        assert_eq!(h.gateway.pending_waiters(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_is_a_failed_refresh() {
        let backend = FakeBackend::new(None, RefreshReply::Hang);
        let h = harness_with_timeout(backend, Some("tok1"), Duration::from_secs(1));

        let (a, b) = tokio::join!(
            h.gateway.send(ApiRequest::get("/a")),
            h.gateway.send(ApiRequest::get("/b")),
        );

        assert_eq!(a.unwrap_err(), ApiError::Timeout(Duration::from_secs(1)));
        assert_eq!(b.unwrap_err(), ApiError::Timeout(Duration::from_secs(1)));
        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(!h.gateway.session().is_authenticated());
        assert!(h.navigator.was_redirected_to_login());
        assert!(!h.gateway.is_refreshing());
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let h = harness(FakeBackend::new(None, RefreshReply::Hang), Some("tok1"));

        let leader_gateway = h.gateway.clone();
        let leader = tokio::spawn(async move { leader_gateway.send(ApiRequest::get("/a")).await });
        while !h.gateway.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let follower_gateway = h.gateway.clone();
        let follower =
            tokio::spawn(async move { follower_gateway.send(ApiRequest::get("/b")).await });
        while h.gateway.pending_waiters() == 0 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let err = follower.await.unwrap().unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!h.gateway.is_refreshing());
        assert_eq!(h.gateway.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_non_auth_failures_pass_through() {
        let backend = FakeBackend::new(Some("tok1"), RefreshReply::Status(401))
            .route_raw(Method::GET, "/boom", 500, "kaput")
            .route(
                Method::POST,
                "/projects",
                422,
                json!({"message": "Name already used", "code": "VALIDATION_ERROR"}),
            );
        let h = harness(backend, Some("tok1"));

        let err = h.gateway.send(ApiRequest::get("/boom")).await.unwrap_err();
        assert!(matches!(err, ApiError::Server(ref m) if m.contains("kaput")));

        let err = h.gateway.send(ApiRequest::post("/projects")).await.unwrap_err();
        assert_eq!(err, ApiError::Validation("Name already used".to_string()));

        assert_eq!(h.backend.refresh_calls(), 0);
        assert_eq!(h.gateway.session().token().as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn test_network_error_is_not_retried() {
        let h = harness(FakeBackend::new(Some("tok1"), RefreshReply::Status(401)).offline(), Some("tok1"));

        let err = h.gateway.send(ApiRequest::get("/projects")).await.unwrap_err();
        assert_eq!(err, ApiError::Network("connection refused".to_string()));
        assert_eq!(h.backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_bare_string_refresh_and_cookie_capture() {
        let backend = FakeBackend::new(None, RefreshReply::Bare("tok9".to_string()))
            .with_cookies("refresh_token=r2");
        let h = harness(backend, Some("tok1"));

        h.gateway.send(ApiRequest::get("/projects")).await.unwrap();
        assert_eq!(h.gateway.session().token().as_deref(), Some("tok9"));
        assert_eq!(h.gateway.session().cookies().as_deref(), Some("refresh_token=r2"));
        // Refresh goes out on cookies only
        assert!(h.backend.calls_to("/auth/refresh")[0].bearer.is_none());

        // Later calls use the new token without another refresh
        h.gateway.send(ApiRequest::get("/auth/me")).await.unwrap();
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.backend.calls_to("/auth/me")[0].bearer.as_deref(), Some("tok9"));
    }

    #[tokio::test]
    async fn test_public_401_is_not_recovered() {
        let backend = FakeBackend::new(None, RefreshReply::Envelope("tok2".to_string())).route(
            Method::POST,
            "/auth/login",
            401,
            json!({"message": "Invalid email or password", "code": "UNAUTHORIZED"}),
        );
        let h = harness(backend, None);

        let err = h
            .gateway
            .send(ApiRequest::post("/auth/login").public())
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Unauthorized("Invalid email or password".to_string()));
        assert_eq!(h.backend.refresh_calls(), 0);
        assert!(h.navigator.forced().is_empty());
    }

    #[tokio::test]
    async fn test_send_as_reports_shape_mismatch() {
        let h = harness(FakeBackend::new(Some("tok1"), RefreshReply::Status(401)), Some("tok1"));
        let result: Result<Vec<String>, ApiError> = h.gateway.send_as(ApiRequest::get("/x")).await;
        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }
}
