//! Navigation primitive shared with the front end.
//!
//! The gateway only needs to know where the user currently is and to send
//! them to the login view when their session cannot be recovered.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

/// Route of the login view.
pub const LOGIN_PATH: &str = "/login";

/// Route of the public landing view.
pub const LANDING_PATH: &str = "/";

pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn force_navigate(&self, path: &str);
}

/// True for views a logged-out user may stay on.
pub fn is_public_view(path: &str) -> bool {
    path == LOGIN_PATH || path == LANDING_PATH
}

/// Send the user to the login view unless they are already on a public view.
/// Returns whether a navigation happened.
pub fn redirect_to_login(navigator: &dyn Navigator) -> bool {
    let current = navigator.current_path();
    if is_public_view(&current) {
        return false;
    }
    info!(from = %current, "Redirecting to login");
    navigator.force_navigate(LOGIN_PATH);
    true
}

/// In-process navigator that tracks the current route and every forced
/// navigation.
#[derive(Clone, Default)]
pub struct MemoryNavigator {
    inner: Arc<Mutex<NavState>>,
}

#[derive(Default)]
struct NavState {
    current: String,
    forced: Vec<String>,
}

impl MemoryNavigator {
    pub fn new(initial: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NavState {
                current: initial.to_string(),
                forced: Vec::new(),
            })),
        }
    }

    /// Move to `path` as part of normal use (not a forced redirect).
    pub fn visit(&self, path: &str) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).current = path.to_string();
    }

    /// Forced navigations in the order they happened.
    pub fn forced(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forced
            .clone()
    }

    pub fn was_redirected_to_login(&self) -> bool {
        self.forced().iter().any(|p| p == LOGIN_PATH)
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    fn force_navigate(&self, path: &str) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.current = path.to_string();
        state.forced.push(path.to_string());
    }
}
