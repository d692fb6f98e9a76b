//! Typed client for the side-project tracker API.
//!
//! Every method builds an [`ApiRequest`], validates user input first where
//! there is any, and hands the request to the shared [`Gateway`]. Token
//! handling, refresh and logout-on-failure all live in the gateway.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::models::{AuthResponse, Commit, DashboardStats, ProfileUpdate, Project, ProjectInput, User};
use crate::{stats, validation};

use super::{ApiError, ApiRequest, Gateway};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const LOGOUT_PATH: &str = "/auth/logout";
const ME_PATH: &str = "/auth/me";
const PROJECTS_PATH: &str = "/projects";
const PROFILE_PATH: &str = "/users/me";
const PASSWORD_PATH: &str = "/users/me/password";
const GITHUB_TOKEN_PATH: &str = "/users/me/github-token";

/// Clone is cheap; clones share the gateway and therefore the session.
#[derive(Clone)]
pub struct ApiClient {
    gateway: Gateway,
}

impl ApiClient {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn session(&self) -> &Session {
        self.gateway.session()
    }

    /// Reject ids that would change the shape of the URL.
    fn project_path(id: &str, suffix: &str) -> Result<String, ApiError> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '?', '#']) {
            return Err(ApiError::Validation(format!("Invalid project id '{}'", id)));
        }
        Ok(format!("{}/{}{}", PROJECTS_PATH, id, suffix))
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        validation::validate_email(email)?;
        if password.is_empty() {
            return Err(ApiError::Validation("Password is required".to_string()));
        }

        let request = ApiRequest::post(LOGIN_PATH)
            .public()
            .json(&json!({"email": email.trim(), "password": password}))?;
        let auth: AuthResponse = self.gateway.send_as(request).await?;
        info!(user_id = %auth.user.id, "Logged in");
        Ok(self.establish(auth))
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, ApiError> {
        validation::validate_name(name)?;
        validation::validate_email(email)?;
        validation::validate_password(password)?;

        let request = ApiRequest::post(REGISTER_PATH).public().json(&json!({
            "name": name.trim(),
            "email": email.trim(),
            "password": password,
        }))?;
        let auth: AuthResponse = self.gateway.send_as(request).await?;
        info!(user_id = %auth.user.id, "Registered");
        Ok(self.establish(auth))
    }

    fn establish(&self, auth: AuthResponse) -> User {
        let user = auth.user;
        self.session()
            .establish(auth.token, user.clone(), self.gateway.cookies());
        user
    }

    /// Ask the backend to revoke the refresh cookie. The local session is
    /// cleared whatever the outcome.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = self.gateway.send(ApiRequest::post(LOGOUT_PATH)).await;
        self.session().clear();
        match result {
            Ok(_) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Logout request failed, local session cleared anyway");
                Err(e)
            }
        }
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let user: User = self.gateway.send_as(ApiRequest::get(ME_PATH)).await?;
        self.session().set_user(user.clone());
        Ok(user)
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        let projects: Vec<Project> = self.gateway.send_as(ApiRequest::get(PROJECTS_PATH)).await?;
        debug!(count = projects.len(), "Fetched projects");
        Ok(projects)
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, ApiError> {
        let path = Self::project_path(id, "")?;
        self.gateway.send_as(ApiRequest::get(path)).await
    }

    pub async fn create_project(&self, input: &ProjectInput) -> Result<Project, ApiError> {
        let input = validation::validate_project(input)?;
        let request = ApiRequest::post(PROJECTS_PATH).json(&input)?;
        let project: Project = self.gateway.send_as(request).await?;
        info!(project_id = %project.id, "Created project");
        Ok(project)
    }

    pub async fn update_project(&self, id: &str, input: &ProjectInput) -> Result<Project, ApiError> {
        let path = Self::project_path(id, "")?;
        let input = validation::validate_project(input)?;
        let request = ApiRequest::put(path).json(&input)?;
        self.gateway.send_as(request).await
    }

    pub async fn delete_project(&self, id: &str) -> Result<(), ApiError> {
        let path = Self::project_path(id, "")?;
        self.gateway.send(ApiRequest::delete(path)).await?;
        info!(project_id = %id, "Deleted project");
        Ok(())
    }

    pub async fn project_commits(&self, id: &str) -> Result<Vec<Commit>, ApiError> {
        let path = Self::project_path(id, "/commits")?;
        self.gateway.send_as(ApiRequest::get(path)).await
    }

    /// Ask the backend to pull new commits from GitHub.
    pub async fn sync_project(&self, id: &str) -> Result<Project, ApiError> {
        let path = Self::project_path(id, "/sync")?;
        self.gateway.send_as(ApiRequest::post(path)).await
    }

    /// Fetch every project and its commits, then compute the dashboard.
    ///
    /// Commit lists are fetched concurrently. A project whose commits fail to
    /// load falls back to its stored counters, except for an authorization
    /// failure, which ends the whole dashboard.
    pub async fn dashboard(&self, now: DateTime<FixedOffset>, days: u32) -> Result<DashboardStats, ApiError> {
        let projects = self.list_projects().await?;

        let fetches = projects.iter().map(|p| async move {
            (p.id.clone(), self.project_commits(&p.id).await)
        });
        let mut commits = HashMap::new();
        for (id, result) in join_all(fetches).await {
            match result {
                Ok(list) => {
                    commits.insert(id, list);
                }
                Err(e) if e.is_unauthorized() => return Err(e),
                Err(e) => warn!(project_id = %id, error = %e, "Failed to fetch commits, using stored counts"),
            }
        }

        Ok(stats::aggregate(&projects, &commits, now, days))
    }

    /// [`Self::dashboard`] at the current instant in UTC.
    pub async fn dashboard_now(&self, days: u32) -> Result<DashboardStats, ApiError> {
        self.dashboard(Utc::now().fixed_offset(), days).await
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        validation::validate_profile(update)?;
        let request = ApiRequest::put(PROFILE_PATH).json(update)?;
        let user: User = self.gateway.send_as(request).await?;
        self.session().set_user(user.clone());
        Ok(user)
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), ApiError> {
        if current.is_empty() {
            return Err(ApiError::Validation("Current password is required".to_string()));
        }
        validation::validate_password(new)?;
        if current == new {
            return Err(ApiError::Validation(
                "New password must differ from the current one".to_string(),
            ));
        }

        let request = ApiRequest::put(PASSWORD_PATH)
            .json(&json!({"currentPassword": current, "newPassword": new}))?;
        self.gateway.send(request).await?;
        info!("Password changed");
        Ok(())
    }

    pub async fn link_github(&self, token: &str) -> Result<User, ApiError> {
        let token = token.trim();
        validation::validate_github_token(token)?;
        let request = ApiRequest::put(GITHUB_TOKEN_PATH).json(&json!({ "token": token }))?;
        let user: User = self.gateway.send_as(request).await?;
        self.session().set_user(user.clone());
        info!(github = %user.github_display(), "Linked GitHub account");
        Ok(user)
    }

    pub async fn unlink_github(&self) -> Result<User, ApiError> {
        let user: User = self
            .gateway
            .send_as(ApiRequest::delete(GITHUB_TOKEN_PATH))
            .await?;
        self.session().set_user(user.clone());
        Ok(user)
    }

    /// Delete the account. The session is cleared only once the backend
    /// confirms.
    pub async fn delete_account(&self) -> Result<(), ApiError> {
        self.gateway.send(ApiRequest::delete(PROFILE_PATH)).await?;
        self.session().clear();
        info!("Account deleted");
        Ok(())
    }
}
