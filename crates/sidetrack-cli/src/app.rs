//! Application context for the `sidetrack` command.
//!
//! `App` owns the one `Session` of the process and wires it into the gateway
//! together with the HTTP transport and the navigator. Each command runs
//! against that context, then the navigator is checked for a forced
//! redirect to the login view.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use tracing::{debug, info, warn};

use sidetrack_core::api::{ApiClient, ApiError, Gateway, HttpTransport};
use sidetrack_core::auth::{MemoryStore, Session, SessionBackend, SessionStore};
use sidetrack_core::cache::{CacheManager, CachedData};
use sidetrack_core::config::Config;
use sidetrack_core::models::{ProfileUpdate, ProjectInput};
use sidetrack_core::navigation::{MemoryNavigator, LANDING_PATH};

use crate::commands::{Commands, ProjectArgs, ProjectChanges, ProjectCommands, SettingsCommands};
use crate::render;

/// Environment variable holding the password for non-interactive logins.
const PASSWORD_ENV: &str = "SIDETRACK_PASSWORD";

pub struct App {
    config: Config,
    session: Session,
    navigator: MemoryNavigator,
    client: ApiClient,
}

impl App {
    /// Build the context. With `ephemeral`, nothing about the session is
    /// read from or written to disk.
    pub fn new(ephemeral: bool) -> Result<Self> {
        let config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        debug!(api = %config.api_base_url, backend = %config.session_backend, "Config loaded");

        let backend = if ephemeral {
            SessionBackend::Memory
        } else {
            config.session_backend
        };
        let store = Self::open_store(&config, backend);

        let session = Session::new(store);
        match session.load() {
            Ok(restored) => debug!(restored, "Session loaded"),
            Err(e) => warn!(error = %e, "Failed to load stored session"),
        }

        let transport = Arc::new(HttpTransport::new(
            &config.api_base_url,
            config.request_timeout(),
        )?);
        if let Some(cookies) = session.cookies() {
            transport.restore_cookies(&cookies);
        }

        let navigator = MemoryNavigator::new(LANDING_PATH);
        let gateway = Gateway::new(
            transport,
            session.clone(),
            Arc::new(navigator.clone()),
            config.request_timeout(),
        );

        Ok(Self {
            config,
            session,
            navigator,
            client: ApiClient::new(gateway),
        })
    }

    fn open_store(config: &Config, backend: SessionBackend) -> Arc<dyn SessionStore> {
        let opened = config
            .app_cache_dir()
            .and_then(|dir| backend.open(&dir));
        match opened {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, %backend, "Session store unavailable, session will not persist");
                Arc::new(MemoryStore::default())
            }
        }
    }

    /// Cache of the logged-in user, if one is known.
    fn cache(&self) -> Option<CacheManager> {
        let user = self.session.user()?;
        let opened = self
            .config
            .user_cache_dir(&user.id)
            .and_then(CacheManager::new);
        match opened {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = %e, "Cache unavailable");
                None
            }
        }
    }

    fn require_login(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            bail!("Not logged in. Run `sidetrack login` first.");
        }
        Ok(())
    }

    pub async fn run(&mut self, command: Commands) -> Result<()> {
        self.navigator.visit(command.route());

        let result = match command {
            Commands::Login { email } => self.login(email).await,
            Commands::Register { name, email } => self.register(&name, &email).await,
            Commands::Logout => self.logout().await,
            Commands::Whoami => self.whoami().await,
            Commands::Projects { command } => self.projects(command).await,
            Commands::Dashboard { days, offline } => self.dashboard(days, offline).await,
            Commands::Settings { command } => self.settings(command).await,
        };

        if self.navigator.was_redirected_to_login() {
            info!("Session could not be recovered");
            bail!("Your session has expired. Run `sidetrack login` to sign in again.");
        }
        result
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email.or_else(|| self.config.last_email.clone()) {
            Some(email) => email,
            None => prompt("Email: ")?,
        };
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) if !password.is_empty() => password,
            _ => rpassword::prompt_password("Password: ")?,
        };

        let user = self
            .client
            .login(&email, &password)
            .await
            .map_err(|e| anyhow::anyhow!(login_message(&e)))?;

        if let Err(e) = Config::remember_email(&email) {
            warn!(error = %e, "Failed to save config");
        }
        self.config.last_email = Some(email.trim().to_string());

        println!("Logged in as {} <{}>", user.name, user.email);
        Ok(())
    }

    async fn register(&mut self, name: &str, email: &str) -> Result<()> {
        let password = rpassword::prompt_password("Password: ")?;
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }

        let user = self.client.register(name, email, &password).await?;
        if let Err(e) = Config::remember_email(email) {
            warn!(error = %e, "Failed to save config");
        }
        println!("Welcome, {}! You are logged in.", user.name);
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        // Resolve the cache while the user is still known
        let cache = self.cache();

        if let Err(e) = self.client.logout().await {
            eprintln!("Warning: the server did not confirm the logout ({})", e.message());
        }
        if let Some(cache) = cache {
            if let Err(e) = cache.clear() {
                warn!(error = %e, "Failed to clear cache");
            }
        }
        println!("Logged out.");
        Ok(())
    }

    async fn whoami(&mut self) -> Result<()> {
        self.require_login()?;
        match self.client.current_user().await {
            Ok(user) => render::user(&user),
            Err(e) if is_offline(&e) => {
                let user = self.session.user().context("No stored profile")?;
                eprintln!("Offline, showing stored profile ({})", e.message());
                render::user(&user);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    // =========================================================================
    // Projects
    // =========================================================================

    async fn projects(&mut self, command: ProjectCommands) -> Result<()> {
        self.require_login()?;
        let now = Utc::now();

        match command {
            ProjectCommands::List { status } => {
                let fetched = self.client.list_projects().await;
                if let (Ok(projects), Some(cache)) = (&fetched, self.cache()) {
                    if let Err(e) = cache.save_projects(projects) {
                        warn!(error = %e, "Failed to cache projects");
                    }
                }
                let (projects, age) = or_cached(fetched, || {
                    self.cache().and_then(|c| c.load_projects().ok().flatten())
                })?;
                if let Some(age) = age {
                    eprintln!("Offline, showing projects cached {}", age);
                }
                let shown: Vec<_> = projects
                    .into_iter()
                    .filter(|p| status.map_or(true, |s| p.status == s))
                    .collect();
                render::project_table(&shown, now);
            }
            ProjectCommands::Show { id } => {
                let project = self.client.get_project(&id).await?;
                render::project(&project);
            }
            ProjectCommands::Add(args) => {
                let project = self.client.create_project(&project_input(args)).await?;
                println!("Added {} ({})", project.name, project.id);
            }
            ProjectCommands::Edit { id, changes } => {
                let current = self.client.get_project(&id).await?;
                let input = apply_changes(ProjectInput::from_project(&current), changes);
                let project = self.client.update_project(&id, &input).await?;
                render::project(&project);
            }
            ProjectCommands::Rm { id, yes } => {
                if !yes && !confirm(&format!("Delete project {}?", id))? {
                    println!("Cancelled.");
                    return Ok(());
                }
                self.client.delete_project(&id).await?;
                println!("Deleted {}", id);
            }
            ProjectCommands::Commits { id, limit } => {
                let fetched = self.client.project_commits(&id).await;
                if let (Ok(commits), Some(cache)) = (&fetched, self.cache()) {
                    if let Err(e) = cache.save_commits(&id, commits) {
                        warn!(error = %e, "Failed to cache commits");
                    }
                }
                let (commits, age) = or_cached(fetched, || {
                    self.cache().and_then(|c| c.load_commits(&id).ok().flatten())
                })?;
                if let Some(age) = age {
                    eprintln!("Offline, showing commits cached {}", age);
                }
                render::commits(&commits, limit, now);
            }
            ProjectCommands::Sync { id } => {
                let project = self.client.sync_project(&id).await?;
                println!(
                    "Synced {}: {} commits",
                    project.name, project.commit_count
                );
            }
        }
        Ok(())
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    async fn dashboard(&mut self, days: u32, offline: bool) -> Result<()> {
        if offline {
            let cached = self
                .cache()
                .and_then(|c| c.load_dashboard().ok().flatten())
                .context("No cached dashboard. Run `sidetrack dashboard` while online first.")?;
            if cached.is_stale() {
                eprintln!("The cached dashboard is over an hour old.");
            }
            render::dashboard(&cached.data, Some(&cached.age_display()));
            return Ok(());
        }

        self.require_login()?;
        let fetched = self.client.dashboard(Local::now().fixed_offset(), days).await;
        if let (Ok(stats), Some(cache)) = (&fetched, self.cache()) {
            if let Err(e) = cache.save_dashboard(stats) {
                warn!(error = %e, "Failed to cache dashboard");
            }
        }
        let (stats, age) = or_cached(fetched, || {
            self.cache().and_then(|c| c.load_dashboard().ok().flatten())
        })?;
        if age.is_some() {
            eprintln!("Offline, showing the last cached dashboard");
        }
        render::dashboard(&stats, age.as_deref());
        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    async fn settings(&mut self, command: SettingsCommands) -> Result<()> {
        self.require_login()?;

        match command {
            SettingsCommands::Profile { name, email } => {
                let update = ProfileUpdate { name, email };
                if update.is_empty() {
                    bail!("Nothing to change. Pass --name and/or --email.");
                }
                let user = self.client.update_profile(&update).await?;
                render::user(&user);
            }
            SettingsCommands::Password => {
                let current = rpassword::prompt_password("Current password: ")?;
                let new = rpassword::prompt_password("New password: ")?;
                let confirm = rpassword::prompt_password("Confirm new password: ")?;
                if new != confirm {
                    bail!("Passwords do not match");
                }
                self.client.change_password(&current, &new).await?;
                println!("Password changed.");
            }
            SettingsCommands::GithubLink { token } => {
                let token = match token {
                    Some(token) => token,
                    None => rpassword::prompt_password("GitHub personal access token: ")?,
                };
                let user = self.client.link_github(&token).await?;
                println!("GitHub linked: {}", user.github_display());
            }
            SettingsCommands::GithubUnlink => {
                self.client.unlink_github().await?;
                println!("GitHub token removed.");
            }
            SettingsCommands::DeleteAccount { yes } => {
                if !yes && !confirm("Permanently delete your account and all projects?")? {
                    println!("Cancelled.");
                    return Ok(());
                }
                let cache = self.cache();
                self.client.delete_account().await?;
                if let Some(cache) = cache {
                    if let Err(e) = cache.clear() {
                        warn!(error = %e, "Failed to clear cache");
                    }
                }
                println!("Account deleted.");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn is_offline(err: &ApiError) -> bool {
    matches!(err, ApiError::Network(_) | ApiError::Timeout(_))
}

/// User-facing text for a failed login.
fn login_message(err: &ApiError) -> String {
    match err {
        ApiError::Unauthorized(_) => "Invalid email or password".to_string(),
        ApiError::Network(_) => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        ApiError::Timeout(_) => "Connection timed out. Please try again.".to_string(),
        other => format!("Login failed: {}", other.message()),
    }
}

/// The fetched data, or the cached copy and its age when the API is out of
/// reach. Other errors, and an empty cache, keep the fetch error.
fn or_cached<T>(
    fetched: Result<T, ApiError>,
    cached: impl FnOnce() -> Option<CachedData<T>>,
) -> Result<(T, Option<String>), ApiError> {
    match fetched {
        Ok(data) => Ok((data, None)),
        Err(e) if is_offline(&e) => match cached() {
            Some(cached) => {
                info!(error = %e, age = %cached.age_display(), "Using cached data");
                let age = cached.age_display();
                Ok((cached.data, Some(age)))
            }
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}

fn project_input(args: ProjectArgs) -> ProjectInput {
    ProjectInput {
        name: args.name,
        description: args.description,
        repo_url: args.repo,
        status: args.status,
        tags: args.tags,
    }
}

fn apply_changes(mut input: ProjectInput, changes: ProjectChanges) -> ProjectInput {
    if let Some(name) = changes.name {
        input.name = name;
    }
    if let Some(repo) = changes.repo {
        input.repo_url = repo;
    }
    if let Some(description) = changes.description {
        input.description = Some(description);
    }
    if let Some(status) = changes.status {
        input.status = Some(status);
    }
    if let Some(tags) = changes.tags {
        input.tags = tags;
    }
    input
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{} [y/N]: ", question))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}
