//! Command-line surface.

use clap::{Args, Subcommand};
use sidetrack_core::models::ProjectStatus;
use sidetrack_core::stats::{DEFAULT_DAYS, MAX_DAYS};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in with email and password
    Login {
        /// Account email (defaults to the last one used)
        #[arg(short, long, env = "SIDETRACK_EMAIL")]
        email: Option<String>,
    },

    /// Create an account and log in
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
    },

    /// Log out and forget the stored session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Manage tracked projects
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Commit activity across all projects
    Dashboard {
        /// Days of history in the daily chart (1-365)
        #[arg(
            long,
            default_value_t = DEFAULT_DAYS,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_DAYS))
        )]
        days: u32,

        /// Show the last cached dashboard without contacting the API
        #[arg(long)]
        offline: bool,
    },

    /// Account settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// List projects
    List {
        /// Only projects with this status
        #[arg(long)]
        status: Option<ProjectStatus>,
    },
    /// Show one project
    Show { id: String },
    /// Track a new project
    Add(ProjectArgs),
    /// Change a project; omitted fields keep their value
    Edit {
        id: String,
        #[command(flatten)]
        changes: ProjectChanges,
    },
    /// Stop tracking a project
    Rm {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Commits of a project, newest first
    Commits {
        id: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Pull new commits from GitHub
    Sync { id: String },
}

#[derive(Args, Debug)]
pub struct ProjectArgs {
    pub name: String,
    /// `owner/repo` or a github.com URL
    #[arg(short, long)]
    pub repo: String,
    #[arg(short, long)]
    pub description: Option<String>,
    #[arg(short, long)]
    pub status: Option<ProjectStatus>,
    /// Comma-separated tags
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct ProjectChanges {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub status: Option<ProjectStatus>,
    /// Replace the tags (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub tags: Option<Vec<String>>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Change name or email
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Change password (prompted)
    Password,
    /// Link a GitHub personal access token (prompted unless given)
    GithubLink {
        #[arg(long, env = "SIDETRACK_GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Remove the linked GitHub token
    GithubUnlink,
    /// Permanently delete the account
    DeleteAccount {
        #[arg(short, long)]
        yes: bool,
    },
}

impl Commands {
    /// View route the command stands for. A failed session recovery only
    /// redirects from views that need a login.
    pub fn route(&self) -> &'static str {
        match self {
            Commands::Login { .. } => "/login",
            Commands::Register { .. } => "/register",
            Commands::Logout => "/",
            Commands::Whoami | Commands::Settings { .. } => "/settings",
            Commands::Projects { .. } => "/projects",
            Commands::Dashboard { .. } => "/dashboard",
        }
    }
}
