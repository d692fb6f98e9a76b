//! Data models for the side-project tracker API.
//!
//! - `User`, `AuthResponse`, `ProfileUpdate`: account and authentication
//! - `Project`, `ProjectInput`, `ProjectStatus`: tracked side-projects
//! - `Commit`: GitHub commits mirrored by the backend
//! - Dashboard types: `DashboardStats` and its parts, computed client-side

pub mod commit;
pub mod dashboard;
pub mod project;
pub mod user;

pub use commit::Commit;
pub use dashboard::{DailyCount, DashboardStats, ProjectActivity, RecentCommit, Streaks};
pub use project::{Project, ProjectInput, ProjectStatus};
pub use user::{AuthResponse, ProfileUpdate, User};
