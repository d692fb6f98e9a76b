//! Client-side checks run before a request leaves the process.
//!
//! Every failure is an `ApiError::Validation`, the same variant the backend's
//! `VALIDATION_ERROR` maps to, so callers handle both identically.

use crate::api::ApiError;
use crate::models::{ProfileUpdate, ProjectInput};

const MAX_PROJECT_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const MIN_PASSWORD_LEN: usize = 8;
const MIN_PAT_LEN: usize = 20;

/// Prefixes GitHub uses for its token kinds (classic, fine-grained, OAuth,
/// user-to-server, server-to-server).
const PAT_PREFIXES: [&str; 5] = ["ghp_", "github_pat_", "gho_", "ghu_", "ghs_"];

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError::Validation(message.into())
}

fn is_repo_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Normalize a repository reference to `owner/repo`.
///
/// Accepts `owner/repo`, `github.com/owner/repo` and
/// `http(s)://[www.]github.com/owner/repo[.git][/]`.
pub fn normalize_repo(input: &str) -> Result<String, ApiError> {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_host = without_scheme
        .strip_prefix("www.github.com/")
        .or_else(|| without_scheme.strip_prefix("github.com/"));

    let path = match without_host {
        Some(path) => path,
        // A scheme without a GitHub host is some other site
        None if without_scheme.len() != trimmed.len() => {
            return Err(invalid("Repository must be hosted on github.com"))
        }
        None => without_scheme,
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(owner), Some(repo), None) if is_repo_segment(owner) && is_repo_segment(repo) => {
            Ok(format!("{}/{}", owner, repo))
        }
        _ => Err(invalid(format!(
            "Repository must look like owner/repo, got '{}'",
            trimmed
        ))),
    }
}

/// Validate and normalize a project form. The returned input has a trimmed
/// name, no blank description, deduplicated tags and the repository as
/// `https://github.com/owner/repo`.
pub fn validate_project(input: &ProjectInput) -> Result<ProjectInput, ApiError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(invalid("Project name is required"));
    }
    if name.chars().count() > MAX_PROJECT_NAME_LEN {
        return Err(invalid(format!(
            "Project name must be at most {} characters",
            MAX_PROJECT_NAME_LEN
        )));
    }

    let description = input
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
        return Err(invalid(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }

    let repo = normalize_repo(&input.repo_url)?;

    let mut tags: Vec<String> = Vec::new();
    for tag in input.tags.iter().map(|t| t.trim().to_lowercase()) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Ok(ProjectInput {
        name: name.to_string(),
        description: description.map(str::to_string),
        repo_url: format!("https://github.com/{}", repo),
        status: input.status,
        tags,
    })
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(invalid("Email address is not valid"))
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err(invalid("Password must contain a letter and a digit"));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        Err(invalid("Name is required"))
    } else {
        Ok(())
    }
}

pub fn validate_profile(update: &ProfileUpdate) -> Result<(), ApiError> {
    if update.is_empty() {
        return Err(invalid("Nothing to update"));
    }
    if let Some(ref name) = update.name {
        validate_name(name)?;
    }
    if let Some(ref email) = update.email {
        validate_email(email)?;
    }
    Ok(())
}

/// Shape check for a GitHub Personal Access Token. The backend verifies the
/// token against GitHub; this only catches pasting mistakes.
pub fn validate_github_token(token: &str) -> Result<(), ApiError> {
    if token.chars().any(char::is_whitespace) {
        return Err(invalid("GitHub token must not contain whitespace"));
    }
    if !PAT_PREFIXES.iter().any(|p| token.starts_with(p)) {
        return Err(invalid("This does not look like a GitHub token"));
    }
    if token.len() < MIN_PAT_LEN {
        return Err(invalid("GitHub token is too short"));
    }
    Ok(())
}
