//! Git metadata for heartbeats.
//!
//! Looks up the repository around the working directory so heartbeats
//! can carry project, branch, and remote information. Everything here
//! is best effort; a heartbeat outside any repository is still valid.

use std::path::Path;

/// Repository metadata attached to heartbeats.
#[derive(Debug, Default)]
pub struct RepoInfo {
    /// Directory name of the repository working tree.
    pub project: Option<String>,
    /// Current branch name, if HEAD points to a branch.
    pub branch: Option<String>,
    /// URL of the "origin" remote, if configured.
    pub remote_url: Option<String>,
}

/// Collects repository metadata for the given path.
///
/// Returns empty metadata when the path is not inside a repository.
pub fn repo_info(path: &Path) -> RepoInfo {
    let repo = match git2::Repository::discover(path) {
        Ok(repo) => repo,
        Err(e) => {
            tracing::debug!("No git repository around {}: {}", path.display(), e);
            return RepoInfo::default();
        }
    };

    let project = repo
        .workdir()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().to_string());

    let branch = repo
        .head()
        .ok()
        .as_ref()
        .and_then(|h| h.shorthand())
        .map(|s| s.to_string());

    let remote_url = repo
        .find_remote("origin")
        .ok()
        .and_then(|r| r.url().map(|s| s.to_string()));

    RepoInfo {
        project,
        branch,
        remote_url,
    }
}
