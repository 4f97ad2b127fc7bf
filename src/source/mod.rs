//! Source-control host gateway.
//!
//! The indexer reads repositories through the [`SourceGateway`] trait.
//! Two backends are provided:
//!
//! | Backend | Kind | Reads from |
//! |---------|------|------------|
//! | [`GitHubSource`] | `github` | GitHub REST API (`GITHUB_TOKEN` optional) |
//! | [`GitSource`] | `git` | local checkouts under `<root>/<owner>/<repo>` via the `git` CLI |
//!
//! Errors are classified into [`SourceError`] so the pipeline can tell a
//! missing branch from a rate limit.

pub mod git;
pub mod github;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::SourceConfig;

pub use git::GitSource;
pub use github::GitHubSource;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The repository, branch, ref, or path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, rate limiting, or a 5xx from the host.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// Any other rejection (auth, malformed response, git failure).
    #[error("source rejected request: {0}")]
    Rejected(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A repository visible to the gateway's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    pub default_branch: Option<String>,
}

/// Read access to repositories on a source-control host.
///
/// `reference` may be a branch name or a commit SHA. Paths are
/// repository-relative with `/` separators.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    /// Every file (blob) path reachable from `reference`.
    async fn list_files(&self, owner: &str, repo: &str, reference: &str)
        -> SourceResult<Vec<String>>;

    /// Raw bytes of one file at `reference`.
    async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> SourceResult<Vec<u8>>;

    /// Commit SHA the branch currently points at.
    async fn branch_head_sha(&self, owner: &str, repo: &str, branch: &str) -> SourceResult<String>;

    async fn list_branches(&self, owner: &str, repo: &str) -> SourceResult<Vec<String>>;

    async fn list_repositories(&self) -> SourceResult<Vec<RepositoryInfo>>;
}

/// Instantiate the backend named by `config.kind`.
pub fn create_source(config: &SourceConfig) -> anyhow::Result<Arc<dyn SourceGateway>> {
    match config.kind.as_str() {
        "github" => Ok(Arc::new(GitHubSource::new(config)?)),
        "git" => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source.root must be set for the git source"))?;
            Ok(Arc::new(GitSource::new(root)))
        }
        other => anyhow::bail!("Unknown source kind: {}", other),
    }
}
