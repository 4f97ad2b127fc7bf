//! Local git checkout backend.
//!
//! Repositories live at `<root>/<owner>/<repo>` (bare or non-bare) and are
//! read through the `git` CLI without touching the working tree, so the
//! checkout can sit on any branch. Keeping the checkouts fresh (`git fetch`)
//! is left to the operator.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use super::{RepositoryInfo, SourceError, SourceGateway, SourceResult};

pub struct GitSource {
    root: PathBuf,
}

impl GitSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repo_dir(&self, owner: &str, repo: &str) -> SourceResult<PathBuf> {
        if [owner, repo]
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('/'))
        {
            return Err(SourceError::Rejected(format!(
                "invalid repository name {}/{}",
                owner, repo
            )));
        }
        let dir = self.root.join(owner).join(repo);
        if !dir.is_dir() {
            return Err(SourceError::NotFound(format!(
                "no checkout at {}",
                dir.display()
            )));
        }
        Ok(dir)
    }

    /// Run `git <args>` in `repo_dir` and return stdout.
    async fn git(&self, repo_dir: &Path, args: &[&str]) -> SourceResult<Vec<u8>> {
        debug!("git {} (in {})", args.join(" "), repo_dir.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .await
            .map_err(|e| {
                SourceError::Rejected(format!("Failed to execute 'git'. Is git installed? {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_git_failure(args, stderr.trim()));
        }

        Ok(output.stdout)
    }
}

fn classify_git_failure(args: &[&str], stderr: &str) -> SourceError {
    let msg = format!("git {} failed: {}", args.first().unwrap_or(&""), stderr);
    let lower = stderr.to_lowercase();
    if lower.contains("not a valid object name")
        || lower.contains("does not exist")
        || lower.contains("unknown revision")
        || lower.contains("needed a single revision")
        || lower.contains("not a tree object")
        || lower.contains("invalid object name")
    {
        SourceError::NotFound(msg)
    } else {
        SourceError::Rejected(msg)
    }
}

/// Path of an `ls-tree` entry (`<mode> <type> <object>\t<path>`) when it
/// names a blob. Submodule commits and trees yield `None`.
fn blob_path(entry: &str) -> Option<String> {
    let (meta, path) = entry.split_once('\t')?;
    let kind = meta.split_whitespace().nth(1)?;
    (kind == "blob" && !path.is_empty()).then(|| path.to_string())
}

fn stdout_string(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).trim().to_string()
}

#[async_trait]
impl SourceGateway for GitSource {
    async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> SourceResult<Vec<String>> {
        let dir = self.repo_dir(owner, repo)?;
        let out = self.git(&dir, &["ls-tree", "-r", "-z", reference]).await?;
        Ok(out
            .split(|b| *b == 0)
            .filter_map(|entry| blob_path(&String::from_utf8_lossy(entry)))
            .collect())
    }

    async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> SourceResult<Vec<u8>> {
        let dir = self.repo_dir(owner, repo)?;
        let object = format!("{}:{}", reference, path);
        self.git(&dir, &["cat-file", "blob", &object]).await
    }

    async fn branch_head_sha(&self, owner: &str, repo: &str, branch: &str) -> SourceResult<String> {
        let dir = self.repo_dir(owner, repo)?;
        let rev = format!("refs/heads/{}^{{commit}}", branch);
        let out = self.git(&dir, &["rev-parse", "--verify", "--quiet", &rev]).await;
        match out {
            Ok(bytes) => Ok(stdout_string(bytes)),
            // --quiet suppresses the message; a bare failure means no such branch
            Err(SourceError::Rejected(_)) => Err(SourceError::NotFound(format!(
                "branch {} in {}/{}",
                branch, owner, repo
            ))),
            Err(e) => Err(e),
        }
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> SourceResult<Vec<String>> {
        let dir = self.repo_dir(owner, repo)?;
        let out = self
            .git(&dir, &["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn list_repositories(&self) -> SourceResult<Vec<RepositoryInfo>> {
        let mut repos = Vec::new();
        let owners = std::fs::read_dir(&self.root).map_err(|e| {
            SourceError::NotFound(format!("source root {}: {}", self.root.display(), e))
        })?;

        for owner in owners.flatten() {
            if !owner.path().is_dir() {
                continue;
            }
            let Ok(children) = std::fs::read_dir(owner.path()) else {
                continue;
            };
            for repo in children.flatten() {
                let path = repo.path();
                let is_repo = path.join(".git").exists() || path.join("HEAD").is_file();
                if !path.is_dir() || !is_repo {
                    continue;
                }
                let default_branch = self
                    .git(&path, &["symbolic-ref", "--short", "HEAD"])
                    .await
                    .ok()
                    .map(stdout_string);
                repos.push(RepositoryInfo {
                    owner: owner.file_name().to_string_lossy().into_owned(),
                    name: repo.file_name().to_string_lossy().into_owned(),
                    default_branch,
                });
            }
        }

        repos.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
        Ok(repos)
    }
}
