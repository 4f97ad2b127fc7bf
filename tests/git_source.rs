//! Git checkout backend against a throwaway repository.
//!
//! Skipped when no `git` binary is on the PATH.

use codebase_prep::source::{GitSource, SourceError, SourceGateway};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// `<root>/acme/api` with one commit on `main` and an extra `feature` branch.
fn fixture() -> (TempDir, String) {
    let root = TempDir::new().unwrap();
    let repo = root.path().join("acme/api");
    std::fs::create_dir_all(repo.join("src")).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(repo.join("src/lib.rs"), "pub fn lib() {}\n").unwrap();
    std::fs::write(repo.join("README.md"), "# api\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "init"]);
    git(&repo, &["branch", "feature"]);
    let head = git(&repo, &["rev-parse", "HEAD"]);
    (root, head)
}

#[tokio::test]
async fn test_reads_tree_and_blobs_at_head() {
    if !git_available() {
        return;
    }
    let (root, head) = fixture();
    let source = GitSource::new(root.path());

    let sha = source.branch_head_sha("acme", "api", "main").await.unwrap();
    assert_eq!(sha, head);

    let mut files = source.list_files("acme", "api", &sha).await.unwrap();
    files.sort();
    assert_eq!(files, vec!["README.md", "src/lib.rs"]);

    let bytes = source.read_file("acme", "api", &sha, "src/lib.rs").await.unwrap();
    assert_eq!(bytes, b"pub fn lib() {}\n");
}

#[tokio::test]
async fn test_missing_things_are_not_found() {
    if !git_available() {
        return;
    }
    let (root, head) = fixture();
    let source = GitSource::new(root.path());

    let err = source.branch_head_sha("acme", "api", "nope").await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)));

    let err = source
        .read_file("acme", "api", &head, "src/missing.rs")
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)));

    let err = source.list_branches("acme", "other").await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound(_)));
}

#[tokio::test]
async fn test_lists_branches_and_repositories() {
    if !git_available() {
        return;
    }
    let (root, _) = fixture();
    let source = GitSource::new(root.path());

    let branches = source.list_branches("acme", "api").await.unwrap();
    assert_eq!(branches, vec!["feature", "main"]);

    let repos = source.list_repositories().await.unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].owner, "acme");
    assert_eq!(repos[0].name, "api");
    assert_eq!(repos[0].default_branch.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_submodule_entries_are_not_listed() {
    if !git_available() {
        return;
    }
    let (root, head) = fixture();
    let repo = root.path().join("acme/api");
    let gitlink = format!("160000,{},vendor/dep", head);
    git(&repo, &["update-index", "--add", "--cacheinfo", &gitlink]);
    git(&repo, &["-c", "commit.gpgsign=false", "commit", "-q", "-m", "add submodule"]);

    let source = GitSource::new(root.path());
    let sha = source.branch_head_sha("acme", "api", "main").await.unwrap();
    assert_ne!(sha, head);

    let mut files = source.list_files("acme", "api", &sha).await.unwrap();
    files.sort();
    assert_eq!(files, vec!["README.md", "src/lib.rs"]);
    for path in &files {
        source.read_file("acme", "api", &sha, path).await.unwrap();
    }
}
