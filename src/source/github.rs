//! GitHub REST backend.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `branch_head_sha` | `GET /repos/{owner}/{repo}/branches/{branch}` → `commit.sha` |
//! | `list_files` | `GET /repos/{owner}/{repo}/git/trees/{ref}?recursive=1` (blobs only) |
//! | | `GET /repos/{owner}/{repo}/git/trees/{sha}` per directory when the recursive tree is truncated |
//! | `read_file` | `GET /repos/{owner}/{repo}/contents/{path}?ref=` with the raw media type |
//! | `list_branches` | `GET /repos/{owner}/{repo}/branches` (paginated) |
//! | `list_repositories` | `GET /user/repos` (paginated, requires a token) |
//!
//! `GITHUB_TOKEN` is sent as a bearer token when set; public repositories
//! work without it at a lower rate limit.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RepositoryInfo, SourceError, SourceGateway, SourceResult};
use crate::config::SourceConfig;

const PER_PAGE: usize = 100;
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const USER_AGENT: &str = concat!("codeprep/", env!("CARGO_PKG_VERSION"));

pub struct GitHubSource {
    api_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct BranchResponse {
    name: String,
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sha: String,
}

#[derive(Deserialize)]
struct RepoResponse {
    name: String,
    owner: RepoOwner,
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct RepoOwner {
    login: String,
}

impl GitHubSource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| anyhow::anyhow!("Invalid source.api_url '{}': {}", config.api_url, e))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        if token.is_none() {
            debug!("GITHUB_TOKEN not set; using unauthenticated GitHub requests");
        }

        Ok(Self {
            api_url,
            token,
            client,
        })
    }

    /// Build an API URL from path segments, percent-encoding each one.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> SourceResult<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Rejected("source.api_url cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url, accept: &str) -> RequestBuilder {
        let req = self
            .client
            .get(url)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send a request and map non-success statuses onto [`SourceError`].
    async fn send(&self, req: RequestBuilder, what: &str) -> SourceResult<Response> {
        let response = req
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("{}: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, rate_limited, &format!("{}: {}", what, body.trim())))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url, what: &str) -> SourceResult<T> {
        let response = self.send(self.get(url, JSON_MEDIA_TYPE), what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Rejected(format!("{}: invalid response: {}", what, e)))
    }
}

fn classify_status(status: StatusCode, rate_limited: bool, detail: &str) -> SourceError {
    let msg = format!("HTTP {} {}", status.as_u16(), detail);
    if status == StatusCode::NOT_FOUND {
        SourceError::NotFound(msg)
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || (status == StatusCode::FORBIDDEN && rate_limited)
    {
        SourceError::Transient(msg)
    } else {
        SourceError::Rejected(msg)
    }
}

fn blob_paths(tree: TreeResponse) -> Vec<String> {
    tree.tree
        .into_iter()
        .filter(|entry| entry.kind == "blob")
        .map(|entry| entry.path)
        .collect()
}

/// List every blob under `root` with one non-recursive tree request per
/// directory. A directory whose own listing is truncated fails the walk,
/// since a partial listing would read as deleted files.
async fn walk_tree<F, Fut>(root: &str, mut fetch: F) -> SourceResult<Vec<String>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = SourceResult<TreeResponse>>,
{
    let mut paths = Vec::new();
    let mut pending = vec![(String::new(), root.to_string())];

    while let Some((prefix, sha)) = pending.pop() {
        let tree = fetch(sha.clone()).await?;
        if tree.truncated {
            return Err(SourceError::Rejected(format!(
                "tree {} at '{}' is too large to list completely",
                sha, prefix
            )));
        }
        for entry in tree.tree {
            let path = if prefix.is_empty() {
                entry.path
            } else {
                format!("{}/{}", prefix, entry.path)
            };
            match entry.kind.as_str() {
                "blob" => paths.push(path),
                "tree" => pending.push((path, entry.sha)),
                _ => {}
            }
        }
    }

    paths.sort();
    Ok(paths)
}

#[async_trait]
impl SourceGateway for GitHubSource {
    async fn list_files(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> SourceResult<Vec<String>> {
        let mut url = self.url(["repos", owner, repo, "git", "trees", reference])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let what = format!("list {}/{}@{}", owner, repo, reference);
        let tree: TreeResponse = self.get_json(url, &what).await?;
        if !tree.truncated {
            return Ok(blob_paths(tree));
        }

        warn!(
            "GitHub truncated the tree for {}/{}@{}; listing one directory at a time",
            owner, repo, reference
        );
        walk_tree(reference, |sha| async move {
            let url = self.url(["repos", owner, repo, "git", "trees", &sha])?;
            let what = format!("list {}/{} tree {}", owner, repo, sha);
            self.get_json::<TreeResponse>(url, &what).await
        })
        .await
    }

    async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> SourceResult<Vec<u8>> {
        let mut url = self.url(
            ["repos", owner, repo, "contents"]
                .into_iter()
                .chain(path.split('/').filter(|s| !s.is_empty())),
        )?;
        url.query_pairs_mut().append_pair("ref", reference);

        let what = format!("read {}/{}@{}:{}", owner, repo, reference, path);
        let req = self.get(url, RAW_MEDIA_TYPE);
        let response = self.send(req, &what).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Transient(format!("{}: {}", what, e)))?;
        Ok(bytes.to_vec())
    }

    async fn branch_head_sha(&self, owner: &str, repo: &str, branch: &str) -> SourceResult<String> {
        let url = self.url(["repos", owner, repo, "branches", branch])?;
        let what = format!("branch {}/{}@{}", owner, repo, branch);
        let data: BranchResponse = self.get_json(url, &what).await?;
        Ok(data.commit.sha)
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> SourceResult<Vec<String>> {
        let mut names = Vec::new();
        for page in 1.. {
            let mut url = self.url(["repos", owner, repo, "branches"])?;
            url.query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let what = format!("branches {}/{}", owner, repo);
            let batch: Vec<BranchResponse> = self.get_json(url, &what).await?;
            let done = batch.len() < PER_PAGE;
            names.extend(batch.into_iter().map(|b| b.name));
            if done {
                break;
            }
        }
        Ok(names)
    }

    async fn list_repositories(&self) -> SourceResult<Vec<RepositoryInfo>> {
        let mut repos = Vec::new();
        for page in 1.. {
            let mut url = self.url(["user", "repos"])?;
            url.query_pairs_mut()
                .append_pair("visibility", "all")
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let batch: Vec<RepoResponse> = self.get_json(url, "list repositories").await?;
            let done = batch.len() < PER_PAGE;
            repos.extend(batch.into_iter().map(|r| RepositoryInfo {
                owner: r.owner.login,
                name: r.name,
                default_branch: r.default_branch,
            }));
            if done {
                break;
            }
        }
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(api_url: &str) -> GitHubSource {
        let config = SourceConfig {
            api_url: api_url.to_string(),
            ..SourceConfig::default()
        };
        GitHubSource::new(&config).unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, false, ""),
            SourceError::NotFound(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, false, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, false, "").is_transient());
        assert!(classify_status(StatusCode::FORBIDDEN, true, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, false, ""),
            SourceError::Rejected(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, false, ""),
            SourceError::Rejected(_)
        ));
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let gh = source("https://api.github.com");
        let url = gh
            .url(["repos", "acme", "api", "contents", "docs", "a b#c.md"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/api/contents/docs/a%20b%23c.md"
        );
    }

    #[test]
    fn test_url_respects_enterprise_prefix() {
        let gh = source("https://ghe.example.com/api/v3/");
        let url = gh.url(["repos", "o", "r", "branches", "main"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/o/r/branches/main"
        );
    }

    #[test]
    fn test_tree_response_keeps_blobs() {
        let tree: TreeResponse = serde_json::from_str(
            r#"{"sha":"x","tree":[
                {"path":"src","type":"tree"},
                {"path":"src/main.rs","type":"blob"},
                {"path":"vendor/lib","type":"commit"}
            ],"truncated":false}"#,
        )
        .unwrap();
        assert_eq!(blob_paths(tree), vec!["src/main.rs"]);
    }

    fn tree(json: serde_json::Value) -> TreeResponse {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn test_walk_tree_lists_nested_blobs() {
        let mut trees = HashMap::new();
        trees.insert(
            "root",
            tree(serde_json::json!({"tree": [
                {"path": "README.md", "type": "blob", "sha": "b1"},
                {"path": "src", "type": "tree", "sha": "t-src"},
                {"path": "vendor", "type": "commit", "sha": "c1"}
            ], "truncated": false})),
        );
        trees.insert(
            "t-src",
            tree(serde_json::json!({"tree": [
                {"path": "lib.rs", "type": "blob", "sha": "b2"},
                {"path": "io", "type": "tree", "sha": "t-io"}
            ], "truncated": false})),
        );
        trees.insert(
            "t-io",
            tree(serde_json::json!({"tree": [
                {"path": "read.rs", "type": "blob", "sha": "b3"}
            ], "truncated": false})),
        );

        let mut fetched = Vec::new();
        let paths = walk_tree("root", |sha| {
            fetched.push(sha.clone());
            let result = trees
                .remove(sha.as_str())
                .ok_or_else(|| SourceError::NotFound(sha));
            async move { result }
        })
        .await
        .unwrap();

        assert_eq!(paths, vec!["README.md", "src/io/read.rs", "src/lib.rs"]);
        assert_eq!(fetched.len(), 3);
    }

    #[tokio::test]
    async fn test_walk_tree_fails_on_truncated_directory() {
        let mut trees = HashMap::new();
        trees.insert(
            "root",
            tree(serde_json::json!({"tree": [
                {"path": "a.rs", "type": "blob", "sha": "b1"},
                {"path": "big", "type": "tree", "sha": "t-big"}
            ], "truncated": false})),
        );
        trees.insert(
            "t-big",
            tree(serde_json::json!({"tree": [
                {"path": "x.rs", "type": "blob", "sha": "b2"}
            ], "truncated": true})),
        );

        let err = walk_tree("root", |sha| {
            let result = trees
                .remove(sha.as_str())
                .ok_or_else(|| SourceError::NotFound(sha));
            async move { result }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Rejected(_)));
        assert!(!err.is_transient());
    }
}
