//! In-memory [`FileStore`] implementation.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`; keys sort by path within a
//! branch so bulk reads come back in path order. Similarity search is
//! brute-force cosine over the branch's vectors.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use super::{rank_scored, FileStore, ScoredFile};
use crate::embedding::cosine_similarity;
use crate::models::{BranchCommitRecord, BranchKey, FileRecord};

/// `(owner, repo, reference, path)`
type FileKey = (String, String, String, String);
/// `(owner, repo, branch)`
type CommitKey = (String, String, String);

pub struct InMemoryStore {
    files: RwLock<BTreeMap<FileKey, FileRecord>>,
    commits: RwLock<BTreeMap<CommitKey, BranchCommitRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            commits: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of file records across every branch.
    pub fn file_count(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    fn read_files(&self) -> Result<RwLockReadGuard<'_, BTreeMap<FileKey, FileRecord>>> {
        self.files
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }

    fn write_files(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<FileKey, FileRecord>>> {
        self.files
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn file_key(branch: &BranchKey, path: &str) -> FileKey {
    (
        branch.owner.clone(),
        branch.repo.clone(),
        branch.branch.clone(),
        path.to_string(),
    )
}

fn commit_key(branch: &BranchKey) -> CommitKey {
    (
        branch.owner.clone(),
        branch.repo.clone(),
        branch.branch.clone(),
    )
}

fn branch_records<'a>(
    files: &'a BTreeMap<FileKey, FileRecord>,
    branch: &'a BranchKey,
) -> impl Iterator<Item = &'a FileRecord> {
    let start = file_key(branch, "");
    files
        .range(start..)
        .take_while(move |((o, r, b, _), _)| {
            *o == branch.owner && *r == branch.repo && *b == branch.branch
        })
        .map(|(_, rec)| rec)
}

#[async_trait]
impl FileStore for InMemoryStore {
    async fn get_file_record(&self, branch: &BranchKey, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.read_files()?.get(&file_key(branch, path)).cloned())
    }

    async fn get_all_file_records(&self, branch: &BranchKey) -> Result<Vec<FileRecord>> {
        let files = self.read_files()?;
        Ok(branch_records(&files, branch).cloned().collect())
    }

    async fn save_file_record(&self, record: &FileRecord) -> Result<()> {
        let key = (
            record.owner.clone(),
            record.repo.clone(),
            record.reference.clone(),
            record.path.clone(),
        );
        self.write_files()?.insert(key, record.clone());
        Ok(())
    }

    async fn delete_file_record(&self, branch: &BranchKey, path: &str) -> Result<bool> {
        Ok(self.write_files()?.remove(&file_key(branch, path)).is_some())
    }

    async fn get_branch_commit(&self, branch: &BranchKey) -> Result<Option<BranchCommitRecord>> {
        let commits = self
            .commits
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        Ok(commits.get(&commit_key(branch)).cloned())
    }

    async fn save_branch_commit(&self, branch: &BranchKey, commit_hash: &str) -> Result<()> {
        let mut commits = self
            .commits
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        commits.insert(
            commit_key(branch),
            BranchCommitRecord {
                branch: branch.clone(),
                commit_hash: commit_hash.to_string(),
                updated_at: chrono::Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    async fn find_similar(
        &self,
        query: &[f32],
        branch: &BranchKey,
        limit: usize,
    ) -> Result<Vec<ScoredFile>> {
        let files = self.read_files()?;
        let scored = branch_records(&files, branch)
            .filter(|rec| rec.is_embedded())
            .map(|rec| ScoredFile {
                score: cosine_similarity(query, &rec.embedding),
                record: rec.clone(),
            })
            .collect();
        Ok(rank_scored(scored, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(branch: &BranchKey, path: &str, embedding: Vec<f32>) -> FileRecord {
        let mut rec = FileRecord::new(branch, path, format!("// {}", path), 2, "c1");
        rec.embedding = embedding;
        rec
    }

    #[tokio::test]
    async fn test_branches_are_isolated() {
        let store = InMemoryStore::new();
        let main = BranchKey::new("acme", "api", "main");
        let dev = BranchKey::new("acme", "api", "dev");
        let other = BranchKey::new("acme", "api-v2", "main");

        store.save_file_record(&record(&main, "b.rs", vec![])).await.unwrap();
        store.save_file_record(&record(&main, "a.rs", vec![])).await.unwrap();
        store.save_file_record(&record(&dev, "c.rs", vec![])).await.unwrap();
        store.save_file_record(&record(&other, "d.rs", vec![])).await.unwrap();

        let paths: Vec<String> = store
            .get_all_file_records(&main)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
        assert_eq!(store.file_count(), 4);
    }

    #[tokio::test]
    async fn test_upsert_and_delete() {
        let store = InMemoryStore::new();
        let main = BranchKey::new("o", "r", "main");
        store.save_file_record(&record(&main, "a.rs", vec![])).await.unwrap();
        let mut updated = record(&main, "a.rs", vec![1.0]);
        updated.commit_hash = "c2".into();
        store.save_file_record(&updated).await.unwrap();

        let got = store.get_file_record(&main, "a.rs").await.unwrap().unwrap();
        assert_eq!(got.commit_hash, "c2");
        assert!(store.delete_file_record(&main, "a.rs").await.unwrap());
        assert!(!store.delete_file_record(&main, "a.rs").await.unwrap());
        assert!(store.get_file_record(&main, "a.rs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_branch_commit_marker() {
        let store = InMemoryStore::new();
        let main = BranchKey::new("o", "r", "main");
        assert!(store.get_branch_commit(&main).await.unwrap().is_none());
        store.save_branch_commit(&main, "abc").await.unwrap();
        store.save_branch_commit(&main, "def").await.unwrap();
        let marker = store.get_branch_commit(&main).await.unwrap().unwrap();
        assert_eq!(marker.commit_hash, "def");
        assert_eq!(marker.branch, main);
    }

    #[tokio::test]
    async fn test_find_similar_orders_and_skips_unembedded() {
        let store = InMemoryStore::new();
        let main = BranchKey::new("o", "r", "main");
        store.save_file_record(&record(&main, "a.rs", vec![0.0, 1.0])).await.unwrap();
        store.save_file_record(&record(&main, "b.rs", vec![1.0, 0.0])).await.unwrap();
        store.save_file_record(&record(&main, "c.rs", vec![1.0, 0.1])).await.unwrap();
        store.save_file_record(&record(&main, "d.rs", vec![])).await.unwrap();

        let hits = store.find_similar(&[1.0, 0.0], &main, 2).await.unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.record.path.as_str()).collect();
        assert_eq!(paths, vec!["b.rs", "c.rs"]);
        assert!(hits[0].score >= hits[1].score);
    }
}
