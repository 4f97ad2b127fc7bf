//! Incremental, commit-gated indexing of a branch.
//!
//! Each call to [`IncrementalIndexer::ensure_indexed`] runs a two-state
//! pass for one `(owner, repo, branch)`:
//!
//! ```text
//! Check ──(stored sha == head sha, no force)──▶ UpToDate: return stored records
//!   │
//!   └──(otherwise)──▶ Reindex: list → filter → read → count → diff → embed
//!                              → save records → prune orphans → save marker
//! ```
//!
//! The branch commit marker is written last, after every record write of
//! the pass has succeeded; a failed pass leaves the marker where it was, so
//! the next call reindexes. Passes for the same branch are serialized by
//! [`BranchLocks`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::embedding::EmbeddingEngine;
use crate::error::{PrepError, PrepResult};
use crate::filter::ExclusionFilter;
use crate::models::{content_hash, embedding_text, BranchKey, FileRecord};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::source::SourceGateway;
use crate::store::FileStore;
use crate::tokens::{count_embedding_tokens, count_tokens};

/// Emit a read/save progress event every this many files.
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// The stored index already matched the branch head.
    UpToDate,
    /// The branch was listed, read, and written at `commit_hash`.
    Reindexed,
}

/// Result of one indexing pass.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub status: IndexStatus,
    /// Head SHA the returned records reflect.
    pub commit_hash: String,
    /// Indexed records in path order.
    pub files: Vec<FileRecord>,
    pub embedded: usize,
    pub reused: usize,
    /// Files listed but left out: binary, empty, or over the token limit.
    pub skipped: usize,
    pub pruned: usize,
}

/// In-process async mutexes keyed by branch.
///
/// An entry lives only while some caller holds or waits for it.
#[derive(Default)]
pub struct BranchLocks {
    locks: Mutex<HashMap<BranchKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl BranchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `branch`. Released when the guard drops.
    pub async fn lock(&self, branch: &BranchKey) -> BranchGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(branch.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        BranchGuard {
            locks: self,
            branch: branch.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Branches with a holder or waiter.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one branch. Dropping it releases the lock and
/// forgets the branch when nobody else is waiting.
pub struct BranchGuard<'a> {
    locks: &'a BranchLocks,
    branch: BranchKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BranchGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        // waiters clone the Arc under this map lock, so a count of 1 means idle
        if locks
            .get(&self.branch)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.branch);
        }
    }
}

pub struct IncrementalIndexer {
    source: Arc<dyn SourceGateway>,
    store: Arc<dyn FileStore>,
    engine: EmbeddingEngine,
    filter: ExclusionFilter,
    config: IndexerConfig,
    locks: BranchLocks,
}

impl IncrementalIndexer {
    pub fn new(
        source: Arc<dyn SourceGateway>,
        store: Arc<dyn FileStore>,
        engine: EmbeddingEngine,
        config: IndexerConfig,
    ) -> anyhow::Result<Self> {
        let filter = ExclusionFilter::new(&config.exclude_globs)?;
        Ok(Self {
            source,
            store,
            engine,
            filter,
            config,
            locks: BranchLocks::new(),
        })
    }

    pub fn engine(&self) -> &EmbeddingEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// Make the store reflect the branch head and return its records.
    ///
    /// With `force_full_sync` the commit check is bypassed and the branch is
    /// reindexed even when the marker matches. A matching marker over
    /// vectors of another dimensionality also triggers a reindex.
    pub async fn ensure_indexed(
        &self,
        branch: &BranchKey,
        force_full_sync: bool,
        task_id: &str,
        progress: &dyn ProgressSink,
    ) -> PrepResult<IndexOutcome> {
        let _guard = self.locks.lock(branch).await;

        progress.emit(
            task_id,
            ProgressEvent::Checking {
                branch: branch.to_string(),
            },
        );
        let head = self
            .source
            .branch_head_sha(&branch.owner, &branch.repo, &branch.branch)
            .await?;
        let stored = self
            .store
            .get_branch_commit(branch)
            .await
            .map_err(PrepError::Store)?;

        if !force_full_sync {
            if let Some(marker) = stored.filter(|m| m.commit_hash == head) {
                let files = self
                    .store
                    .get_all_file_records(branch)
                    .await
                    .map_err(PrepError::Store)?;
                let dims = self.engine.dims();
                if let Some(stale) = files.iter().find(|f| f.embedding.len() != dims) {
                    info!(
                        "{} has {}-dim vectors (e.g. {}) but {} are configured; reindexing",
                        branch,
                        stale.embedding.len(),
                        stale.path,
                        dims
                    );
                } else {
                    debug!("{} up to date at {}", branch, marker.commit_hash);
                    progress.emit(
                        task_id,
                        ProgressEvent::UpToDate {
                            commit: head.clone(),
                            files: files.len(),
                        },
                    );
                    return Ok(IndexOutcome {
                        status: IndexStatus::UpToDate,
                        commit_hash: head,
                        files,
                        embedded: 0,
                        reused: 0,
                        skipped: 0,
                        pruned: 0,
                    });
                }
            }
        }

        self.reindex(branch, head, task_id, progress).await
    }

    async fn reindex(
        &self,
        branch: &BranchKey,
        head: String,
        task_id: &str,
        progress: &dyn ProgressSink,
    ) -> PrepResult<IndexOutcome> {
        info!("Reindexing {} at {}", branch, head);
        progress.emit(
            task_id,
            ProgressEvent::Listing {
                commit: head.clone(),
            },
        );

        let mut paths: Vec<String> = self
            .source
            .list_files(&branch.owner, &branch.repo, &head)
            .await?
            .into_iter()
            .filter(|p| !self.filter.is_excluded(p))
            .collect();
        paths.sort();
        paths.dedup();

        let mut existing: HashMap<String, FileRecord> = self
            .store
            .get_all_file_records(branch)
            .await
            .map_err(PrepError::Store)?
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();

        let contents = self.read_all(branch, &head, paths, task_id, progress).await?;

        let mut records = Vec::with_capacity(contents.len());
        let mut skipped = 0;
        for (path, bytes) in contents {
            let content = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Skipping binary file {}", path);
                    skipped += 1;
                    continue;
                }
            };
            let tokens = count_tokens(&content);
            if tokens == 0 {
                debug!("Skipping empty file {}", path);
                skipped += 1;
                continue;
            }
            if let Some(input_tokens) = self.oversized(&path, &content, tokens) {
                warn!(
                    "Skipping {}: {} embedding tokens (limit {})",
                    path, input_tokens, self.config.max_file_tokens
                );
                skipped += 1;
                continue;
            }

            let reusable = existing.get(&path).is_some_and(|old| {
                old.content_hash == content_hash(&content)
                    && old.content == content
                    && old.embedding.len() == self.engine.dims()
            });
            let record = match existing.get(&path) {
                Some(old) if reusable => {
                    let mut rec = old.clone();
                    rec.commit_hash = head.clone();
                    rec
                }
                _ => FileRecord::new(branch, &path, content, tokens, &head),
            };
            records.push(record);
        }

        let pending = records.iter().filter(|r| !r.is_embedded()).count();
        if pending > 0 {
            progress.emit(task_id, ProgressEvent::Embedding { files: pending });
        }
        let (records, embedded) = self.engine.embed_missing(records).await?;
        let reused = records.len() - embedded;

        self.save_all(&records, task_id, progress).await?;

        let mut pruned = 0;
        if self.config.prune_orphans {
            let current: HashSet<&str> = records.iter().map(|r| r.path.as_str()).collect();
            existing.retain(|path, _| !current.contains(path.as_str()));
            pruned = self.prune(branch, existing.into_keys().collect()).await?;
        }

        self.store
            .save_branch_commit(branch, &head)
            .await
            .map_err(PrepError::Store)?;

        info!(
            "Indexed {} at {}: {} embedded, {} reused, {} skipped, {} pruned",
            branch, head, embedded, reused, skipped, pruned
        );
        progress.emit(
            task_id,
            ProgressEvent::Indexed {
                commit: head.clone(),
                embedded,
                reused,
                skipped,
                pruned,
            },
        );

        Ok(IndexOutcome {
            status: IndexStatus::Reindexed,
            commit_hash: head,
            files: records,
            embedded,
            reused,
            skipped,
            pruned,
        })
    }

    /// Embedding token count of a file whose input reaches
    /// `max_file_tokens`, or `None` when it fits.
    fn oversized(&self, path: &str, content: &str, tokens: usize) -> Option<usize> {
        let limit = self.config.max_file_tokens;
        if tokens >= limit {
            return Some(tokens);
        }
        let input = embedding_text(path, content);
        // byte-level BPE never yields more tokens than bytes
        if input.len() < limit {
            return None;
        }
        let input_tokens = count_embedding_tokens(&input);
        (input_tokens >= limit).then_some(input_tokens)
    }

    /// Read every path at `head`, at most `read_concurrency` at a time.
    /// Results keep the order of `paths`; the first failure aborts.
    async fn read_all(
        &self,
        branch: &BranchKey,
        head: &str,
        paths: Vec<String>,
        task_id: &str,
        progress: &dyn ProgressSink,
    ) -> PrepResult<Vec<(String, Vec<u8>)>> {
        let total = paths.len();
        let source = &self.source;
        let mut reads = stream::iter(paths)
            .map(|path| async move {
                let bytes = source
                    .read_file(&branch.owner, &branch.repo, head, &path)
                    .await?;
                Ok::<_, PrepError>((path, bytes))
            })
            .buffered(self.config.read_concurrency.max(1));

        let mut contents = Vec::with_capacity(total);
        while let Some(result) = reads.next().await {
            contents.push(result?);
            let n = contents.len();
            if n % PROGRESS_EVERY == 0 || n == total {
                progress.emit(task_id, ProgressEvent::Reading { n, total });
            }
        }
        Ok(contents)
    }

    async fn save_all(
        &self,
        records: &[FileRecord],
        task_id: &str,
        progress: &dyn ProgressSink,
    ) -> PrepResult<()> {
        let total = records.len();
        let store = &self.store;
        let mut writes = stream::iter(records)
            .map(|record| store.save_file_record(record))
            .buffer_unordered(self.config.write_concurrency.max(1));

        let mut n = 0;
        while let Some(result) = writes.next().await {
            result.map_err(PrepError::Store)?;
            n += 1;
            if n % PROGRESS_EVERY == 0 || n == total {
                progress.emit(task_id, ProgressEvent::Saving { n, total });
            }
        }
        Ok(())
    }

    async fn prune(&self, branch: &BranchKey, orphans: Vec<String>) -> PrepResult<usize> {
        if orphans.is_empty() {
            return Ok(0);
        }
        debug!("Pruning {} orphaned records from {}", orphans.len(), branch);
        let store = &self.store;
        let removed: Vec<bool> = stream::iter(orphans)
            .map(|path| async move { store.delete_file_record(branch, &path).await })
            .buffer_unordered(self.config.write_concurrency.max(1))
            .try_collect()
            .await
            .map_err(PrepError::Store)?;
        Ok(removed.into_iter().filter(|r| *r).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_branch_locks_serialize_same_key() {
        let locks = Arc::new(BranchLocks::new());
        let main = BranchKey::new("o", "r", "main");
        let guard = locks.lock(&main).await;

        let contender = {
            let locks = locks.clone();
            let main = main.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&main).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // a different branch is not blocked
        let dev = BranchKey::new("o", "r", "dev");
        let _other = locks.lock(&dev).await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_branch_locks_forget_idle_branches() {
        let locks = Arc::new(BranchLocks::new());
        let main = BranchKey::new("o", "r", "main");

        let guard = locks.lock(&main).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());

        // the entry survives the first release while a waiter is queued
        let guard = locks.lock(&main).await;
        let contender = {
            let locks = locks.clone();
            let main = main.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&main).await;
            })
        };
        tokio::task::yield_now().await;
        drop(guard);
        assert_eq!(locks.len(), 1);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }
}
