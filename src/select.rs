//! Relevance ranking and budget selection.
//!
//! Two modes:
//!
//! - **Similarity** (default): embed the task, score every file by cosine
//!   similarity, sort descending (ties keep path order), optionally drop
//!   weak matches with [`similarity_threshold`], then pack under the
//!   model's ceiling.
//! - **Maximize usage**: no embedding call; files are packed in natural
//!   (path) order.

use tracing::debug;

use crate::embedding::{cosine_similarity, descending_score, EmbeddingEngine};
use crate::error::{PrepError, PrepResult};
use crate::models::{FileRecord, ModelProfile};
use crate::tokens::{fit_to_budget, BudgetFit};

pub struct RelevanceSelector {
    engine: EmbeddingEngine,
    dynamic_threshold: bool,
}

impl RelevanceSelector {
    pub fn new(engine: EmbeddingEngine, dynamic_threshold: bool) -> Self {
        Self {
            engine,
            dynamic_threshold,
        }
    }

    /// Order `files` for `task` and keep the greedy prefix that fits under
    /// `model.max_input_tokens` together with `base_prompt`.
    pub async fn select(
        &self,
        files: Vec<FileRecord>,
        task: &str,
        base_prompt: &str,
        model: &ModelProfile,
        maximize_token_usage: bool,
    ) -> PrepResult<BudgetFit> {
        if files.is_empty() {
            return Ok(fit_to_budget(model, base_prompt, files));
        }
        if maximize_token_usage {
            return Ok(fit_to_budget(model, base_prompt, files));
        }
        if task.trim().is_empty() {
            return Err(PrepError::InvalidRequest(
                "task description is empty; similarity ranking needs a task".to_string(),
            ));
        }

        let query = self.engine.embed(task).await?;
        let mut ranked = rank_by_similarity(&query, files);

        if self.dynamic_threshold {
            let scores: Vec<f32> = ranked.iter().map(|(_, s)| *s).collect();
            let threshold = similarity_threshold(&scores);
            let before = ranked.len();
            ranked.retain(|(_, score)| *score >= threshold);
            debug!(
                "Similarity threshold {:.3} kept {} of {} files",
                threshold,
                ranked.len(),
                before
            );
        }

        let ordered = ranked.into_iter().map(|(file, _)| file).collect();
        Ok(fit_to_budget(model, base_prompt, ordered))
    }
}

/// Pair each file with its similarity to `query`, best first.
///
/// The sort is stable, so equal scores keep the incoming order.
pub fn rank_by_similarity(query: &[f32], files: Vec<FileRecord>) -> Vec<(FileRecord, f32)> {
    let mut scored: Vec<(FileRecord, f32)> = files
        .into_iter()
        .map(|f| {
            let score = cosine_similarity(query, &f.embedding);
            (f, score)
        })
        .collect();
    scored.sort_by(|a, b| descending_score(a.1, b.1));
    scored
}

/// Cut-off score for a descending list of similarity scores.
///
/// Weak result sets (best score below 0.35) keep at least the top
/// `max(3, ⌈10%⌉)` files. Otherwise the threshold is the larger of a base
/// that depends on the best score and a point inside the observed score
/// range, capped just below the best score so the top file always passes.
pub fn similarity_threshold(sorted_desc: &[f32]) -> f32 {
    let (Some(&max), Some(&min)) = (sorted_desc.first(), sorted_desc.last()) else {
        return 0.4;
    };

    if max < 0.35 {
        let keep = 3usize.max((sorted_desc.len() as f32 * 0.1).ceil() as usize);
        return sorted_desc[keep.min(sorted_desc.len()) - 1] - 0.001;
    }

    let base: f32 = if max > 0.7 {
        0.4
    } else if max > 0.5 {
        0.35
    } else {
        0.25
    };
    let range = if max > 0.7 { 0.35 } else { 0.5 };
    let dynamic = max - (max - min) * range;

    base.max(dynamic).min(max - 0.001)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchKey;

    fn file(path: &str, embedding: Vec<f32>) -> FileRecord {
        let branch = BranchKey::new("o", "r", "main");
        let mut rec = FileRecord::new(&branch, path, String::new(), 10, "sha");
        rec.embedding = embedding;
        rec
    }

    #[test]
    fn test_rank_is_descending_and_stable() {
        let files = vec![
            file("a", vec![0.0, 1.0]),
            file("b", vec![1.0, 0.0]),
            file("c", vec![0.0, 2.0]),
            file("d", vec![3.0, 0.0]),
        ];
        let ranked = rank_by_similarity(&[1.0, 0.0], files);
        let paths: Vec<&str> = ranked.iter().map(|(f, _)| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_rank_puts_nan_scores_last() {
        let files = vec![
            file("broken", vec![f32::NAN, 0.0]),
            file("weak", vec![0.0, 1.0]),
            file("strong", vec![1.0, 0.0]),
        ];
        let ranked = rank_by_similarity(&[1.0, 0.0], files);
        let paths: Vec<&str> = ranked.iter().map(|(f, _)| f.path.as_str()).collect();
        assert_eq!(paths, vec!["strong", "weak", "broken"]);
    }

    #[test]
    fn test_threshold_empty() {
        assert_eq!(similarity_threshold(&[]), 0.4);
    }

    #[test]
    fn test_threshold_weak_scores_keep_top_three() {
        let scores = [0.3, 0.25, 0.2, 0.1, 0.05];
        let t = similarity_threshold(&scores);
        assert!((t - 0.199).abs() < 1e-6);
        assert_eq!(scores.iter().filter(|s| **s >= t).count(), 3);
    }

    #[test]
    fn test_threshold_weak_scores_short_list() {
        let t = similarity_threshold(&[0.2, 0.1]);
        assert!((t - 0.099).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_strong_match() {
        // max 0.9, min 0.1: dynamic = 0.9 - 0.8 * 0.35 = 0.62
        let t = similarity_threshold(&[0.9, 0.6, 0.1]);
        assert!((t - 0.62).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_dynamic_versus_base() {
        // max 0.6, min 0.55: dynamic = 0.575 > base 0.35
        let t = similarity_threshold(&[0.6, 0.55]);
        assert!((t - 0.575).abs() < 1e-6);
        // max 0.4, min 0.0: dynamic = 0.2 < base 0.25
        let t = similarity_threshold(&[0.4, 0.0]);
        assert!((t - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_never_drops_top() {
        let t = similarity_threshold(&[0.36]);
        assert!(t < 0.36);
        let t = similarity_threshold(&[0.8, 0.8, 0.8]);
        assert!(t < 0.8);
    }
}
