//! Token accounting and prompt budget packing.
//!
//! Prompt budgets use the chars-per-token heuristic: one token per four
//! Unicode scalar values, rounded up. Stored [`FileRecord`]s carry their
//! count from indexing time, so packing never re-counts file content.
//!
//! Embedding inputs face a hard provider limit, so they are sized with
//! [`count_embedding_tokens`], the cl100k_base BPE the OpenAI embedding
//! models use.

use std::sync::OnceLock;

use serde::Serialize;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

use crate::models::{FileRecord, ModelProfile};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`. Empty text is zero tokens.
pub fn count_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

fn embedding_bpe() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load cl100k_base, sizing embedding input by bytes: {}", e);
            None
        }
    })
    .as_ref()
}

/// Tokens `text` costs as embedding input.
///
/// Unlike [`count_tokens`] this does not undercount dense or non-Latin
/// text. Without the BPE tables it returns the UTF-8 byte length, which
/// bounds any byte-level BPE count from above.
pub fn count_embedding_tokens(text: &str) -> usize {
    match embedding_bpe() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len(),
    }
}

/// Result of packing files under a model's input ceiling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetFit {
    /// Base prompt tokens plus the tokens of every selected file.
    pub total_tokens: usize,
    pub selected: Vec<FileRecord>,
}

impl BudgetFit {
    /// The base prompt alone left no room for any file.
    pub fn is_degraded(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Greedy prefix fill of `ordered_files` under `model.max_input_tokens`.
///
/// Files are admitted in order while `running + tokens < ceiling`. The scan
/// stops at the first file that does not fit; later files are never
/// considered, even if they are small. Never fails: when the base prompt
/// alone reaches the ceiling the selection is empty.
pub fn fit_to_budget(
    model: &ModelProfile,
    base_prompt: &str,
    ordered_files: Vec<FileRecord>,
) -> BudgetFit {
    let mut running = count_tokens(base_prompt);
    let mut selected = Vec::new();
    let offered = ordered_files.len();

    for file in ordered_files {
        if running + file.token_count < model.max_input_tokens {
            running += file.token_count;
            selected.push(file);
        } else {
            debug!(
                "Token ceiling {} reached for {}: kept {} of {} files",
                model.max_input_tokens,
                model.model,
                selected.len(),
                offered
            );
            break;
        }
    }

    BudgetFit {
        total_tokens: running,
        selected,
    }
}

/// Dollar cost of a call, split by direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CallCost {
    pub input_cost: f64,
    pub output_cost: f64,
}

impl CallCost {
    pub fn total(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

/// Price a call from its token counts. Profile costs are per million tokens.
pub fn estimate_cost(model: &ModelProfile, input_tokens: usize, output_tokens: usize) -> CallCost {
    CallCost {
        input_cost: (input_tokens as f64 / 1_000_000.0) * model.input_cost,
        output_cost: (output_tokens as f64 / 1_000_000.0) * model.output_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchKey;

    fn profile(ceiling: usize) -> ModelProfile {
        ModelProfile {
            model: "test-model".to_string(),
            max_input_tokens: ceiling,
            max_output_tokens: 1024,
            input_cost: 3.0,
            output_cost: 15.0,
        }
    }

    fn file(path: &str, tokens: usize) -> FileRecord {
        let branch = BranchKey::new("o", "r", "main");
        FileRecord::new(&branch, path, String::new(), tokens, "sha")
    }

    fn paths(fit: &BudgetFit) -> Vec<&str> {
        fit.selected.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abc"), 1);
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
        // counts scalar values, not bytes
        assert_eq!(count_tokens("日本語です"), 2);
    }

    #[test]
    fn test_embedding_tokens_count_multibyte_text() {
        assert_eq!(count_embedding_tokens(""), 0);
        assert_eq!(count_embedding_tokens("hello world"), 2);

        let cjk = "漢".repeat(20_000);
        assert_eq!(count_tokens(&cjk), 5_000);
        let bpe = count_embedding_tokens(&cjk);
        assert!(bpe >= 10_000, "cl100k counted {} tokens", bpe);
        assert!(bpe <= cjk.len());
    }

    #[test]
    fn test_greedy_stop_does_not_backtrack() {
        let files = vec![file("a", 100), file("b", 50), file("c", 30)];
        let fit = fit_to_budget(&profile(140), "", files);
        assert_eq!(paths(&fit), vec!["a"]);
        assert_eq!(fit.total_tokens, 100);
    }

    #[test]
    fn test_ceiling_is_strict() {
        let files = vec![file("a", 60), file("b", 40)];
        let fit = fit_to_budget(&profile(100), "", files);
        // 60 + 40 == 100 is not below the ceiling
        assert_eq!(paths(&fit), vec!["a"]);
    }

    #[test]
    fn test_base_prompt_counts_against_ceiling() {
        let base = "x".repeat(80); // 20 tokens
        let files = vec![file("a", 50), file("b", 20)];
        let fit = fit_to_budget(&profile(91), &base, files);
        assert_eq!(paths(&fit), vec!["a", "b"]);
        assert_eq!(fit.total_tokens, 90);
    }

    #[test]
    fn test_base_prompt_over_ceiling_is_degraded() {
        let base = "x".repeat(400); // 100 tokens
        let fit = fit_to_budget(&profile(100), &base, vec![file("a", 0)]);
        assert!(fit.is_degraded());
        assert_eq!(fit.total_tokens, 100);
    }

    #[test]
    fn test_empty_input() {
        let fit = fit_to_budget(&profile(100), "", Vec::new());
        assert!(fit.selected.is_empty());
        assert_eq!(fit.total_tokens, 0);
    }

    #[test]
    fn test_estimate_cost() {
        let cost = estimate_cost(&profile(100), 1_000_000, 500_000);
        assert!((cost.input_cost - 3.0).abs() < 1e-9);
        assert!((cost.output_cost - 7.5).abs() < 1e-9);
        assert!((cost.total() - 10.5).abs() < 1e-9);
    }
}
