//! Error taxonomy for the preparation pipeline.
//!
//! Every fatal condition reaches the workflow layer as one [`PrepError`].
//! The degenerate-budget case is not an error: it yields an empty
//! selection.

use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum PrepError {
    /// The request names a model that is not in the catalog.
    #[error("unknown model '{0}': no profile in the model catalog")]
    UnknownModel(String),

    /// The request is malformed (empty task in similarity mode, unknown option).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Listing, reading, or resolving the branch head failed.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// The embedding capability failed for a batch.
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    /// The capability answered with fewer vectors than inputs.
    #[error("embedding response has {got} vectors for {want} inputs")]
    ShortEmbeddingResponse { got: usize, want: usize },

    /// A vector does not have the configured dimensionality.
    #[error("embedding has {got} dimensions, expected {want}")]
    DimensionMismatch { got: usize, want: usize },

    /// A file store read or write failed.
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl PrepError {
    /// Whether re-invoking `prepare()` later could succeed without a
    /// configuration change.
    pub fn is_transient(&self) -> bool {
        match self {
            PrepError::Source(e) => e.is_transient(),
            PrepError::Embedding(_) | PrepError::Store(_) => true,
            _ => false,
        }
    }
}

pub type PrepResult<T> = std::result::Result<T, PrepError>;
