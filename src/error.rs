use crate::DocId;

/// Failure modes of the similarity table.
///
/// Read paths return empty or absent results for unknown ids; only lookups that
/// promise a value (`similarity`) and structurally invalid input produce errors.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("schema mismatch: table expects {expected} dimensions, got {found}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("invalid component {value} at position {position}: must be finite and within [0, 1)")]
    InvalidComponent { position: usize, value: f32 },

    #[error("document {id} not found")]
    NotFound { id: DocId },

    #[error("document {neighbor} is not a neighbor of {id}")]
    NeighborNotFound { id: DocId, neighbor: DocId },

    #[error("corrupt table state: {detail}")]
    CorruptState { detail: String },

    #[error("invalid config: {detail}")]
    InvalidConfig { detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        SimError::CorruptState { detail: detail.into() }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
