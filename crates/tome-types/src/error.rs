use thiserror::Error;

use crate::ids::MapId;

/// Errors produced by model operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    /// At least one map must always exist.
    #[error("cannot delete the last remaining map")]
    LastMap,

    #[error("unknown map: {0}")]
    UnknownMap(MapId),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for model operations.
pub type TypeResult<T> = Result<T, TypeError>;
