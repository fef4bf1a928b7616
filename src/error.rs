// Typed errors with thiserror. Converted to JS strings only at the wasm boundary.

use thiserror::Error;

/// Pipeline error types.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Index {index} out of range for {len} page(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid drag payload: {0:?}")]
    InvalidDragPayload(String),

    #[error("Split threshold {threshold} must lie strictly inside image height {height}")]
    InvalidSplit { threshold: u32, height: u32 },

    #[error("Segment height {height} exceeds the {limit} px canvas limit")]
    SegmentTooTall { height: u32, limit: u32 },

    #[error("Not ready: {0}")]
    NotReady(&'static str),

    #[error("Form is incomplete: {0}")]
    InvalidForm(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
