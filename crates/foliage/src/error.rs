use crate::pool::BatchId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FoliageError {
    /// A collaborator or input is missing or malformed; the request is dropped.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another capture cycle is still extracting, processing or committing.
    #[error("capture cycle {0} is still in flight")]
    CaptureInProgress(u64),

    #[error("raster readback failed")]
    ReadbackFailed,

    #[error("no batch registered for {0}")]
    MissingTargetBatch(BatchId),

    #[error("failed to read foliage config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse foliage config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Geodesy(#[from] geodesy::GeodesyError),
}

impl FoliageError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T, E = FoliageError> = std::result::Result<T, E>;
