use thiserror::Error;

use reelhouse_warehouse::{ValidationError, WarehouseError};

use crate::download::DownloadError;
use crate::Stage;

/// Validation and contract errors exposed by `reelhouse-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error(
        "invalid stage '{value}', expected one of download, load, clean, quality_check, build_warehouse, analytics"
    )]
    InvalidStage { value: String },
    #[error("stage range is reversed: '{from}' runs after '{to}'")]
    ReversedStageRange { from: Stage, to: Stage },

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
    #[error("schema_version must match vMAJOR.MINOR.PATCH: '{value}'")]
    InvalidSchemaVersion { value: String },

    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// A failed pipeline stage, tagged with the stage's error category.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("loading raw tables failed: {0}")]
    Ingest(#[source] WarehouseError),

    #[error("cleaning failed: {0}")]
    Transform(#[source] WarehouseError),

    /// The quality gate rejected the cleaned data. `first` is the first
    /// failure in check order; `failures` holds all of them.
    #[error("quality gate failed: {first}")]
    Validation {
        #[source]
        first: ValidationError,
        failures: Vec<ValidationError>,
    },

    #[error("warehouse build failed: {0}")]
    Build(#[source] WarehouseError),

    #[error("report export failed: {0}")]
    Report(#[source] WarehouseError),

    #[error("warehouse store error: {0}")]
    Store(#[source] WarehouseError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl PipelineError {
    /// Stable machine-readable code for envelopes and run log details.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Download(_) => "download_error",
            Self::Ingest(_) => "ingest_error",
            Self::Transform(_) => "transform_error",
            Self::Validation { .. } => "validation_error",
            Self::Build(_) => "build_error",
            Self::Report(_) => "report_error",
            Self::Store(_) => "store_error",
            Self::Contract(_) => "contract_error",
        }
    }
}
