use reelhouse_core::{ContractError, PipelineError, WarehouseError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Contract(_) => 2,
            Self::Pipeline(error) => match error {
                PipelineError::Contract(_) => 2,
                PipelineError::Validation { .. } => 3,
                PipelineError::Ingest(_)
                | PipelineError::Transform(_)
                | PipelineError::Build(_)
                | PipelineError::Report(_) => 6,
                PipelineError::Download(_) => 7,
                PipelineError::Store(_) => 10,
            },
            Self::Warehouse(WarehouseError::QueryRejected(_)) => 2,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) | Self::Io(_) => 10,
        }
    }
}
