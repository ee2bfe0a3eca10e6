//! Core contracts and orchestration for reelhouse.
//!
//! This crate contains:
//! - Pipeline stages and the response envelope shared by every command
//! - Configuration resolved from the environment
//! - The dataset fetcher
//! - The pipeline runner that drives the warehouse stages and writes the run log

pub mod config;
pub mod domain;
pub mod download;
pub mod envelope;
pub mod error;
pub mod pipeline;

pub use config::{DatasetConfig, PipelineConfig};
pub use domain::{Stage, UtcDateTime};
pub use download::{DatasetFetcher, DownloadError, FetchReport};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{ContractError, PipelineError};
pub use pipeline::{
    Pipeline, PipelineContext, PipelineReport, RunFailure, StageOutcome, StageOutput,
};
pub use reelhouse_warehouse::{
    QualityReport, QueryGuardrails, QueryResult, SqlColumn, StageRunRecord, ValidationError,
    Warehouse, WarehouseConfig, WarehouseError,
};
