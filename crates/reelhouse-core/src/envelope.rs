use serde::Serialize;

use crate::{ContractError, Stage, UtcDateTime};

/// Standard response envelope for all `reelhouse` machine-readable outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub meta: EnvelopeMeta,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}

impl<T> Envelope<T> {
    pub fn success(meta: EnvelopeMeta, data: T) -> Self {
        Self {
            meta,
            data,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(
        meta: EnvelopeMeta,
        data: T,
        errors: Vec<EnvelopeError>,
    ) -> Result<Self, ContractError> {
        meta.validate_schema_compliance()?;
        for error in &errors {
            error.validate()?;
        }

        Ok(Self { meta, data, errors })
    }
}

/// Metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeMeta {
    pub request_id: String,
    pub schema_version: String,
    pub generated_at: UtcDateTime,
    /// Pipeline run that produced the data, for stage commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Stages executed by the command, in order. Empty for read-only commands.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl EnvelopeMeta {
    pub fn new(
        request_id: impl Into<String>,
        schema_version: impl Into<String>,
        stages: Vec<Stage>,
        latency_ms: u64,
    ) -> Result<Self, ContractError> {
        let meta = Self {
            request_id: request_id.into(),
            schema_version: schema_version.into(),
            generated_at: UtcDateTime::now(),
            run_id: None,
            stages,
            latency_ms,
            warnings: Vec::new(),
        };
        meta.validate_schema_compliance()?;
        Ok(meta)
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn validate_schema_compliance(&self) -> Result<(), ContractError> {
        if self.request_id.trim().len() < 8 {
            return Err(ContractError::InvalidRequestId);
        }

        if !is_valid_schema_version(&self.schema_version) {
            return Err(ContractError::InvalidSchemaVersion {
                value: self.schema_version.clone(),
            });
        }

        Ok(())
    }
}

/// Structured error payload for failed responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Stage that failed, when the error came from the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl EnvelopeError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self, ContractError> {
        let error = Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
            stage: None,
        };
        error.validate()?;
        Ok(error)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.code.trim().is_empty() {
            return Err(ContractError::EmptyErrorCode);
        }

        if self.message.trim().is_empty() {
            return Err(ContractError::EmptyErrorMessage);
        }

        Ok(())
    }
}

/// `vMAJOR.MINOR.PATCH` with numeric parts.
fn is_valid_schema_version(value: &str) -> bool {
    let Some(version) = value.strip_prefix('v') else {
        return false;
    };
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_meta() {
        let meta = EnvelopeMeta::new("request-12345", "v1.0.0", vec![Stage::Clean], 11)
            .expect("meta should be valid")
            .with_run_id("run-0001");

        assert_eq!(meta.schema_version, "v1.0.0");
        assert_eq!(meta.run_id.as_deref(), Some("run-0001"));
    }

    #[test]
    fn read_only_commands_omit_stages() {
        let meta = EnvelopeMeta::new("request-12345", "v1.0.0", Vec::new(), 3).expect("valid");
        let json = serde_json::to_value(&meta).expect("serialize");
        assert!(json.get("stages").is_none());
        assert!(json.get("run_id").is_none());
    }

    #[test]
    fn rejects_bad_schema_version() {
        let err = EnvelopeMeta::new("request-12345", "1.0.0", vec![Stage::Load], 1)
            .expect_err("must fail");
        assert!(matches!(err, ContractError::InvalidSchemaVersion { .. }));
    }

    #[test]
    fn rejects_empty_error_code() {
        let err = EnvelopeError::new("", "message").expect_err("must fail");
        assert!(matches!(err, ContractError::EmptyErrorCode));
    }

    #[test]
    fn serializes_failed_stage() {
        let error = EnvelopeError::new("validation_error", "quality gate failed")
            .expect("valid")
            .with_stage(Stage::QualityCheck);
        let json = serde_json::to_value(&error).expect("serialize");
        assert_eq!(json["stage"], "quality_check");
    }

    #[test]
    fn rejects_short_request_id() {
        let err = EnvelopeMeta::new("req", "v1.0.0", Vec::new(), 1).expect_err("must fail");
        assert!(matches!(err, ContractError::InvalidRequestId));
    }
}
