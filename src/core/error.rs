use thiserror::Error;

use crate::core::voice::VoiceStrategy;

/// Why an artifact could not be used. None of these are fatal: callers treat
/// every variant as "the step that produces this artifact has not run yet".
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{0} does not exist")]
    Missing(String),
    #[error("{path} is malformed: {reason}")]
    Malformed { path: String, reason: String },
    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

impl ArtifactError {
    pub fn is_missing(&self) -> bool {
        matches!(self, ArtifactError::Missing(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoiceEntryError {
    #[error("unknown voice type '{0}'")]
    UnknownType(String),
    #[error("entry mixes preset and reference-audio fields")]
    MixedStrategies,
    #[error("field '{field}' does not apply to {strategy} voices")]
    FieldMismatch {
        field: &'static str,
        strategy: VoiceStrategy,
    },
}
