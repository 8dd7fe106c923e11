//! Error types for papercast runs.

use thiserror::Error;

use crate::core::pipeline::Stage;

#[derive(Error, Debug)]
pub enum PapercastError {
    #[error("Source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("Document is missing required fields: {}", fields.join(", "))]
    MissingField { fields: Vec<&'static str> },

    #[error("Prompt template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Generation failed at {stage} stage: {source}")]
    Generation {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("Speech synthesis failed for utterance {sequence_id} ({speaker}): {source}")]
    Synthesis {
        sequence_id: u32,
        speaker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PapercastError {
    pub fn unavailable(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Stage that produced a generation failure, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Generation { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PapercastError>;
