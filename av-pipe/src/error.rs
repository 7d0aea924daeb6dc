use std::fmt::{Display, Formatter};

/// Failure taxonomy shared by every stage of the pipeline.
///
/// Codec and container backends report plain `anyhow` errors; the stages wrap
/// them with the context of the call that failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("resource exhausted while {context}: {cause:#}")]
    ResourceExhaustion {
        context: String,
        cause: anyhow::Error,
    },
    #[error("io error while {context}: {cause:#}")]
    Io {
        context: String,
        cause: anyhow::Error,
    },
    #[error("codec error while {context}: {cause:#}")]
    Codec {
        context: String,
        cause: anyhow::Error,
    },
    #[error("conversion error: {0:#}")]
    Conversion(anyhow::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("duration reached after {frames} frames")]
    DurationReached { frames: u64 },
    #[error("pipeline aborted")]
    Aborted,
}

impl PipelineError {
    pub fn resource(context: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        PipelineError::ResourceExhaustion {
            context: context.into(),
            cause: cause.into(),
        }
    }

    pub fn io(context: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        PipelineError::Io {
            context: context.into(),
            cause: cause.into(),
        }
    }

    pub fn codec(context: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        PipelineError::Codec {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// Fatal errors end the run with a failed result. The rest are reported to
    /// the caller of the operation and leave the pipeline running.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Configuration(_)
                | PipelineError::ResourceExhaustion { .. }
                | PipelineError::Io { .. }
                | PipelineError::Codec { .. }
                | PipelineError::Conversion(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Terminal outcome of one export run, delivered exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportResult {
    Succeeded,
    Canceled,
    Failed,
}

impl Display for ExportResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExportResult::Succeeded => "succeeded",
            ExportResult::Canceled => "canceled",
            ExportResult::Failed => "failed",
        };
        f.write_str(name)
    }
}
