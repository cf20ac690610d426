// ==================================================================================
// `error` module: failure kinds shared by every pipeline stage
// ==================================================================================
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the alignment, estimator and aggregation stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing CDS for {}", .0.join(", "))]
    MissingInput(Vec<String>),

    #[error("{tool} failed with {status}{}", detail_suffix(.detail))]
    ExternalTool {
        tool: String,
        status: String,
        detail: Option<String>,
    },

    #[error("{tool} timed out after {:.1?}", .after)]
    Timeout { tool: String, after: Duration },

    #[error("{tool} cancelled")]
    Cancelled { tool: String },

    #[error("format error in {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("parse error in {}:{line}: {reason}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no .axt files found in {}", .0.display())]
    EmptyBatch(PathBuf),

    #[error("no AXT generated out of {0} pair(s); check gene IDs between pairs and CDS fasta")]
    ZeroSuccess(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {}", d),
        None => String::new(),
    }
}

impl PipelineError {
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status used by `main` for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::ZeroSuccess(_) => 2,
            PipelineError::EmptyBatch(_) => 3,
            PipelineError::ExternalTool { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::Cancelled { .. } => 4,
            PipelineError::Parse { .. } => 5,
            _ => 1,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
