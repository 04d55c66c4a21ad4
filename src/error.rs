use std::path::PathBuf;
use std::time::Duration;

/// Failure of one step of the unwrap workflow.
///
/// Every variant is fatal for the current run. Server-side failures carry
/// the raw response body in `payload` for diagnosis.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Bad arguments, missing local file, or an invalid option value.
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Upload failed: {reason}")]
    Upload { reason: String, payload: String },

    #[error("Job submission failed: {reason}")]
    Submission { reason: String, payload: String },

    #[error("Status check for job {job_id} failed: {reason}")]
    Poll {
        job_id: String,
        reason: String,
        payload: String,
    },

    /// The job ran and the server reported it as failed.
    #[error("Job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    /// The client-side wait ceiling was reached before a terminal status.
    #[error("Job {job_id} did not finish within {timeout:?} ({polls} status checks)")]
    Timeout {
        job_id: String,
        timeout: Duration,
        polls: u32,
    },

    /// Stop requested by the user. `step` names the step that was about to
    /// run, or `polling` when the flag was seen between status checks.
    #[error("Workflow cancelled ({step})")]
    Cancelled {
        step: &'static str,
        job_id: Option<String>,
    },

    #[error("Service at {base_url} not reachable within {timeout:?}")]
    Unavailable { base_url: String, timeout: Duration },

    #[error("Download failed: {reason}")]
    Download { reason: String, payload: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkflowError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkflowError::Io {
            path: path.into(),
            source,
        }
    }

    /// Raw server response attached to the failure, if any.
    pub fn payload(&self) -> Option<&str> {
        match self {
            WorkflowError::Upload { payload, .. }
            | WorkflowError::Submission { payload, .. }
            | WorkflowError::Poll { payload, .. }
            | WorkflowError::Download { payload, .. } => {
                Some(payload.as_str()).filter(|p| !p.is_empty())
            }
            _ => None,
        }
    }

    /// Short machine-readable name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Input(_) => "input",
            WorkflowError::Upload { .. } => "upload",
            WorkflowError::Submission { .. } => "submission",
            WorkflowError::Poll { .. } => "poll",
            WorkflowError::Job { .. } => "job",
            WorkflowError::Timeout { .. } => "timeout",
            WorkflowError::Cancelled { .. } => "cancelled",
            WorkflowError::Unavailable { .. } => "unavailable",
            WorkflowError::Download { .. } => "download",
            WorkflowError::Io { .. } => "io",
        }
    }

    /// Process exit status for the CLI. Every failure maps to 1.
    pub fn exit_code(&self) -> u8 {
        1
    }
}
