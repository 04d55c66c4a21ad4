use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::WorkflowError;
use crate::models::capabilities::Capabilities;
use crate::models::job::{JobResult, JobSnapshot, JobStatus};
use crate::models::unwrap::{MeshFormat, PackMethod, UnwrapOptions, UploadedFile};
use crate::services::artifacts::{write_json_snapshot, StagedFile};
use crate::services::poll::{poll_until, CancelFlag, Clock, PollOutcome, TokioClock};
use crate::services::retry::{with_retries, with_retries_until, RetryError, RetryPolicy};
use crate::services::transport::{FileUpload, HttpTransport, Transport, TransportError};

pub const MODELS_PATH: &str = "/mesh-uv-unwrapping/available-models";
pub const FORMATS_PATH: &str = "/mesh-uv-unwrapping/supported-formats";
pub const PACK_METHODS_PATH: &str = "/mesh-uv-unwrapping/pack-methods";
pub const UPLOAD_PATH: &str = "/file-upload/mesh";
pub const SUBMIT_PATH: &str = "/mesh-uv-unwrapping/unwrap-mesh";
pub const SERVER_STATUS_PATH: &str = "/system/status/";

const READY_PROBE_INTERVAL: Duration = Duration::from_secs(2);

pub fn job_path(job_id: &str) -> String {
    format!("/system/jobs/{job_id}")
}

pub fn download_path(job_id: &str) -> String {
    format!("/system/jobs/{job_id}/download")
}

/// Everything one end-to-end run needs.
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub mesh_path: PathBuf,
    /// Pack method name as typed by the user; validated before any request.
    pub variant: String,
    pub distortion_threshold: f64,
    pub output_format: String,
    pub model_preference: String,
    pub save_individual_parts: bool,
    pub save_visuals: bool,
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub discover: bool,
}

impl WorkflowRequest {
    pub fn new(mesh_path: impl Into<PathBuf>, variant: impl Into<String>) -> Self {
        let defaults = UnwrapOptions::new(PackMethod::Blender);
        Self {
            mesh_path: mesh_path.into(),
            variant: variant.into(),
            distortion_threshold: defaults.distortion_threshold,
            output_format: defaults.output_format.to_string(),
            model_preference: defaults.model_preference,
            save_individual_parts: defaults.save_individual_parts,
            save_visuals: defaults.save_visuals,
            output_dir: PathBuf::from("test_outputs"),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(600),
            discover: true,
        }
    }

    pub fn from_config(
        config: &ClientConfig,
        mesh_path: impl Into<PathBuf>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            ..Self::new(mesh_path, variant)
        }
    }

    /// Validated job options. Fails with `WorkflowError::Input`.
    pub fn options(&self) -> Result<UnwrapOptions, WorkflowError> {
        let options = UnwrapOptions {
            distortion_threshold: self.distortion_threshold,
            pack_method: PackMethod::parse(&self.variant)?,
            output_format: MeshFormat::parse(&self.output_format)?,
            save_individual_parts: self.save_individual_parts,
            save_visuals: self.save_visuals,
            model_preference: self.model_preference.clone(),
        };
        options.check()?;
        Ok(options)
    }

    pub fn mesh_output_path(&self, format: MeshFormat) -> PathBuf {
        self.output_dir
            .join(format!("mesh_with_uv_{}.{}", self.variant, format.extension()))
    }

    pub fn info_output_path(&self) -> PathBuf {
        self.output_dir.join(format!("uv_info_{}.json", self.variant))
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub capabilities: Option<Capabilities>,
    pub file_id: String,
    pub job_id: String,
    pub result: JobResult,
    pub mesh_path: PathBuf,
    pub mesh_bytes: u64,
    pub info_path: PathBuf,
}

/// Drives upload → submit → poll → download against the unwrap API.
pub struct UnwrapClient<T, C = TokioClock> {
    transport: T,
    clock: C,
    retry: RetryPolicy,
    cancel: CancelFlag,
}

impl UnwrapClient<HttpTransport, TokioClock> {
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout())?;
        Ok(Self::new(transport, TokioClock::default())
            .with_retry_policy(RetryPolicy::with_retries(config.read_retries)))
    }
}

impl<T: Transport, C: Clock> UnwrapClient<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            retry: RetryPolicy::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fail with `Cancelled` if a stop was requested before `step` starts.
    fn checkpoint(&self, step: &'static str, job_id: Option<&str>) -> Result<(), WorkflowError> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        tracing::warn!(step, job_id, "Cancelled before step");
        Err(WorkflowError::Cancelled {
            step,
            job_id: job_id.map(str::to_string),
        })
    }

    /// Query models, formats and pack methods. Failures are logged and
    /// leave the matching field empty.
    pub async fn discover_capabilities(&self) -> Capabilities {
        Capabilities {
            available_models: self.discover(MODELS_PATH).await,
            supported_formats: self.discover(FORMATS_PATH).await,
            pack_methods: self.discover(PACK_METHODS_PATH).await,
        }
    }

    async fn discover(&self, path: &str) -> Option<Value> {
        match with_retries(&self.clock, self.retry, path, || self.transport.get_json(path)).await {
            Ok(value) => {
                tracing::debug!(endpoint = path, response = %value, "Discovery response");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = path,
                    error = %e,
                    payload = %e.payload(),
                    "Discovery query failed, continuing without it"
                );
                None
            }
        }
    }

    /// Block until `GET /system/status/` answers with a 2xx, or `timeout` passes.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), WorkflowError> {
        let transport = &self.transport;
        let clock = &self.clock;
        let deadline = clock.now().saturating_add(timeout);
        let outcome = poll_until(
            clock,
            READY_PROBE_INTERVAL,
            timeout,
            &self.cancel,
            move |attempt| async move {
                let limit = deadline.saturating_sub(clock.now());
                match transport.get_json_within(SERVER_STATUS_PATH, limit).await {
                    // A 2xx with a non-JSON body still means the server is up.
                    Ok(_) | Err(TransportError::Decode { .. }) => Ok::<_, WorkflowError>(Some(())),
                    Err(e) => {
                        tracing::info!(attempt, error = %e, "Waiting for server");
                        Ok(None)
                    }
                }
            },
        )
        .await?;

        match outcome {
            PollOutcome::Done { attempts, .. } => {
                tracing::info!(attempts, "Server is up");
                Ok(())
            }
            PollOutcome::TimedOut { .. } | PollOutcome::Cancelled { .. } => {
                Err(WorkflowError::Unavailable {
                    base_url: self.transport.base_url().to_string(),
                    timeout,
                })
            }
        }
    }

    /// Upload a local mesh as multipart field `file`.
    pub async fn upload_file(&self, path: &Path) -> Result<UploadedFile, WorkflowError> {
        check_mesh_path(path).await?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            WorkflowError::Input(format!("cannot read mesh file {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mesh".to_string());
        let size = bytes.len() as u64;

        tracing::info!(file = %path.display(), size, "Uploading mesh");

        let response = self
            .transport
            .upload_file(
                UPLOAD_PATH,
                FileUpload {
                    field: "file",
                    file_name: file_name.clone(),
                    bytes,
                },
            )
            .await
            .map_err(|e| WorkflowError::Upload {
                reason: e.to_string(),
                payload: e.payload(),
            })?;

        let file_id = id_field(&response, "file_id").ok_or_else(|| WorkflowError::Upload {
            reason: missing_field_reason(&response, "file_id"),
            payload: response.to_string(),
        })?;

        tracing::info!(file_id = %file_id, "Mesh uploaded");
        Ok(UploadedFile {
            file_id,
            file_name,
            size,
        })
    }

    /// Submit an unwrap job for an uploaded mesh and return its id.
    pub async fn submit_job(
        &self,
        file: UploadedFile,
        options: &UnwrapOptions,
    ) -> Result<String, WorkflowError> {
        options.check()?;

        let body = serde_json::to_value(options.to_request(&file.file_id)).map_err(|e| {
            WorkflowError::Submission {
                reason: format!("cannot encode request: {e}"),
                payload: String::new(),
            }
        })?;

        tracing::info!(
            file_id = %file.file_id,
            pack_method = %options.pack_method,
            output_format = %options.output_format,
            distortion_threshold = options.distortion_threshold,
            "Submitting unwrap job"
        );

        let response = self
            .transport
            .post_json(SUBMIT_PATH, &body)
            .await
            .map_err(|e| WorkflowError::Submission {
                reason: e.to_string(),
                payload: e.payload(),
            })?;

        let job_id = id_field(&response, "job_id").ok_or_else(|| WorkflowError::Submission {
            reason: missing_field_reason(&response, "job_id"),
            payload: response.to_string(),
        })?;

        metrics::counter!("uv_unwrap_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Poll a job every `interval` until it completes, fails, or `timeout` passes.
    pub async fn poll_until_terminal(
        &self,
        job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<JobResult, WorkflowError> {
        let started = self.clock.now();
        let deadline = started.saturating_add(timeout);
        let outcome = poll_until(&self.clock, interval, timeout, &self.cancel, move |attempt| {
            self.check_status(job_id, attempt, deadline, timeout)
        })
        .await
        .inspect_err(|e| {
            metrics::counter!("uv_unwrap_jobs_total", "outcome" => e.kind()).increment(1);
        })?;

        let waited = self.clock.now().saturating_sub(started);
        match outcome {
            PollOutcome::Done { value, attempts } => {
                metrics::counter!("uv_unwrap_jobs_total", "outcome" => "completed").increment(1);
                metrics::histogram!("uv_unwrap_job_wait_seconds").record(waited.as_secs_f64());
                tracing::info!(
                    job_id,
                    attempts,
                    waited_ms = waited.as_millis() as u64,
                    num_components = value.num_components(),
                    distortion = value.distortion(),
                    "Job completed"
                );
                Ok(value)
            }
            PollOutcome::TimedOut { attempts, elapsed } => {
                metrics::counter!("uv_unwrap_jobs_total", "outcome" => "timeout").increment(1);
                tracing::error!(
                    job_id,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job did not reach a terminal status in time"
                );
                Err(WorkflowError::Timeout {
                    job_id: job_id.to_string(),
                    timeout,
                    polls: attempts,
                })
            }
            PollOutcome::Cancelled { attempts } => {
                tracing::warn!(job_id, attempts, "Polling cancelled");
                Err(WorkflowError::Cancelled {
                    step: "polling",
                    job_id: Some(job_id.to_string()),
                })
            }
        }
    }

    /// One status query, retried within what is left of `deadline`. A
    /// transient failure that runs into the deadline is a `Timeout`.
    async fn check_status(
        &self,
        job_id: &str,
        attempt: u32,
        deadline: Duration,
        timeout: Duration,
    ) -> Result<Option<JobResult>, WorkflowError> {
        let path = job_path(job_id);
        let path = path.as_str();
        metrics::counter!("uv_unwrap_status_checks_total").increment(1);

        let fetched = with_retries_until(&self.clock, self.retry, Some(deadline), "job status", || {
            let limit = deadline.saturating_sub(self.clock.now());
            self.transport.get_json_within(path, limit)
        })
        .await;

        let value = match fetched {
            Ok(value) => value,
            Err(RetryError::DeadlineReached { last, .. }) => {
                return Err(self.status_timed_out(job_id, attempt, timeout, &last));
            }
            Err(RetryError::Failed(e)) if e.is_transient() && self.clock.now() >= deadline => {
                return Err(self.status_timed_out(job_id, attempt, timeout, &e));
            }
            Err(RetryError::Failed(e)) => {
                return Err(WorkflowError::Poll {
                    job_id: job_id.to_string(),
                    reason: e.to_string(),
                    payload: e.payload(),
                });
            }
        };

        let snapshot = JobSnapshot::from_value(&value).map_err(|reason| WorkflowError::Poll {
            job_id: job_id.to_string(),
            reason,
            payload: value.to_string(),
        })?;

        match snapshot.status {
            JobStatus::Completed => {
                let result = snapshot.result.unwrap_or_else(|| {
                    tracing::warn!(job_id, "Job completed without a result payload");
                    JobResult::default()
                });
                Ok(Some(result))
            }
            JobStatus::Failed => {
                let message = snapshot
                    .error
                    .unwrap_or_else(|| "job failed without an error message".to_string());
                tracing::error!(job_id, attempt, error = %message, "Job failed");
                Err(WorkflowError::Job {
                    job_id: job_id.to_string(),
                    message,
                })
            }
            JobStatus::Queued | JobStatus::Processing => {
                tracing::info!(
                    job_id,
                    attempt,
                    status = %snapshot.status,
                    progress = snapshot.progress.unwrap_or(0.0),
                    "Job in progress"
                );
                Ok(None)
            }
            JobStatus::Unknown(raw) => {
                tracing::warn!(
                    job_id,
                    attempt,
                    status = %raw,
                    "Unrecognized job status, continuing to poll"
                );
                Ok(None)
            }
        }
    }

    fn status_timed_out(
        &self,
        job_id: &str,
        attempt: u32,
        timeout: Duration,
        last: &TransportError,
    ) -> WorkflowError {
        tracing::error!(
            job_id,
            attempts = attempt,
            error = %last,
            "Status query still failing at the wait ceiling"
        );
        WorkflowError::Timeout {
            job_id: job_id.to_string(),
            timeout,
            polls: attempt,
        }
    }

    /// Stream the job's primary artifact to `destination`, creating its
    /// directory. Nothing is left at `destination` on failure.
    pub async fn download_result(
        &self,
        job_id: &str,
        destination: &Path,
    ) -> Result<u64, WorkflowError> {
        let mut stage = StagedFile::create(destination)
            .await
            .map_err(|e| WorkflowError::io(destination, e))?;

        tracing::info!(job_id, destination = %destination.display(), "Downloading result");

        let written = self
            .transport
            .download_to(&download_path(job_id), stage.writer())
            .await
            .map_err(|e| WorkflowError::Download {
                reason: e.to_string(),
                payload: e.payload(),
            })?;

        if written == 0 {
            return Err(WorkflowError::Download {
                reason: format!("server returned an empty artifact for job {job_id}"),
                payload: String::new(),
            });
        }

        let size = stage.commit().await.map_err(|e| WorkflowError::Download {
            reason: format!("cannot finalize {}: {e}", destination.display()),
            payload: String::new(),
        })?;

        tracing::info!(job_id, bytes = size, "Result saved");
        Ok(size)
    }

    /// Full workflow: validate, discover, upload, submit, poll, download,
    /// and write the result snapshot.
    pub async fn run(&self, request: &WorkflowRequest) -> Result<WorkflowReport, WorkflowError> {
        let options = request.options()?;
        check_mesh_path(&request.mesh_path).await?;

        self.checkpoint("discovery", None)?;
        let capabilities = if request.discover {
            let capabilities = self.discover_capabilities().await;
            if let Ok(summary) = serde_json::to_string(&capabilities) {
                tracing::info!(capabilities = %summary, "Service capabilities");
            }
            Some(capabilities)
        } else {
            None
        };

        self.checkpoint("upload", None)?;
        let uploaded = self.upload_file(&request.mesh_path).await?;
        let file_id = uploaded.file_id.clone();

        self.checkpoint("submission", None)?;
        let job_id = self.submit_job(uploaded, &options).await?;

        let result = self
            .poll_until_terminal(&job_id, request.poll_interval, request.poll_timeout)
            .await?;

        self.checkpoint("download", Some(&job_id))?;
        let mesh_path = request.mesh_output_path(options.output_format);
        let mesh_bytes = self.download_result(&job_id, &mesh_path).await?;

        let info_path = request.info_output_path();
        write_json_snapshot(&info_path, &result)
            .await
            .map_err(|e| WorkflowError::io(&info_path, e))?;

        Ok(WorkflowReport {
            capabilities,
            file_id,
            job_id,
            result,
            mesh_path,
            mesh_bytes,
            info_path,
        })
    }
}

/// The mesh must exist, be a regular file, and carry a supported extension.
async fn check_mesh_path(path: &Path) -> Result<(), WorkflowError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        WorkflowError::Input(format!("mesh file not found: {}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(WorkflowError::Input(format!(
            "mesh path is not a file: {}",
            path.display()
        )));
    }
    MeshFormat::from_path(path)?;
    Ok(())
}

/// Non-empty string (or numeric) id under `key`.
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn missing_field_reason(value: &Value, key: &str) -> String {
    match value {
        Value::Null => "empty response body".to_string(),
        Value::Object(obj) if obj.contains_key(key) => format!("`{key}` is empty"),
        _ => format!("response has no `{key}`"),
    }
}
