use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Status of an unwrapping job as reported by `GET /system/jobs/{job_id}`.
///
/// Values outside the known set are kept verbatim in `Unknown` so newer
/// servers can introduce statuses without breaking the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Unknown(String),
}

impl From<&str> for JobStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            other => JobStatus::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => f.write_str("queued"),
            JobStatus::Processing => f.write_str("processing"),
            JobStatus::Completed => f.write_str("completed"),
            JobStatus::Failed => f.write_str("failed"),
            JobStatus::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// One decoded status response.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// Percentage reported by the server, when it reports one.
    pub progress: Option<f64>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Decode a status payload. Only `status` is mandatory; everything else
    /// falls back to "absent".
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "status response is not a JSON object".to_string())?;

        let status = match obj.get("status").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => JobStatus::from(s.trim()),
            _ => return Err("status response has no `status` field".to_string()),
        };

        let result = match obj.get("result") {
            Some(Value::Object(map)) => Some(JobResult::new(map.clone())),
            _ => None,
        };

        // Structured errors are kept as their JSON text.
        let error = match obj.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(e)) if e.is_empty() => None,
            Some(Value::String(e)) => Some(e.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            status,
            progress: obj.get("progress").and_then(Value::as_f64),
            result,
            error,
        })
    }
}

/// Server-defined output of a completed job.
///
/// The map is kept exactly as received; the accessors only read from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobResult(Map<String, Value>);

impl JobResult {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn output_mesh_path(&self) -> &str {
        self.str_or_empty("output_mesh_path")
    }

    pub fn packed_mesh_path(&self) -> &str {
        self.str_or_empty("packed_mesh_path")
    }

    pub fn num_components(&self) -> u64 {
        self.0
            .get("num_components")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn distortion(&self) -> f64 {
        self.0
            .get("distortion")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Nested metadata block (`uv_info`), or `Value::Null` when absent.
    pub fn uv_info(&self) -> &Value {
        self.0.get("uv_info").unwrap_or(&Value::Null)
    }

    fn str_or_empty(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or("")
    }
}
