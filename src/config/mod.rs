use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:7842/api/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Root of the versioned API, without a trailing slash.
    #[serde(default = "default_base_url", rename = "api_base_url")]
    pub base_url: String,

    /// Seconds between two job status queries.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Hard ceiling on the total wait for a job, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Per-request timeout applied by the HTTP client. Uploads of large
    /// meshes need the generous default.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retry budget for idempotent reads (discovery, readiness, status).
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// Directory receiving the downloaded mesh and the info snapshot.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Mesh used when no path is given on the command line.
    #[serde(default = "default_sample_mesh")]
    pub sample_mesh: PathBuf,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_poll_timeout_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_read_retries() -> u32 {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test_outputs")
}

fn default_sample_mesh() -> PathBuf {
    PathBuf::from("assets/example_uv/sample.obj")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            read_retries: default_read_retries(),
            output_dir: default_output_dir(),
            sample_mesh: default_sample_mesh(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build a config from an explicit set of variables (tests, embedding).
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config: ClientConfig = envy::from_iter(vars)?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
