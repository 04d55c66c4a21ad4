use clap::{ArgAction, Parser, ValueEnum};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use strum::VariantNames;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use uv_unwrap_client::models::unwrap::PackMethod;
use uv_unwrap_client::services::artifacts::StagedFile;
use uv_unwrap_client::services::poll::CancelFlag;
use uv_unwrap_client::{ClientConfig, UnwrapClient, WorkflowError, WorkflowReport, WorkflowRequest};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Upload a mesh, unwrap it remotely, and download the result.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Mesh to unwrap (obj or glb). Defaults to the bundled sample mesh.
    mesh_file: Option<PathBuf>,

    /// Pack method: blender, none or uvpackmaster.
    #[arg(default_value = "blender")]
    variant: String,

    /// API root, overriding API_BASE_URL.
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Seconds between status checks.
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Maximum seconds to wait for the job.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Directory for the downloaded mesh and the info snapshot.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1.25)]
    distortion_threshold: f64,

    #[arg(long, default_value = "obj")]
    output_format: String,

    #[arg(long, default_value = "partuv")]
    model_preference: String,

    /// Ask the server to render UV layout previews.
    #[arg(long = "save-visuals", action = ArgAction::SetTrue, overrides_with = "no_save_visuals")]
    save_visuals: bool,

    /// Do not render previews (the default). The last of the two flags wins.
    #[arg(long = "no-save-visuals", action = ArgAction::SetTrue, overrides_with = "save_visuals")]
    no_save_visuals: bool,

    /// Ask the server to keep each unwrapped part as its own file.
    #[arg(long = "save-individual-parts", action = ArgAction::SetTrue)]
    save_individual_parts: bool,

    /// Wait up to this many seconds for the server before starting.
    #[arg(long, value_name = "SECS")]
    wait_for_server: Option<u64>,

    /// Skip the model / format / pack-method queries.
    #[arg(long = "skip-discovery", action = ArgAction::SetTrue)]
    skip_discovery: bool,

    /// Write run metrics here in Prometheus text format on exit.
    #[arg(long, value_name = "FILE")]
    metrics_file: Option<PathBuf>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Args {
    fn save_visuals(&self) -> bool {
        self.save_visuals && !self.no_save_visuals
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);
    let metrics = install_metrics();
    let metrics_file = args.metrics_file.clone();

    let outcome = run(args).await;

    if let Some(handle) = &metrics {
        export_metrics(handle, metrics_file.as_deref()).await;
    }

    match outcome {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "UV unwrapping workflow failed");
            eprintln!("error: {e}");
            if let Some(payload) = e.payload() {
                eprintln!("server response: {payload}");
            }
            if let WorkflowError::Input(_) = e {
                eprintln!(
                    "usage: uv-unwrap [mesh_file] [variant]  (variants: {})",
                    PackMethod::VARIANTS.join(", ")
                );
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn install_metrics() -> Option<PrometheusHandle> {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            return None;
        }
    };

    metrics::describe_counter!("uv_unwrap_jobs_submitted_total", "Unwrap jobs accepted by the server");
    metrics::describe_counter!("uv_unwrap_jobs_total", "Unwrap jobs by terminal outcome");
    metrics::describe_counter!("uv_unwrap_status_checks_total", "Job status queries issued");
    metrics::describe_histogram!("uv_unwrap_job_wait_seconds", "Time from submission to completion");

    Some(handle)
}

/// Publish the run's metrics as a Prometheus textfile, or log them at debug.
async fn export_metrics(handle: &PrometheusHandle, target: Option<&Path>) {
    let rendered = handle.render();
    let Some(target) = target else {
        tracing::debug!(metrics = %rendered, "Run metrics");
        return;
    };

    let written = async {
        let mut stage = StagedFile::create(target).await?;
        stage.writer().write_all(rendered.as_bytes()).await?;
        stage.commit().await
    }
    .await;

    match written {
        Ok(bytes) => tracing::info!(path = %target.display(), bytes, "Metrics written"),
        Err(e) => tracing::warn!(path = %target.display(), error = %e, "Cannot write metrics file"),
    }
}

/// Resolves on the second Ctrl-C. The first one only trips `cancel`, so the
/// workflow stops at its next step boundary or poll iteration.
async fn interrupted(cancel: CancelFlag) {
    if tokio::signal::ctrl_c().await.is_err() {
        return std::future::pending().await;
    }
    tracing::warn!("Interrupt received, stopping at the next step (Ctrl-C again to abort now)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_err() {
        return std::future::pending().await;
    }
    tracing::warn!("Second interrupt, aborting the request in flight");
}

async fn run(args: Args) -> Result<WorkflowReport, WorkflowError> {
    let wait_for_server = args.wait_for_server;
    let save_visuals = args.save_visuals();

    let mut config = ClientConfig::from_env()
        .map_err(|e| WorkflowError::Input(format!("invalid configuration: {e}")))?;

    if let Some(base_url) = args.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(interval) = args.interval {
        config.poll_interval_secs = interval;
    }
    if let Some(timeout) = args.timeout {
        config.poll_timeout_secs = timeout;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let mesh = args.mesh_file.unwrap_or_else(|| config.sample_mesh.clone());
    let request = WorkflowRequest {
        distortion_threshold: args.distortion_threshold,
        output_format: args.output_format,
        model_preference: args.model_preference,
        save_individual_parts: args.save_individual_parts,
        save_visuals,
        discover: !args.skip_discovery,
        ..WorkflowRequest::from_config(&config, mesh, args.variant)
    };

    tracing::info!(
        base_url = %config.base_url,
        mesh = %request.mesh_path.display(),
        variant = %request.variant,
        "Starting UV unwrapping workflow"
    );

    let client = UnwrapClient::from_config(&config).map_err(|e| {
        WorkflowError::Input(format!("cannot build HTTP client: {e}"))
    })?;

    let work = async {
        if let Some(secs) = wait_for_server {
            client.wait_until_ready(Duration::from_secs(secs)).await?;
        }
        client.run(&request).await
    };

    tokio::select! {
        result = work => result,
        () = interrupted(client.cancel_flag()) => Err(WorkflowError::Cancelled {
            step: "second interrupt",
            job_id: None,
        }),
    }
}

fn print_report(report: &WorkflowReport) {
    println!("UV unwrapping completed");
    println!("  file id:        {}", report.file_id);
    println!("  job id:         {}", report.job_id);
    println!("  components:     {}", report.result.num_components());
    println!("  distortion:     {}", report.result.distortion());
    if !report.result.output_mesh_path().is_empty() {
        println!("  server mesh:    {}", report.result.output_mesh_path());
    }
    if !report.result.packed_mesh_path().is_empty() {
        println!("  packed mesh:    {}", report.result.packed_mesh_path());
    }
    println!(
        "  mesh:           {} ({} bytes)",
        report.mesh_path.display(),
        report.mesh_bytes
    );
    println!("  info:           {}", report.info_path.display());
}
