mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use rf_av::ToolRegistry;
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_jobs::{JobStatus, JobStore, MemoryJobStore, Orchestrator, RequestedWork, SubmitOptions, Upload};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(rf_server::start(config))?;
            Ok(())
        }
        Commands::Process {
            input,
            formats,
            output_dir,
            output_format,
            lossless,
            fit,
            video_quality,
        } => {
            let mut config = config;
            if let Some(dir) = output_dir {
                config.server.output_dir = dir;
            }
            let options = SubmitOptions {
                output_format: output_format.parse()?,
                lossless,
                fit: fit.parse()?,
                video_quality: video_quality.parse()?,
            };
            let work = parse_formats(&formats)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(process_file(config, &input, work, options))
        }
        Commands::Formats { json } => list_formats(&config, json),
        Commands::Check => check_tools(&config),
        Commands::Config => show_config(&config),
    }
}

/// Parse `platform:Name` pairs into a request map, preserving order per
/// platform.
fn parse_formats(raw: &[String]) -> Result<RequestedWork> {
    let mut work = RequestedWork::new();
    for entry in raw {
        let Some((platform, name)) = entry.split_once(':') else {
            bail!("format must be written as platform:Name, got {entry:?}");
        };
        if platform.is_empty() || name.is_empty() {
            bail!("format must be written as platform:Name, got {entry:?}");
        }
        work.entry(platform.to_string()).or_default().push(name.to_string());
    }
    Ok(work)
}

async fn process_file(
    config: Config,
    input: &Path,
    work: RequestedWork,
    options: SubmitOptions,
) -> Result<()> {
    if !input.is_file() {
        bail!("Input file does not exist: {}", input.display());
    }

    let mime_type = input
        .extension()
        .and_then(|e| e.to_str())
        .and_then(rf_core::mime_from_extension)
        .with_context(|| format!("cannot tell the media type of {}", input.display()))?;

    tokio::fs::create_dir_all(&config.server.output_dir).await?;

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::from_config(&config, tools, store, Arc::new(EventBus::default()))?;

    let upload = Upload {
        path: input.to_path_buf(),
        original_file_name: input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        mime_type: mime_type.to_string(),
    };
    let job = orchestrator.submit(upload, work, options).await?;
    tracing::info!(job_id = %job.id, "processing {}", input.display());

    // Every format may take the full transcode timeout.
    let budget = Duration::from_secs(config.video.timeout_secs.max(60))
        * u32::try_from(job.total_formats().max(1)).unwrap_or(u32::MAX);
    let done = orchestrator.wait_for_terminal(job.id, budget).await?;

    println!("{}", serde_json::to_string_pretty(&done)?);

    if done.status == JobStatus::Failed {
        bail!(
            "job failed: {}",
            done.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn list_formats(config: &Config, json: bool) -> Result<()> {
    let catalog = config.format_catalog()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog.grouped())?);
        return Ok(());
    }

    for (platform, specs) in catalog.grouped() {
        println!("{platform}");
        for spec in specs {
            println!(
                "  {:<12} {:>11}  {}",
                spec.name,
                spec.dimensions.to_string(),
                spec.aspect_ratio
            );
        }
    }
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    let registry = ToolRegistry::discover(&config.tools);
    println!("Checking external tools...\n");

    let mut video_unavailable = false;
    for info in registry.check_all() {
        if info.available {
            println!(
                "  \u{2713} {} {}",
                info.name,
                info.version.as_deref().unwrap_or("(version unknown)")
            );
            if let Some(path) = info.path {
                println!("      {}", path.display());
            }
        } else {
            let required = info.name == rf_av::tools::FFMPEG || info.name == rf_av::tools::FFPROBE;
            let note = if required { "required for video" } else { "optional" };
            println!("  \u{2717} {} not found ({note})", info.name);
            video_unavailable |= required;
        }
    }

    if video_unavailable {
        println!("\nImages will still be processed; video formats will fail.");
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    let warnings = config.validate();
    if warnings.is_empty() {
        eprintln!("\nConfiguration is valid.");
    } else {
        eprintln!("\nWarnings:");
        for warning in warnings {
            eprintln!("  - {warning}");
        }
    }
    Ok(())
}
