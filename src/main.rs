mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use sc_av::{ScratchSpace, ToolRegistry};
use sc_core::config::Config;
use sc_core::{ArtifactKind, JobId, MediaKind};
use sc_server::conversion::{ConversionJob, Coordinator, StageLimits, UploadedFile};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick levels from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "stillcast=trace,sc_core=trace,sc_av=trace,sc_server=trace,tower_http=debug".to_string()
        } else {
            "stillcast=info,sc_core=info,sc_av=info,sc_server=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            runtime()?.block_on(sc_server::start(config))?;
            Ok(())
        }
        Commands::Convert {
            image,
            audio,
            output,
        } => {
            let config = Config::load_or_default(cli.config.as_deref());
            runtime()?.block_on(convert(&config, &image, &audio, &output))
        }
        Commands::Probe { file, json } => {
            let config = Config::load_or_default(cli.config.as_deref());
            runtime()?.block_on(probe_file(&config, &file, json))
        }
        Commands::CheckTools { json } => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config, json)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start tokio runtime")
}

async fn convert(config: &Config, image: &Path, audio: &Path, output: &Path) -> Result<()> {
    for input in [image, audio] {
        if !input.is_file() {
            anyhow::bail!("Input file does not exist: {}", input.display());
        }
    }

    let scratch = Arc::new(ScratchSpace::ephemeral()?);
    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let coordinator = Coordinator::with_tools(
        scratch.clone(),
        tools,
        StageLimits::from_config(&config.conversion),
    );

    let mut job = ConversionJob::new(JobId::new());
    job.image = Some(stage_input(&scratch, job.id(), MediaKind::Image, image)?);
    job.audio = Some(stage_input(&scratch, job.id(), MediaKind::Audio, audio)?);

    let produced = coordinator.run(&mut job).await?;
    let copied = tokio::fs::copy(&produced, output).await;
    scratch.release(&produced);
    copied.with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Video written to {}", output.display());
    Ok(())
}

/// Copy a local input into scratch space the way an upload would land there.
fn stage_input(
    scratch: &ScratchSpace,
    job_id: JobId,
    kind: MediaKind,
    source: &Path,
) -> Result<UploadedFile> {
    let original_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Unusable file name: {}", source.display()))?
        .to_string();

    let path = scratch.allocate(job_id, ArtifactKind::upload_for(kind));
    std::fs::copy(source, &path)
        .with_context(|| format!("Failed to stage {}", source.display()))?;

    Ok(UploadedFile {
        original_name,
        path,
    })
}

async fn probe_file(config: &Config, file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let tools = ToolRegistry::discover(&config.tools);
    let cancel = CancellationToken::new();
    let limit = config.conversion.probe_timeout();

    let seconds = match tokio::time::timeout(
        limit,
        sc_av::probe_duration(&tools, file, &cancel),
    )
    .await
    {
        Ok(probed) => probed?,
        Err(_) => {
            cancel.cancel();
            anyhow::bail!("ffprobe timed out after {limit:?}");
        }
    };

    if json {
        let value = serde_json::json!({
            "file": file.display().to_string(),
            "duration_secs": seconds,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let whole = seconds as u64;
        println!("File: {}", file.display());
        println!(
            "Duration: {:02}:{:02}:{:02} ({seconds:.3}s)",
            whole / 3600,
            (whole / 60) % 60,
            whole % 60
        );
    }

    Ok(())
}

fn check_tools(config: &Config, json: bool) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools).check_all();

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!("Checking external tools...\n");
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Conversions need both ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            Config::load(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in &warnings {
            println!("⚠ {warning}");
        }
    }

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Static dir: {}", config.server.static_dir.display());
    println!("  Max upload: {} bytes", config.server.max_upload_bytes);
    println!("  Scratch dir: {}", config.scratch.dir.display());
    println!(
        "  Timeouts: probe {}s, encode {}s",
        config.conversion.probe_timeout_secs, config.conversion.encode_timeout_secs
    );
    println!(
        "  Downloads: ttl {}s, sweep every {}s",
        config.downloads.ttl_secs, config.downloads.sweep_interval_secs
    );

    Ok(())
}
