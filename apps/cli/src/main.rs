//! bolt - command-line download accelerator.

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::HumanBytes;
use tracing::debug;

use bolt_core::{DownloadManager, EngineConfig, EngineState, HttpClient, RemoteUrl};
use progress::ProgressRenderer;

/// Multi-connection download accelerator.
#[derive(Parser)]
#[command(name = "bolt", disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Verbose logging.
    #[arg(short = 'V', long = "verbose")]
    verbose: bool,

    /// Suppress progress output.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Output file (single URL only).
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Directory to place downloads in.
    #[arg(short = 'd', long = "directory")]
    directory: Option<PathBuf>,

    /// Number of segments per download.
    #[arg(short = 'n', long = "segments")]
    segments: Option<u32>,

    /// Probe the URLs and print what the server says, without
    /// downloading.
    #[arg(short = 'i', long = "info")]
    info: bool,

    /// URLs to download.
    #[arg(required_unless_present = "version")]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("bolt {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {err:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "bolt_core=debug,bolt=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns `Ok(true)` when every URL succeeded.
async fn run(cli: Cli) -> Result<bool> {
    if cli.info {
        return probe_all(&cli.urls).await;
    }

    let manager = DownloadManager::new()?;
    let mut all_ok = true;

    for url in &cli.urls {
        let ok = download_one(&manager, &cli, url).await;
        if let Err(err) = &ok {
            eprintln!("{} {url}: {err:#}", style("failed").red().bold());
        }
        all_ok &= ok.unwrap_or(false);
    }

    Ok(all_ok)
}

async fn download_one(manager: &DownloadManager, cli: &Cli, url: &str) -> Result<bool> {
    let config = EngineConfig {
        segment_count: cli.segments,
        ..Default::default()
    };

    let output = resolve_output(cli, url)?;
    debug!(url, output = ?output, "starting download");

    let id = manager.create(url, output, config).await?;
    let engine = manager.engine(id).await?;

    let renderer = if cli.quiet {
        None
    } else {
        let renderer = ProgressRenderer::new(url);
        engine.on_progress(renderer.observer());
        Some(renderer)
    };

    engine.start().await?;
    let state = engine.wait().await;
    let progress = engine.progress();

    match state {
        EngineState::Completed => {
            if let Some(renderer) = renderer {
                renderer.finish_ok(&engine.output_path());
            }
            Ok(true)
        }
        other => {
            let reason = engine
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("{other:?}"));
            if let Some(renderer) = renderer {
                renderer.finish_err(&reason);
            } else {
                eprintln!(
                    "{} {url}: {reason} ({} of {} bytes)",
                    style("failed").red().bold(),
                    progress.downloaded_bytes,
                    progress.total_bytes
                );
            }
            Ok(false)
        }
    }
}

/// `-o` wins for a single URL; `-d` prefixes the derived filename;
/// otherwise the engine derives the path from the server hint or URL.
fn resolve_output(cli: &Cli, url: &str) -> Result<Option<PathBuf>> {
    if let Some(output) = &cli.output {
        if cli.urls.len() > 1 {
            anyhow::bail!("-o/--output cannot be used with multiple URLs");
        }
        return Ok(Some(match &cli.directory {
            Some(dir) => dir.join(output),
            None => output.clone(),
        }));
    }

    if let Some(dir) = &cli.directory {
        let filename = RemoteUrl::parse(url)
            .map(|u| u.filename())
            .unwrap_or_else(|_| "index.html".to_string());
        return Ok(Some(dir.join(filename)));
    }

    Ok(None)
}

async fn probe_all(urls: &[String]) -> Result<bool> {
    let client = HttpClient::new()?;
    let mut all_ok = true;

    for raw in urls {
        let url = match RemoteUrl::parse(raw) {
            Ok(url) => url,
            Err(err) => {
                eprintln!("{} {raw}: {err}", style("invalid").red().bold());
                all_ok = false;
                continue;
            }
        };

        match client.head(&url).await {
            Ok(facts) => {
                let filename = facts.filename.clone().unwrap_or_else(|| url.filename());
                println!("{}", style(raw).bold());
                println!("  filename:     {filename}");
                println!(
                    "  size:         {}",
                    if facts.content_length > 0 {
                        format!(
                            "{} ({} bytes)",
                            HumanBytes(facts.content_length),
                            facts.content_length
                        )
                    } else {
                        "unknown".to_string()
                    }
                );
                println!(
                    "  resumable:    {}",
                    if facts.accepts_ranges { "yes" } else { "no" }
                );
                if let Some(ct) = &facts.content_type {
                    println!("  content-type: {ct}");
                }
                if let Some(final_url) = &facts.final_url {
                    println!("  redirects to: {final_url}");
                }
            }
            Err(err) => {
                eprintln!("{} {raw}: {err}", style("failed").red().bold());
                all_ok = false;
            }
        }
    }

    Ok(all_ok)
}
