use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ociclient::ImageReference;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use imgsave::layout::check_output_dir;
use imgsave::{PullConfig, Settings, SettingsOverrides, pull_image};

/// Download an image from a Docker registry into the `docker save` layout
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The image to download, of the form image[:tag] or image@digest
    #[arg(short, long)]
    image: String,

    /// Target directory (defaults to the image name)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Operating system to select from multi-arch images
    #[arg(long)]
    os: Option<String>,

    /// Architecture to select from multi-arch images
    #[arg(long)]
    arch: Option<String>,

    /// Registry base URL, used when the image names no registry
    #[arg(long)]
    registry: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Exit with an error when any layer failed to download
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(&SettingsOverrides {
        registry_url: cli.registry,
        os: cli.os,
        arch: cli.arch,
        timeout_secs: cli.timeout,
    })
    .context("Failed to load configuration")?;

    let image: ImageReference = cli
        .image
        .parse()
        .context("Not a valid image reference")?;
    let config = PullConfig::new(&settings, &image, cli.out);
    debug!("{:?}", config);

    check_output_dir(&config.output_dir)?;

    let report = pull_image(&config)
        .await
        .with_context(|| format!("Failed to pull {}", image))?;

    let failed = report.failed_layers().count();
    if failed == 0 {
        info!(
            "Saved {} with {} layers to {}",
            image,
            report.layers.len(),
            report.output_dir.display()
        );
    } else {
        warn!(
            "Saved {} to {} but {} of {} layers failed",
            image,
            report.output_dir.display(),
            failed,
            report.layers.len()
        );
        if cli.strict {
            bail!("{} layer(s) failed to download", failed);
        }
    }

    Ok(())
}
