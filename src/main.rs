use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dicom_survey::{
    enums::DecodePolicy,
    histogram::DEFAULT_HISTOGRAM_BINS,
    pipeline::{ScanSession, VolumePipeline},
    volume::Window,
    volume_loader::{DEFAULT_EXTENSION, LoadOptions},
};

/// Survey a DICOM series: tissue composition and histogram of one slice.
#[derive(Parser, Debug)]
#[command(name = "dicom-survey", author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the series.
    #[arg(env = "SURVEY_DIR")]
    directory: PathBuf,

    /// Extension of the scan files, matched case-sensitively.
    #[arg(long, default_value = DEFAULT_EXTENSION, env = "SURVEY_EXTENSION")]
    extension: String,

    /// Only look at the top level of the directory.
    #[arg(long, default_value_t = false)]
    no_recursive: bool,

    /// Leave out files that fail to decode instead of aborting.
    #[arg(long, default_value_t = false, env = "SURVEY_SKIP_UNREADABLE")]
    skip_unreadable: bool,

    /// Histogram bin count.
    #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS, env = "SURVEY_BINS")]
    bins: usize,

    /// Slice to survey, the center slice if omitted.
    #[arg(short, long, allow_negative_numbers = true)]
    slice: Option<isize>,

    /// Classify every slice while loading.
    #[arg(long, default_value_t = false)]
    eager: bool,

    /// Write the tissue overlay of the slice to this PNG.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Write the slice, soft-tissue windowed, to this PNG.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn validate(&self) -> Result<(), String> {
        if self.bins == 0 {
            return Err("bins must be greater than 0".to_string());
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err("extension must not be empty".to_string());
        }
        if !self.directory.is_dir() {
            return Err(format!("{} is not a directory", self.directory.display()));
        }
        Ok(())
    }

    fn load_options(&self) -> LoadOptions {
        let policy = if self.skip_unreadable {
            DecodePolicy::SkipAndReport
        } else {
            DecodePolicy::FailFast
        };
        LoadOptions::default()
            .with_extension(self.extension.as_str())
            .with_recursive(!self.no_recursive)
            .with_policy(policy)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let handle = VolumePipeline::new(cli.load_options())
        .with_histogram_bins(cli.bins)
        .with_eager_classification(cli.eager)
        .spawn(cli.directory.clone());

    let mut progress = handle.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            info!("{:>9}: {:5.1}%", p.stage, p.fraction * 100.0);
        }
    });

    let session = match handle.wait().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to load series: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = reporter.await {
        warn!("Progress reporter failed: {}", e);
    }

    for skipped in &session.report().skipped {
        warn!("Skipped {}: {}", skipped.path.display(), skipped.error);
    }

    match survey(&session, &cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn survey(session: &ScanSession, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (depth, height, width) = session.dim();
    let index = cli.slice.unwrap_or((depth / 2) as isize);
    info!("Volume: {} slice(s) of {}x{}", depth, width, height);
    info!("Slice {}:", index);

    let percentages = session.get_percentages(index)?;
    for (class, share) in percentages.iter() {
        info!("  {:>9}: {:6.2}%", class, share);
    }

    let histogram = session.get_histogram(index)?;
    info!("Histogram ({} bins):", histogram.len());
    for bin in histogram.bins().iter().filter(|bin| bin.count > 0) {
        info!("  [{:9.1}, {:9.1}] {}", bin.low, bin.high, bin.count);
    }

    if let Some(path) = &cli.overlay {
        session.get_overlay(index)?.save(path)?;
        info!("Overlay written to {}", path.display());
    }
    if let Some(path) = &cli.image {
        session.get_image(index, Window::SOFT_TISSUE)?.save(path)?;
        info!("Image written to {}", path.display());
    }

    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "dicom_survey=debug"
    } else {
        "dicom_survey=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
