//! RouteDEM CLI - DEM routing across a flow accumulation threshold range

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use routedem_core::io::{geotiff_band_count, read_geotiff};
use routedem_core::raster::Raster;
use routedem_model::validation::{format_warnings, validate};
use routedem_model::{execute, ArgumentSet};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "routedem")]
#[command(author, version, about = "DEM routing across a flow accumulation threshold range", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate arguments and run the model, writing every output into the
    /// workspace
    Run {
        #[command(flatten)]
        args: ModelArgs,
    },
    /// Check arguments without running the model
    Validate {
        #[command(flatten)]
        args: ModelArgs,
    },
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
}

/// Model arguments, spelled out as flags or loaded whole from a JSON file.
#[derive(Args)]
struct ModelArgs {
    /// JSON file holding the argument object; takes precedence over the
    /// individual flags
    #[arg(long)]
    args: Option<PathBuf>,

    /// Directory where outputs are written
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Input DEM GeoTIFF
    #[arg(long)]
    dem: Option<PathBuf>,

    /// Routing algorithm: d8 or mfd
    #[arg(long)]
    algorithm: Option<String>,

    /// Threshold range as start:stop:step
    #[arg(long)]
    tfa_range: Option<String>,

    /// 1-based DEM band index
    #[arg(long)]
    band: Option<usize>,

    /// Suffix appended to every output file name
    #[arg(long)]
    suffix: Option<String>,

    /// Worker threads; -1 runs tasks on the calling thread
    #[arg(long)]
    n_workers: Option<i32>,

    /// Also produce a slope raster from the unfilled DEM
    #[arg(long)]
    slope: bool,

    /// Also produce a downslope distance raster per threshold
    #[arg(long)]
    downslope_distance: bool,

    /// Also produce Strahler stream order layers (d8 only)
    #[arg(long)]
    stream_order: bool,

    /// Also produce subwatershed layers (d8 only)
    #[arg(long)]
    subwatersheds: bool,
}

impl ModelArgs {
    fn into_argument_set(self) -> Result<ArgumentSet> {
        if let Some(path) = &self.args {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            return ArgumentSet::from_json(value)
                .context("Argument file must hold a JSON object");
        }

        // Absent flags stay absent so the validator reports them with its
        // own messages instead of clap rejecting the invocation.
        let mut args = ArgumentSet::new();
        if let Some(workspace) = &self.workspace {
            args.set("workspace_dir", json!(workspace.to_string_lossy()));
        }
        if let Some(dem) = &self.dem {
            args.set("dem_path", json!(dem.to_string_lossy()));
        }
        if let Some(algorithm) = &self.algorithm {
            args.set("algorithm", json!(algorithm));
        }
        if let Some(range) = &self.tfa_range {
            args.set("threshold_flow_accumulation_range", json!(range));
        }
        if let Some(band) = self.band {
            args.set("dem_band_index", json!(band));
        }
        if let Some(suffix) = &self.suffix {
            args.set("results_suffix", json!(suffix));
        }
        if let Some(n_workers) = self.n_workers {
            args.set("n_workers", json!(n_workers));
        }
        if self.slope {
            args.set("calculate_slope", json!(true));
        }
        if self.downslope_distance {
            args.set("calculate_downslope_distance", json!(true));
        }
        if self.stream_order {
            args.set("calculate_stream_order", json!(true));
        }
        if self.subwatersheds {
            args.set("calculate_subwatersheds", json!(true));
        }
        Ok(args)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_raster(path: &PathBuf) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(path, None).context("Failed to read raster")?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        // ── Run ──────────────────────────────────────────────────────
        Commands::Run { args } => {
            let args = args.into_argument_set()?;
            let warnings = validate(&args);
            if !warnings.is_empty() {
                anyhow::bail!("Arguments are invalid:\n{}", format_warnings(&warnings));
            }

            let start = Instant::now();
            let registry = execute(&args).context("Model run failed")?;
            let elapsed = start.elapsed();

            println!("Produced {} files in {:.2?}:", registry.len(), elapsed);
            for (_, path) in registry.iter() {
                println!("  {}", path.display());
            }
        }

        // ── Validate ─────────────────────────────────────────────────
        Commands::Validate { args } => {
            let args = args.into_argument_set()?;
            let warnings = validate(&args);
            if warnings.is_empty() {
                println!("Arguments are valid.");
            } else {
                println!("{}", format_warnings(&warnings));
                std::process::exit(1);
            }
        }

        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let bands = geotiff_band_count(&input).context("Failed to open raster")?;
            let raster = read_raster(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Bands: {}", bands);
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = raster.crs() {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len() as f64
            );
        }
    }

    Ok(())
}
