use lumen_maintenance::{
	backend::{
		fs::{Blake3Fingerprinter, FsImageLoader, FsThumbnailStore},
		memory::MemoryDatabase,
		Backends, CoreDb, Fingerprinter,
	},
	BatchHandle, BatchReport, BatchRequest, BatchStatus, ChannelObserver, ItemInfo, Maintenance,
	MaintenanceSettings,
};

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod progress;
mod scan;

const DEFAULT_LOG_FILTER: &str = "lumen=info,lumen_maintenance=info,lumen_job_pool=warn";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
	Human,
	Json,
}

#[derive(Parser, Debug)]
#[command(name = "lumen", about = "Photo collection maintenance tools")]
struct Cli {
	/// Maintenance settings file, defaults apply when it does not exist
	#[arg(long, default_value = "lumen.json")]
	config: PathBuf,

	/// Number of parallel workers, overriding the settings
	#[arg(long)]
	workers: Option<usize>,

	/// Run every batch on a single worker
	#[arg(long, default_value_t = false)]
	single_core: bool,

	/// Also write debug logs to daily files in this directory
	#[arg(long)]
	log_dir: Option<PathBuf>,

	/// Hide the progress bar
	#[arg(long, short, default_value_t = false)]
	quiet: bool,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Generate thumbnails for every image below a directory
	Thumbs {
		dir: PathBuf,
		/// Thumbnail cache directory
		#[arg(long)]
		cache: PathBuf,
	},
	/// Fingerprint every image below a directory and list the duplicates found
	Fingerprints {
		dir: PathBuf,
	},
	/// Show the effective settings
	Settings {
		/// Write them back to the settings file
		#[arg(long, default_value_t = false)]
		write: bool,
	},
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

	let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

	let (file_layer, guard) = log_dir
		.map(|dir| {
			let (non_blocking, guard) = tracing_appender::non_blocking(rolling::daily(dir, "lumen.log"));
			let layer = fmt::layer()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_thread_ids(true)
				.with_line_number(true);

			(layer, guard)
		})
		.unzip();

	tracing_subscriber::registry()
		.with(filter)
		.with(console_layer)
		.with(file_layer)
		.init();

	guard
}

async fn load_settings(cli: &Cli) -> Result<MaintenanceSettings> {
	let mut settings = MaintenanceSettings::load(&cli.config)
		.await
		.with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

	if cli.single_core {
		settings.use_multi_core = false;
	}

	if let Some(workers) = cli.workers {
		settings.max_workers = Some(workers);
	}

	Ok(settings)
}

/// Waits for the batch, canceling it on Ctrl+C.
async fn run_to_completion(handle: BatchHandle) -> Result<BatchReport> {
	let canceler = handle.canceler();

	tokio::select! {
		res = handle.wait() => return res.context("Batch failed"),
		res = signal::ctrl_c() => {
			res.context("Failed to listen for Ctrl+C")?;
			warn!("Received Ctrl+C, stopping the batch");
			canceler.cancel();
		}
	}

	handle.wait().await.context("Batch failed")
}

async fn run_batch(
	maintenance: &Maintenance,
	request: BatchRequest,
	quiet: bool,
) -> Result<BatchReport> {
	let (observer, events) = ChannelObserver::new();
	let progress = progress::spawn_progress(events, quiet);

	let handle = maintenance.start(request, Arc::new(observer))?;
	info!(batch_id = %handle.id(), jobs = handle.job_ids().len(), "Batch started");

	let report = run_to_completion(handle).await?;

	if let Err(e) = progress.await {
		warn!(%e, "Progress reporting stopped abruptly");
	}

	Ok(report)
}

fn print_report(report: &BatchReport, format: OutputFormat) -> Result<()> {
	match format {
		OutputFormat::Human => {
			let status = match report.status {
				BatchStatus::Completed => "completed",
				BatchStatus::StoppedEarly => "stopped early",
			};
			println!(
				"Batch {} {status}: {} succeeded, {} failed, {} total",
				report.batch_id, report.succeeded, report.failed, report.total
			);
		}
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
	}

	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let _guard = init_logging(cli.log_dir.as_deref());

	let settings = load_settings(&cli).await?;

	match &cli.command {
		Commands::Thumbs { dir, cache } => {
			let paths = scan::collect_images(dir).await?;

			let backends = Backends::default()
				.with_image_loader(Arc::new(FsImageLoader))
				.with_thumbnail_store(Arc::new(FsThumbnailStore::new(cache)));
			let maintenance = Maintenance::new(backends, settings);

			let report = run_batch(&maintenance, BatchRequest::Thumbnails { paths }, cli.quiet).await?;
			print_report(&report, cli.format)?;
		}

		Commands::Fingerprints { dir } => {
			let paths = scan::collect_images(dir).await?;

			let db = MemoryDatabase::new();
			let mut item_ids = Vec::with_capacity(paths.len());
			for (id, path) in (1..).zip(paths) {
				let file_size = tokio::fs::metadata(&path)
					.await
					.with_context(|| format!("Failed to stat {}", path.display()))?
					.len();

				db.core.insert_item(ItemInfo {
					id,
					unique_hash: path.display().to_string(),
					path,
					file_size,
				});
				item_ids.push(id);
			}

			let fingerprinter = Blake3Fingerprinter;
			let backends = db.attach(
				Backends::default()
					.with_image_loader(Arc::new(FsImageLoader))
					.with_fingerprinter(Arc::new(fingerprinter)),
			);
			let maintenance = Maintenance::new(backends, settings);

			let request = BatchRequest::Fingerprints {
				item_ids,
				rebuild_all: true,
			};
			let report = run_batch(&maintenance, request, cli.quiet).await?;
			print_report(&report, cli.format)?;

			let groups = db
				.similarity
				.duplicate_groups(fingerprinter.algorithm())
				.into_iter()
				.map(|group| {
					group
						.into_iter()
						.filter_map(|id| db.core.item_info(id).map(|info| info.path))
						.collect::<Vec<_>>()
				})
				.collect::<Vec<_>>();

			match cli.format {
				OutputFormat::Human => {
					if groups.is_empty() {
						println!("No duplicates found");
					}
					for group in groups {
						println!("Duplicates:");
						for path in group {
							println!("  {}", path.display());
						}
					}
				}
				OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&groups)?),
			}
		}

		Commands::Settings { write } => {
			if *write {
				settings
					.save(&cli.config)
					.await
					.with_context(|| format!("Failed to save settings to {}", cli.config.display()))?;
				info!(path = %cli.config.display(), "Settings saved");
			}

			println!("{}", serde_json::to_string_pretty(&settings)?);
			if matches!(cli.format, OutputFormat::Human) {
				println!("Workers: {}", settings.worker_count());
			}
		}
	}

	Ok(())
}
