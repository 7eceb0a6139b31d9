//! Batches: one [`MaintenanceData`] drained by a set of identical tasks on their own job pool.

use lumen_job_pool::{
	IntoJob, Job, JobEvent, JobEventKind, JobId, JobOutcome, JobPool, PoolEvent, Priority,
};

use std::{
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
};

use async_channel as chan;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
	backend::{require, Backends, QualityScorer, TagModel},
	data::MaintenanceData,
	error::Error,
	observer::{Advance, BatchReport, BatchStatus, MaintenanceObserver},
	settings::{MaintenanceSettings, QualitySettings},
	tasks::{
		AutotagsTask, DatabaseMode, DatabaseTask, FingerprintsTask, ImageQualityTask,
		MetadataRemoveTask, MetadataSyncTask, TaskBase, ThumbsTask,
	},
	types::{
		AutotagModel, BatchId, Identity, ItemId, ItemInfo, JunkReport, RemoveAction,
		ShrinkResult, SyncDirection, ThumbnailId,
	},
};

const TASK_PRIORITY: Priority = 0;

/// One maintenance operation over its work items.
#[derive(Debug, Clone)]
pub enum BatchRequest {
	Thumbnails {
		paths: Vec<PathBuf>,
	},
	Fingerprints {
		item_ids: Vec<ItemId>,
		rebuild_all: bool,
	},
	SyncMetadata {
		items: Vec<ItemInfo>,
		direction: SyncDirection,
		tags_only: bool,
	},
	RemoveMetadata {
		items: Vec<ItemInfo>,
		action: RemoveAction,
	},
	Autotags {
		paths: Vec<PathBuf>,
		model: AutotagModel,
		languages: Vec<String>,
	},
	ImageQuality {
		paths: Vec<PathBuf>,
		quality: QualitySettings,
	},
	ComputeDatabaseJunk {
		thumbs_db: bool,
		faces_db: bool,
		similarity_db: bool,
	},
	CleanCoreDb {
		item_ids: Vec<ItemId>,
	},
	CleanThumbsDb {
		thumbnail_ids: Vec<ThumbnailId>,
	},
	CleanRecognitionDb {
		identities: Vec<Identity>,
	},
	CleanSimilarityDb {
		item_ids: Vec<ItemId>,
	},
	ShrinkDatabases,
}

impl BatchRequest {
	/// Cleaning batches getting rid of the junk found by a `ComputeDatabaseJunk` batch.
	#[must_use]
	pub fn cleanup(report: JunkReport) -> Vec<Self> {
		let JunkReport {
			stale_image_ids,
			stale_thumbnail_ids,
			stale_identities,
			stale_similarity_image_ids,
		} = report;

		let mut requests = Vec::with_capacity(4);

		if !stale_image_ids.is_empty() {
			requests.push(Self::CleanCoreDb {
				item_ids: stale_image_ids,
			});
		}
		if !stale_thumbnail_ids.is_empty() {
			requests.push(Self::CleanThumbsDb {
				thumbnail_ids: stale_thumbnail_ids,
			});
		}
		if !stale_identities.is_empty() {
			requests.push(Self::CleanRecognitionDb {
				identities: stale_identities,
			});
		}
		if !stale_similarity_image_ids.is_empty() {
			requests.push(Self::CleanSimilarityDb {
				item_ids: stale_similarity_image_ids,
			});
		}

		requests
	}

	#[must_use]
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Thumbnails { .. } => "thumbnails",
			Self::Fingerprints { .. } => "fingerprints",
			Self::SyncMetadata { .. } => "sync_metadata",
			Self::RemoveMetadata { .. } => "remove_metadata",
			Self::Autotags { .. } => "autotags",
			Self::ImageQuality { .. } => "image_quality",
			Self::ComputeDatabaseJunk { .. } => "compute_database_junk",
			Self::CleanCoreDb { .. } => "clean_core_db",
			Self::CleanThumbsDb { .. } => "clean_thumbs_db",
			Self::CleanRecognitionDb { .. } => "clean_recognition_db",
			Self::CleanSimilarityDb { .. } => "clean_similarity_db",
			Self::ShrinkDatabases => "shrink_databases",
		}
	}

	/// Kinds working on the databases as a whole can't be split between workers.
	const fn is_single_instance(&self) -> bool {
		matches!(self, Self::ComputeDatabaseJunk { .. } | Self::ShrinkDatabases)
	}

	/// Moves the work items into `data`, returning how many progress notifications to expect.
	fn load_into(self, data: &MaintenanceData) -> usize {
		match self {
			Self::Thumbnails { paths }
			| Self::Autotags { paths, .. }
			| Self::ImageQuality { paths, .. } => {
				let total = paths.len();
				data.set_image_paths(paths);
				total
			}
			Self::Fingerprints { item_ids, .. } | Self::CleanCoreDb { item_ids } => {
				let total = item_ids.len();
				data.set_image_ids(item_ids);
				total
			}
			Self::SyncMetadata { items, .. } | Self::RemoveMetadata { items, .. } => {
				let total = items.len();
				data.set_item_infos(items);
				total
			}
			Self::CleanThumbsDb { thumbnail_ids } => {
				let total = thumbnail_ids.len();
				data.set_thumbnail_ids(thumbnail_ids);
				total
			}
			Self::CleanRecognitionDb { identities } => {
				let total = identities.len();
				data.set_identities(identities);
				total
			}
			Self::CleanSimilarityDb { item_ids } => {
				let total = item_ids.len();
				data.set_similarity_image_ids(item_ids);
				total
			}
			// The core database step, the scans add their own items once they know them
			Self::ComputeDatabaseJunk { .. } => 1,
			Self::ShrinkDatabases => 4,
		}
	}
}

/// Observer wrapper keeping the counts the final [`BatchReport`] is made of.
struct Aggregator {
	inner: Arc<dyn MaintenanceObserver>,
	total: AtomicUsize,
	succeeded: AtomicUsize,
	failed: AtomicUsize,
}

impl Aggregator {
	fn new(inner: Arc<dyn MaintenanceObserver>) -> Self {
		Self {
			inner,
			total: AtomicUsize::new(0),
			succeeded: AtomicUsize::new(0),
			failed: AtomicUsize::new(0),
		}
	}

	fn report(&self, batch_id: BatchId, status: BatchStatus) -> BatchReport {
		BatchReport {
			batch_id,
			status,
			total: self.total.load(Ordering::Acquire),
			succeeded: self.succeeded.load(Ordering::Acquire),
			failed: self.failed.load(Ordering::Acquire),
		}
	}
}

impl MaintenanceObserver for Aggregator {
	fn on_started(&self, batch_id: BatchId, total: usize) {
		self.total.store(total, Ordering::Release);
		self.inner.on_started(batch_id, total);
	}

	fn on_advance(&self, advance: &Advance) {
		if advance.outcome.is_success() {
			self.succeeded.fetch_add(1, Ordering::AcqRel);
		} else {
			self.failed.fetch_add(1, Ordering::AcqRel);
		}

		trace!(item = ?advance.item, success = advance.outcome.is_success(), "Item processed");

		self.inner.on_advance(advance);
	}

	fn on_items_added(&self, count: usize) {
		self.total.fetch_add(count, Ordering::AcqRel);
		self.inner.on_items_added(count);
	}

	fn on_remove_pending(&self, item: &ItemInfo) {
		self.inner.on_remove_pending(item);
	}

	fn on_junk_data(&self, report: &JunkReport) {
		self.inner.on_junk_data(report);
	}

	fn on_shrink_result(&self, result: &ShrinkResult) {
		self.inner.on_shrink_result(result);
	}

	fn on_completed(&self, report: &BatchReport) {
		self.inner.on_completed(report);
	}
}

struct BatchShared {
	id: BatchId,
	pool: JobPool<Error>,
	aggregator: Arc<Aggregator>,
	stopped_early: AtomicBool,
	tag_model: Option<Arc<dyn TagModel>>,
	quality_scorer: Option<Arc<dyn QualityScorer>>,
}

/// Entry point of the maintenance tools: starts batches against a fixed set of backends.
#[derive(Debug, Clone)]
pub struct Maintenance {
	backends: Backends,
	settings: MaintenanceSettings,
}

impl Maintenance {
	#[must_use]
	pub const fn new(backends: Backends, settings: MaintenanceSettings) -> Self {
		Self { backends, settings }
	}

	#[must_use]
	pub const fn settings(&self) -> &MaintenanceSettings {
		&self.settings
	}

	#[must_use]
	pub const fn backends(&self) -> &Backends {
		&self.backends
	}

	/// Starts a batch with as many workers as the settings allow.
	pub fn start(
		&self,
		request: BatchRequest,
		observer: Arc<dyn MaintenanceObserver>,
	) -> Result<BatchHandle, Error> {
		self.start_batch(request, self.settings.worker_count(), observer)
	}

	/// Starts `worker_count` tasks draining the request's items, or a single one for kinds
	/// working on whole databases. Must be called from within a tokio runtime.
	///
	/// Nothing gets dispatched when this fails.
	#[instrument(skip(self, request, observer), fields(kind = request.name()), err)]
	pub fn start_batch(
		&self,
		request: BatchRequest,
		worker_count: usize,
		observer: Arc<dyn MaintenanceObserver>,
	) -> Result<BatchHandle, Error> {
		let batch_id = BatchId::new_v4();
		let worker_count = worker_count.max(1);
		let task_count = if request.is_single_instance() {
			1
		} else {
			worker_count
		};

		let pool = JobPool::new(worker_count)?;

		let aggregator = Arc::new(Aggregator::new(observer));
		let data = Arc::new(MaintenanceData::new());

		let observer: Arc<dyn MaintenanceObserver> = aggregator.clone();
		let tasks = self.build_tasks(&request, task_count, &data, &observer)?;

		// Only the batch kind using a model may abort or unload it
		let (tag_model, quality_scorer) = match &request {
			BatchRequest::Autotags { .. } => (self.backends.tag_model.clone(), None),
			BatchRequest::ImageQuality { .. } => (None, self.backends.quality_scorer.clone()),
			_ => (None, None),
		};

		let job_ids = tasks.iter().map(|task| task.id()).collect::<Vec<_>>();
		let total = request.load_into(&data);

		let events = pool.subscribe();

		let shared = Arc::new(BatchShared {
			id: batch_id,
			pool,
			aggregator,
			stopped_early: AtomicBool::new(false),
			tag_model,
			quality_scorer,
		});

		shared.aggregator.on_started(batch_id, total);

		shared.pool.append_jobs(
			tasks
				.into_iter()
				.map(|task| (task, TASK_PRIORITY))
				.collect(),
		)?;

		info!(%batch_id, total, tasks = task_count, workers = worker_count, "Maintenance batch started");

		let (report_tx, report_rx) = watch::channel(None);

		tokio::spawn(watch_completion(Arc::clone(&shared), events, report_tx));

		Ok(BatchHandle {
			shared,
			job_ids,
			report_rx,
		})
	}

	#[allow(clippy::too_many_lines)]
	fn build_tasks(
		&self,
		request: &BatchRequest,
		count: usize,
		data: &Arc<MaintenanceData>,
		observer: &Arc<dyn MaintenanceObserver>,
	) -> Result<Vec<Box<dyn Job<Error>>>, Error> {
		let backends = &self.backends;
		let settings = &self.settings;
		let base = || TaskBase::new(Arc::clone(data), Arc::clone(observer));

		let database_tasks = |mode: DatabaseMode| -> Result<Vec<Box<dyn Job<Error>>>, Error> {
			mode.validate(backends)?;

			Ok((0..count)
				.map(|_| DatabaseTask::new(base(), mode, backends.clone()).into_job())
				.collect())
		};

		let tasks: Vec<Box<dyn Job<Error>>> = match request {
			BatchRequest::Thumbnails { .. } => {
				let loader = require(backends.image_loader.as_ref(), "image loader")?;
				let store = require(backends.thumbnail_store.as_ref(), "thumbnail store")?;

				(0..count)
					.map(|_| {
						ThumbsTask::new(
							base(),
							Arc::clone(&loader),
							Arc::clone(&store),
							settings.thumbnail_size,
							settings.preview_size,
						)
						.into_job()
					})
					.collect()
			}

			BatchRequest::Fingerprints { rebuild_all, .. } => {
				let core_db = require(backends.core_db.as_ref(), "core database")?;
				let similarity_db =
					require(backends.similarity_db.as_ref(), "similarity database")?;
				let loader = require(backends.image_loader.as_ref(), "image loader")?;
				let fingerprinter = require(backends.fingerprinter.as_ref(), "fingerprinter")?;

				(0..count)
					.map(|_| {
						FingerprintsTask::new(
							base(),
							Arc::clone(&core_db),
							Arc::clone(&similarity_db),
							Arc::clone(&loader),
							Arc::clone(&fingerprinter),
							*rebuild_all,
							settings.preview_size,
						)
						.into_job()
					})
					.collect()
			}

			BatchRequest::SyncMetadata {
				direction,
				tags_only,
				..
			} => {
				let core_db = require(backends.core_db.as_ref(), "core database")?;
				let hub = require(backends.metadata_hub.as_ref(), "metadata hub")?;

				(0..count)
					.map(|_| {
						MetadataSyncTask::new(
							base(),
							Arc::clone(&core_db),
							Arc::clone(&hub),
							*direction,
							*tags_only,
						)
						.into_job()
					})
					.collect()
			}

			BatchRequest::RemoveMetadata { action, .. } => {
				let hub = require(backends.metadata_hub.as_ref(), "metadata hub")?;

				(0..count)
					.map(|_| MetadataRemoveTask::new(base(), Arc::clone(&hub), *action).into_job())
					.collect()
			}

			BatchRequest::Autotags {
				model, languages, ..
			} => {
				let core_db = require(backends.core_db.as_ref(), "core database")?;
				let loader = require(backends.image_loader.as_ref(), "image loader")?;
				let tag_model = require(backends.tag_model.as_ref(), "tag model")?;
				let languages = Arc::<[String]>::from(languages.as_slice());

				(0..count)
					.map(|_| {
						AutotagsTask::new(
							base(),
							Arc::clone(&core_db),
							Arc::clone(&loader),
							Arc::clone(&tag_model),
							*model,
							Arc::clone(&languages),
							settings.autotag_batch_size,
							settings.preview_size,
						)
						.into_job()
					})
					.collect()
			}

			BatchRequest::ImageQuality { quality, .. } => {
				let core_db = require(backends.core_db.as_ref(), "core database")?;
				let loader = require(backends.image_loader.as_ref(), "image loader")?;
				let scorer = require(backends.quality_scorer.as_ref(), "quality scorer")?;

				(0..count)
					.map(|_| {
						ImageQualityTask::new(
							base(),
							Arc::clone(&core_db),
							Arc::clone(&loader),
							Arc::clone(&scorer),
							*quality,
							settings.preview_size,
						)
						.into_job()
					})
					.collect()
			}

			BatchRequest::ComputeDatabaseJunk {
				thumbs_db,
				faces_db,
				similarity_db,
			} => database_tasks(DatabaseMode::ComputeDatabaseJunk {
				thumbs_db: *thumbs_db,
				faces_db: *faces_db,
				similarity_db: *similarity_db,
			})?,
			BatchRequest::CleanCoreDb { .. } => database_tasks(DatabaseMode::CleanCoreDb)?,
			BatchRequest::CleanThumbsDb { .. } => database_tasks(DatabaseMode::CleanThumbsDb)?,
			BatchRequest::CleanRecognitionDb { .. } => {
				database_tasks(DatabaseMode::CleanRecognitionDb)?
			}
			BatchRequest::CleanSimilarityDb { .. } => {
				database_tasks(DatabaseMode::CleanSimilarityDb)?
			}
			BatchRequest::ShrinkDatabases => database_tasks(DatabaseMode::ShrinkDatabases)?,
		};

		Ok(tasks)
	}
}

#[instrument(skip_all, fields(batch_id = %shared.id))]
async fn watch_completion(
	shared: Arc<BatchShared>,
	events: chan::Receiver<PoolEvent>,
	report_tx: watch::Sender<Option<BatchReport>>,
) {
	let mut every_job_done = true;

	while let Ok(event) = events.recv().await {
		match event {
			PoolEvent::Finished if shared.pool.is_empty() => break,
			PoolEvent::Finished => trace!("Pool finished with jobs still pending"),
			PoolEvent::Job(JobEvent {
				job_id,
				kind: JobEventKind::Done(outcome),
			}) => match outcome {
				JobOutcome::Done => debug!(%job_id, "Maintenance task done"),
				JobOutcome::Canceled => {
					debug!(%job_id, "Maintenance task canceled");
					every_job_done = false;
				}
				JobOutcome::Failed(e) => {
					error!(%job_id, %e, "Maintenance task failed");
					every_job_done = false;
				}
				JobOutcome::Panicked(e) => {
					error!(%job_id, %e, "Maintenance task panicked");
					every_job_done = false;
				}
			},
			PoolEvent::Job(_) => {}
		}
	}

	shared.pool.wait_for_done().await;

	if let Some(tag_model) = &shared.tag_model {
		tag_model.unload();
	}
	if let Some(quality_scorer) = &shared.quality_scorer {
		quality_scorer.unload();
	}

	let status = if shared.stopped_early.load(Ordering::Acquire) || !every_job_done {
		BatchStatus::StoppedEarly
	} else {
		BatchStatus::Completed
	};

	let report = shared.aggregator.report(shared.id, status);

	info!(
		?status,
		total = report.total,
		succeeded = report.succeeded,
		failed = report.failed,
		"Maintenance batch completed"
	);

	shared.aggregator.on_completed(&report);

	if report_tx.send(Some(report)).is_err() {
		trace!("Nobody is waiting for the batch report");
	}
}

/// Cancels a running batch from anywhere, cloning is cheap.
#[derive(Clone)]
pub struct BatchCanceler {
	shared: Arc<BatchShared>,
}

impl BatchCanceler {
	/// Stops dispatching, asks running tasks to stop and aborts long running inferences. Never
	/// waits for the tasks to actually return.
	pub fn cancel(&self) {
		if self.shared.pool.is_running() {
			self.shared.stopped_early.store(true, Ordering::Release);
		} else {
			warn!(batch_id = %self.shared.id, "Canceling a batch that already finished");
		}

		self.shared.pool.cancel(true);

		if let Some(tag_model) = &self.shared.tag_model {
			tag_model.abort();
		}
		if let Some(quality_scorer) = &self.shared.quality_scorer {
			quality_scorer.abort();
		}
	}
}

/// Handle over a started batch.
pub struct BatchHandle {
	shared: Arc<BatchShared>,
	job_ids: Vec<JobId>,
	report_rx: watch::Receiver<Option<BatchReport>>,
}

impl BatchHandle {
	#[must_use]
	pub fn id(&self) -> BatchId {
		self.shared.id
	}

	#[must_use]
	pub fn job_ids(&self) -> &[JobId] {
		&self.job_ids
	}

	/// Tasks the pool is done with, canceled ones included.
	#[must_use]
	pub fn processed_job_ids(&self) -> Vec<JobId> {
		self.shared.pool.processed_ids()
	}

	#[must_use]
	pub fn canceler(&self) -> BatchCanceler {
		BatchCanceler {
			shared: Arc::clone(&self.shared),
		}
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.report_rx.borrow().is_some()
	}

	/// Waits for the batch report, emitted once every task returned.
	pub async fn wait(&self) -> Result<BatchReport, Error> {
		let mut report_rx = self.report_rx.clone();

		let report = *report_rx
			.wait_for(Option::is_some)
			.await
			.map_err(|_| Error::CompletionLost)?;

		report.ok_or(Error::CompletionLost)
	}
}
