#![allow(dead_code)]

use lumen_maintenance::{
	backend::{
		memory::{MemoryCoreDb, MemoryMetadataHub},
		CoreDb, DatabaseHousekeeping, ImageLoader, MetadataHub, QualityScorer, TagModel,
		ThumbnailStore,
	},
	Advance, AutotagModel, BackendError, BatchHandle, BatchId, BatchReport, FaceRegion, ItemId,
	ItemInfo, ItemMetadata, JunkReport, MaintenanceObserver, PickLabel, QualitySettings,
	RemoveAction, ShrinkResult,
};

use std::{
	collections::HashSet,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicUsize, Ordering},
		mpsc, OnceLock,
	},
	time::Duration,
};

use image::DynamicImage;
use parking_lot::Mutex;
use tokio::time::timeout;

pub const BROKEN_MARKER: &str = "broken";

pub async fn wait_report(handle: &BatchHandle) -> BatchReport {
	timeout(Duration::from_secs(30), handle.wait())
		.await
		.expect("batch never completed")
		.expect("batch completion got lost")
}

pub fn item(id: ItemId, path: &str) -> ItemInfo {
	ItemInfo {
		id,
		path: PathBuf::from(path),
		unique_hash: format!("hash-{id}"),
		file_size: 1_000 + id.unsigned_abs(),
	}
}

/// Decodes every path into a tiny black image, except the ones containing [`BROKEN_MARKER`].
#[derive(Debug, Default)]
pub struct StubLoader {
	pub loads: AtomicUsize,
}

impl ImageLoader for StubLoader {
	fn load(&self, path: &Path) -> Result<DynamicImage, BackendError> {
		self.loads.fetch_add(1, Ordering::Relaxed);

		if path.to_string_lossy().contains(BROKEN_MARKER) {
			return Err(BackendError::NotFound(path.display().to_string()));
		}

		Ok(DynamicImage::new_rgb8(8, 8))
	}
}

#[derive(Debug, Default)]
pub struct RecordingStore {
	pub stored: Mutex<Vec<PathBuf>>,
}

impl ThumbnailStore for RecordingStore {
	fn store(
		&self,
		path: &Path,
		image: &DynamicImage,
		_size: u32,
	) -> Result<DynamicImage, BackendError> {
		self.stored.lock().push(path.to_path_buf());
		Ok(image.clone())
	}
}

/// Tags every image with `tags`, translating by suffixing the language.
#[derive(Debug)]
pub struct StubTagModel {
	pub tags: Vec<String>,
	pub inferences: AtomicUsize,
	pub aborts: AtomicUsize,
	pub unloads: AtomicUsize,
}

impl StubTagModel {
	pub fn new(tags: &[&str]) -> Self {
		Self {
			tags: tags.iter().map(ToString::to_string).collect(),
			inferences: AtomicUsize::new(0),
			aborts: AtomicUsize::new(0),
			unloads: AtomicUsize::new(0),
		}
	}
}

impl TagModel for StubTagModel {
	fn infer(
		&self,
		_model: AutotagModel,
		images: &[DynamicImage],
	) -> Result<Vec<Vec<String>>, BackendError> {
		self.inferences.fetch_add(1, Ordering::Relaxed);
		Ok(vec![self.tags.clone(); images.len()])
	}

	fn translate(&self, tag: &str, language: &str) -> Result<String, BackendError> {
		Ok(format!("{tag}@{language}"))
	}

	fn abort(&self) {
		self.aborts.fetch_add(1, Ordering::Relaxed);
	}

	fn unload(&self) {
		self.unloads.fetch_add(1, Ordering::Relaxed);
	}
}

/// Gives every image the same score.
#[derive(Debug)]
pub struct FixedScorer {
	pub score: u8,
	pub aborts: AtomicUsize,
	pub unloads: AtomicUsize,
}

impl FixedScorer {
	pub fn new(score: u8) -> Self {
		Self {
			score,
			aborts: AtomicUsize::new(0),
			unloads: AtomicUsize::new(0),
		}
	}
}

impl QualityScorer for FixedScorer {
	fn score(&self, _image: &DynamicImage, _settings: &QualitySettings) -> Result<u8, BackendError> {
		Ok(self.score)
	}

	fn abort(&self) {
		self.aborts.fetch_add(1, Ordering::Relaxed);
	}

	fn unload(&self) {
		self.unloads.fetch_add(1, Ordering::Relaxed);
	}
}

/// Metadata hub that panics whenever it is asked about `crash_on`.
pub struct CrashingHub {
	pub inner: MemoryMetadataHub,
	pub crash_on: PathBuf,
}

impl CrashingHub {
	fn check(&self, path: &Path) {
		if path == self.crash_on.as_path() {
			panic!("metadata backend crashed on {}", path.display());
		}
	}
}

impl MetadataHub for CrashingHub {
	fn file_exists(&self, path: &Path) -> bool {
		self.check(path);
		self.inner.file_exists(path)
	}

	fn load_from_file(&self, path: &Path) -> Result<ItemMetadata, BackendError> {
		self.check(path);
		self.inner.load_from_file(path)
	}

	fn write_to_file(
		&self,
		path: &Path,
		metadata: &ItemMetadata,
		tags_only: bool,
	) -> Result<(), BackendError> {
		self.check(path);
		self.inner.write_to_file(path, metadata, tags_only)
	}

	fn remove(&self, item: &ItemInfo, action: RemoveAction) -> Result<(), BackendError> {
		self.check(&item.path);
		self.inner.remove(item, action)
	}
}

/// Keeps every notification it gets.
#[derive(Default)]
pub struct RecordingObserver {
	pub started: Mutex<Vec<(BatchId, usize)>>,
	pub advances: Mutex<Vec<Advance>>,
	pub items_added: Mutex<Vec<usize>>,
	pub remove_pending: Mutex<Vec<ItemInfo>>,
	pub junk: Mutex<Vec<JunkReport>>,
	pub shrink_results: Mutex<Vec<ShrinkResult>>,
	pub completed: Mutex<Vec<BatchReport>>,
}

impl MaintenanceObserver for RecordingObserver {
	fn on_started(&self, batch_id: BatchId, total: usize) {
		self.started.lock().push((batch_id, total));
	}

	fn on_advance(&self, advance: &Advance) {
		self.advances.lock().push(advance.clone());
	}

	fn on_items_added(&self, count: usize) {
		self.items_added.lock().push(count);
	}

	fn on_remove_pending(&self, item: &ItemInfo) {
		self.remove_pending.lock().push(item.clone());
	}

	fn on_junk_data(&self, report: &JunkReport) {
		self.junk.lock().push(report.clone());
	}

	fn on_shrink_result(&self, result: &ShrinkResult) {
		self.shrink_results.lock().push(*result);
	}

	fn on_completed(&self, report: &BatchReport) {
		self.completed.lock().push(*report);
	}
}

/// Runs `hook` on every advance, once it has been installed.
pub struct HookObserver<T: Send + Sync + 'static> {
	pub target: OnceLock<T>,
	pub hook: fn(&T),
	pub recorder: RecordingObserver,
}

impl<T: Send + Sync + 'static> HookObserver<T> {
	pub fn new(hook: fn(&T)) -> Self {
		Self {
			target: OnceLock::new(),
			hook,
			recorder: RecordingObserver::default(),
		}
	}
}

impl<T: Send + Sync + 'static> MaintenanceObserver for HookObserver<T> {
	fn on_started(&self, batch_id: BatchId, total: usize) {
		self.recorder.on_started(batch_id, total);
	}

	fn on_advance(&self, advance: &Advance) {
		self.recorder.on_advance(advance);
		if let Some(target) = self.target.get() {
			(self.hook)(target);
		}
	}

	fn on_completed(&self, report: &BatchReport) {
		self.recorder.on_completed(report);
	}
}

/// Core database whose first deletion waits until the gate opens.
pub struct GatedCoreDb {
	pub inner: MemoryCoreDb,
	gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl GatedCoreDb {
	pub fn new(inner: MemoryCoreDb) -> (Self, mpsc::Sender<()>) {
		let (tx, rx) = mpsc::channel();

		(
			Self {
				inner,
				gate: Mutex::new(Some(rx)),
			},
			tx,
		)
	}
}

impl DatabaseHousekeeping for GatedCoreDb {
	fn integrity_check(&self) -> bool {
		self.inner.integrity_check()
	}

	fn vacuum(&self) {
		self.inner.vacuum();
	}
}

impl CoreDb for GatedCoreDb {
	fn all_items(&self) -> Vec<ItemId> {
		self.inner.all_items()
	}

	fn item_info(&self, id: ItemId) -> Option<ItemInfo> {
		self.inner.item_info(id)
	}

	fn item_by_path(&self, path: &Path) -> Option<ItemInfo> {
		self.inner.item_by_path(path)
	}

	fn obsolete_item_ids(&self) -> Vec<ItemId> {
		self.inner.obsolete_item_ids()
	}

	fn delete_item(&self, id: ItemId) -> Result<(), BackendError> {
		let maybe_gate = self.gate.lock().take();
		if let Some(gate) = maybe_gate {
			gate.recv_timeout(Duration::from_secs(10))
				.expect("gate never opened");
		}

		self.inner.delete_item(id)
	}

	fn face_regions(&self, id: ItemId) -> Vec<FaceRegion> {
		self.inner.face_regions(id)
	}

	fn face_engine_uuids(&self) -> HashSet<String> {
		self.inner.face_engine_uuids()
	}

	fn assign_tags(&self, id: ItemId, tags: &[String]) -> Result<(), BackendError> {
		self.inner.assign_tags(id, tags)
	}

	fn set_pick_label(&self, id: ItemId, label: PickLabel) -> Result<(), BackendError> {
		self.inner.set_pick_label(id, label)
	}

	fn read_metadata(&self, id: ItemId) -> Result<ItemMetadata, BackendError> {
		self.inner.read_metadata(id)
	}

	fn write_metadata(
		&self,
		id: ItemId,
		metadata: &ItemMetadata,
		tags_only: bool,
	) -> Result<(), BackendError> {
		self.inner.write_metadata(id, metadata, tags_only)
	}
}
