//! In-memory databases, used by the command line front end and by tests.

use std::{
	collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
	error::BackendError,
	types::{
		FaceRegion, FingerprintAlgorithm, Identity, IdentityId, ItemId, ItemInfo, ItemMetadata,
		PickLabel, RemoveAction, ThumbnailId,
	},
};

use super::{
	Backends, CoreDb, DatabaseHousekeeping, FaceDb, MetadataHub, SimilarityDb, ThumbsDb,
};

/// Scriptable housekeeping state shared by every in-memory database.
#[derive(Debug, Default)]
pub struct Housekeeping {
	uninitialized: AtomicBool,
	scripted_checks: Mutex<VecDeque<bool>>,
	integrity_checks: AtomicUsize,
	vacuums: AtomicUsize,
}

impl Housekeeping {
	pub fn set_initialized(&self, initialized: bool) {
		self.uninitialized.store(!initialized, Ordering::Release);
	}

	/// Results of the next integrity checks, in order. Checks pass once the script runs out.
	pub fn script_integrity_checks(&self, results: impl IntoIterator<Item = bool>) {
		self.scripted_checks.lock().extend(results);
	}

	#[must_use]
	pub fn integrity_check_count(&self) -> usize {
		self.integrity_checks.load(Ordering::Acquire)
	}

	#[must_use]
	pub fn vacuum_count(&self) -> usize {
		self.vacuums.load(Ordering::Acquire)
	}

	fn is_initialized(&self) -> bool {
		!self.uninitialized.load(Ordering::Acquire)
	}

	fn integrity_check(&self) -> bool {
		self.integrity_checks.fetch_add(1, Ordering::AcqRel);
		self.scripted_checks.lock().pop_front().unwrap_or(true)
	}

	fn vacuum(&self) {
		self.vacuums.fetch_add(1, Ordering::AcqRel);
	}
}

macro_rules! impl_housekeeping {
	($($db:ty),+ $(,)?) => {
		$(
			impl $db {
				#[must_use]
				pub const fn housekeeping(&self) -> &Housekeeping {
					&self.housekeeping
				}
			}

			impl DatabaseHousekeeping for $db {
				fn is_initialized(&self) -> bool {
					self.housekeeping.is_initialized()
				}

				fn integrity_check(&self) -> bool {
					self.housekeeping.integrity_check()
				}

				fn vacuum(&self) {
					self.housekeeping.vacuum();
				}
			}
		)+
	};
}

impl_housekeeping!(MemoryCoreDb, MemoryThumbsDb, MemoryFaceDb, MemorySimilarityDb);

#[derive(Debug, Clone)]
struct CoreItem {
	info: ItemInfo,
	metadata: ItemMetadata,
	faces: Vec<FaceRegion>,
	pick_label: PickLabel,
}

#[derive(Debug, Default)]
struct CoreState {
	items: BTreeMap<ItemId, CoreItem>,
	obsolete: BTreeSet<ItemId>,
	face_engine_uuids: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryCoreDb {
	housekeeping: Housekeeping,
	state: Mutex<CoreState>,
}

impl MemoryCoreDb {
	pub fn insert_item(&self, info: ItemInfo) {
		self.state.lock().items.insert(
			info.id,
			CoreItem {
				info,
				metadata: ItemMetadata::default(),
				faces: Vec::new(),
				pick_label: PickLabel::None,
			},
		);
	}

	pub fn mark_obsolete(&self, id: ItemId) {
		self.state.lock().obsolete.insert(id);
	}

	pub fn add_face_region(&self, id: ItemId, region: FaceRegion) {
		if let Some(item) = self.state.lock().items.get_mut(&id) {
			item.faces.push(region);
		}
	}

	pub fn add_face_engine_uuid(&self, uuid: impl Into<String>) {
		self.state.lock().face_engine_uuids.insert(uuid.into());
	}

	pub fn set_metadata(&self, id: ItemId, metadata: ItemMetadata) {
		if let Some(item) = self.state.lock().items.get_mut(&id) {
			item.metadata = metadata;
		}
	}

	#[must_use]
	pub fn metadata(&self, id: ItemId) -> Option<ItemMetadata> {
		self.state
			.lock()
			.items
			.get(&id)
			.map(|item| item.metadata.clone())
	}

	#[must_use]
	pub fn pick_label(&self, id: ItemId) -> Option<PickLabel> {
		self.state.lock().items.get(&id).map(|item| item.pick_label)
	}

	#[must_use]
	pub fn contains(&self, id: ItemId) -> bool {
		self.state.lock().items.contains_key(&id)
	}

	fn with_item<T>(
		&self,
		id: ItemId,
		f: impl FnOnce(&mut CoreItem) -> T,
	) -> Result<T, BackendError> {
		self.state
			.lock()
			.items
			.get_mut(&id)
			.map(f)
			.ok_or_else(|| BackendError::NotFound(format!("core item <id='{id}'>")))
	}
}

impl CoreDb for MemoryCoreDb {
	fn all_items(&self) -> Vec<ItemId> {
		self.state.lock().items.keys().copied().collect()
	}

	fn item_info(&self, id: ItemId) -> Option<ItemInfo> {
		self.state.lock().items.get(&id).map(|item| item.info.clone())
	}

	fn item_by_path(&self, path: &Path) -> Option<ItemInfo> {
		self.state
			.lock()
			.items
			.values()
			.find(|item| item.info.path == path)
			.map(|item| item.info.clone())
	}

	fn obsolete_item_ids(&self) -> Vec<ItemId> {
		self.state.lock().obsolete.iter().copied().collect()
	}

	fn delete_item(&self, id: ItemId) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		let removed = state.items.remove(&id).is_some() | state.obsolete.remove(&id);

		if removed {
			trace!(%id, "Deleted core item");
			Ok(())
		} else {
			Err(BackendError::NotFound(format!("core item <id='{id}'>")))
		}
	}

	fn face_regions(&self, id: ItemId) -> Vec<FaceRegion> {
		self.state
			.lock()
			.items
			.get(&id)
			.map(|item| item.faces.clone())
			.unwrap_or_default()
	}

	fn face_engine_uuids(&self) -> HashSet<String> {
		self.state.lock().face_engine_uuids.clone()
	}

	fn assign_tags(&self, id: ItemId, tags: &[String]) -> Result<(), BackendError> {
		self.with_item(id, |item| {
			for tag in tags {
				if !item.metadata.tags.contains(tag) {
					item.metadata.tags.push(tag.clone());
				}
			}
		})
	}

	fn set_pick_label(&self, id: ItemId, label: PickLabel) -> Result<(), BackendError> {
		self.with_item(id, |item| item.pick_label = label)
	}

	fn read_metadata(&self, id: ItemId) -> Result<ItemMetadata, BackendError> {
		self.with_item(id, |item| item.metadata.clone())
	}

	fn write_metadata(
		&self,
		id: ItemId,
		metadata: &ItemMetadata,
		tags_only: bool,
	) -> Result<(), BackendError> {
		self.with_item(id, |item| {
			if tags_only {
				item.metadata.tags.clone_from(&metadata.tags);
			} else {
				item.metadata = metadata.clone();
			}
		})
	}
}

#[derive(Debug, Clone, Default)]
struct ThumbEntry {
	file_path: Option<PathBuf>,
	hash: Option<(String, u64)>,
	custom_identifier: Option<String>,
}

#[derive(Debug, Default)]
struct ThumbsState {
	entries: BTreeMap<ThumbnailId, ThumbEntry>,
	failing_removals: HashSet<ThumbnailId>,
	open_transactions: usize,
	commits: usize,
	rollbacks: usize,
	refuse_transactions: bool,
}

/// Removals apply right away, transactions are only counted.
#[derive(Debug, Default)]
pub struct MemoryThumbsDb {
	housekeeping: Housekeeping,
	state: Mutex<ThumbsState>,
}

impl MemoryThumbsDb {
	pub fn insert_for_path(&self, id: ThumbnailId, path: impl Into<PathBuf>) {
		self.state.lock().entries.insert(
			id,
			ThumbEntry {
				file_path: Some(path.into()),
				..Default::default()
			},
		);
	}

	pub fn insert_for_hash(&self, id: ThumbnailId, unique_hash: impl Into<String>, file_size: u64) {
		self.state.lock().entries.insert(
			id,
			ThumbEntry {
				hash: Some((unique_hash.into(), file_size)),
				..Default::default()
			},
		);
	}

	pub fn insert_for_custom_identifier(&self, id: ThumbnailId, identifier: impl Into<String>) {
		self.state.lock().entries.insert(
			id,
			ThumbEntry {
				custom_identifier: Some(identifier.into()),
				..Default::default()
			},
		);
	}

	/// Makes every later removal of `id` fail.
	pub fn fail_removal_of(&self, id: ThumbnailId) {
		self.state.lock().failing_removals.insert(id);
	}

	/// Makes every later attempt to begin a transaction fail.
	pub fn refuse_transactions(&self) {
		self.state.lock().refuse_transactions = true;
	}

	#[must_use]
	pub fn contains(&self, id: ThumbnailId) -> bool {
		self.state.lock().entries.contains_key(&id)
	}

	#[must_use]
	pub fn commit_count(&self) -> usize {
		self.state.lock().commits
	}

	#[must_use]
	pub fn rollback_count(&self) -> usize {
		self.state.lock().rollbacks
	}

	fn find(&self, predicate: impl Fn(&ThumbEntry) -> bool) -> Option<ThumbnailId> {
		self.state
			.lock()
			.entries
			.iter()
			.find(|(_, entry)| predicate(entry))
			.map(|(id, _)| *id)
	}
}

impl ThumbsDb for MemoryThumbsDb {
	fn find_all(&self) -> Vec<ThumbnailId> {
		self.state.lock().entries.keys().copied().collect()
	}

	fn find_by_file_path(&self, path: &Path) -> Option<ThumbnailId> {
		self.find(|entry| entry.file_path.as_deref() == Some(path))
	}

	fn find_by_hash(&self, unique_hash: &str, file_size: u64) -> Option<ThumbnailId> {
		self.find(|entry| {
			entry
				.hash
				.as_ref()
				.is_some_and(|(hash, size)| hash == unique_hash && *size == file_size)
		})
	}

	fn find_by_custom_identifier(&self, identifier: &str) -> Option<ThumbnailId> {
		self.find(|entry| entry.custom_identifier.as_deref() == Some(identifier))
	}

	fn begin_transaction(&self) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		if state.refuse_transactions {
			return Err(BackendError::Other("thumbnails database is locked".to_string()));
		}
		state.open_transactions += 1;
		Ok(())
	}

	fn remove(&self, id: ThumbnailId) -> Result<(), BackendError> {
		let mut state = self.state.lock();

		if state.failing_removals.contains(&id) {
			return Err(BackendError::Other(format!(
				"removal of thumbnail <id='{id}'> failed"
			)));
		}

		state
			.entries
			.remove(&id)
			.map(|_| ())
			.ok_or_else(|| BackendError::NotFound(format!("thumbnail <id='{id}'>")))
	}

	fn commit_transaction(&self) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		if state.open_transactions == 0 {
			return Err(BackendError::Other("no transaction to commit".to_string()));
		}
		state.open_transactions -= 1;
		state.commits += 1;
		Ok(())
	}

	fn rollback_transaction(&self) -> Result<(), BackendError> {
		let mut state = self.state.lock();
		if state.open_transactions == 0 {
			return Err(BackendError::Other("no transaction to roll back".to_string()));
		}
		state.open_transactions -= 1;
		state.rollbacks += 1;
		Ok(())
	}
}

#[derive(Debug, Default)]
pub struct MemoryFaceDb {
	housekeeping: Housekeeping,
	identities: Mutex<BTreeMap<IdentityId, Identity>>,
}

impl MemoryFaceDb {
	pub fn insert_identity(&self, identity: Identity) {
		self.identities.lock().insert(identity.id, identity);
	}

	#[must_use]
	pub fn contains(&self, id: IdentityId) -> bool {
		self.identities.lock().contains_key(&id)
	}
}

impl FaceDb for MemoryFaceDb {
	fn all_identities(&self) -> Vec<Identity> {
		self.identities.lock().values().cloned().collect()
	}

	fn delete_identity(&self, identity: &Identity) -> Result<(), BackendError> {
		self.identities
			.lock()
			.remove(&identity.id)
			.map(|_| ())
			.ok_or_else(|| BackendError::NotFound(format!("identity <id='{}'>", identity.id)))
	}
}

#[derive(Debug, Default)]
pub struct MemorySimilarityDb {
	housekeeping: Housekeeping,
	fingerprints: Mutex<HashMap<(ItemId, FingerprintAlgorithm), String>>,
}

impl MemorySimilarityDb {
	#[must_use]
	pub fn fingerprint(&self, id: ItemId, algorithm: FingerprintAlgorithm) -> Option<String> {
		self.fingerprints.lock().get(&(id, algorithm)).cloned()
	}

	/// Groups of items sharing the same fingerprint.
	#[must_use]
	pub fn duplicate_groups(&self, algorithm: FingerprintAlgorithm) -> Vec<Vec<ItemId>> {
		let mut by_fingerprint = BTreeMap::<String, Vec<ItemId>>::new();

		for ((id, alg), fingerprint) in self.fingerprints.lock().iter() {
			if *alg == algorithm {
				by_fingerprint
					.entry(fingerprint.clone())
					.or_default()
					.push(*id);
			}
		}

		by_fingerprint
			.into_values()
			.filter(|ids| ids.len() > 1)
			.map(|mut ids| {
				ids.sort_unstable();
				ids
			})
			.collect()
	}
}

impl SimilarityDb for MemorySimilarityDb {
	fn has_fingerprint(&self, id: ItemId, algorithm: FingerprintAlgorithm) -> bool {
		self.fingerprints.lock().contains_key(&(id, algorithm))
	}

	fn store_fingerprint(
		&self,
		id: ItemId,
		algorithm: FingerprintAlgorithm,
		fingerprint: &str,
	) -> Result<(), BackendError> {
		self.fingerprints
			.lock()
			.insert((id, algorithm), fingerprint.to_string());
		Ok(())
	}

	fn remove_fingerprint(
		&self,
		id: ItemId,
		algorithm: FingerprintAlgorithm,
	) -> Result<(), BackendError> {
		self.fingerprints.lock().remove(&(id, algorithm));
		Ok(())
	}

	fn registered_image_ids(&self) -> HashSet<ItemId> {
		self.fingerprints.lock().keys().map(|(id, _)| *id).collect()
	}
}

/// Metadata "files" kept in a map keyed by path.
#[derive(Debug, Default)]
pub struct MemoryMetadataHub {
	files: Mutex<HashMap<PathBuf, ItemMetadata>>,
}

impl MemoryMetadataHub {
	pub fn insert_file(&self, path: impl Into<PathBuf>, metadata: ItemMetadata) {
		self.files.lock().insert(path.into(), metadata);
	}

	#[must_use]
	pub fn file(&self, path: &Path) -> Option<ItemMetadata> {
		self.files.lock().get(path).cloned()
	}
}

impl MetadataHub for MemoryMetadataHub {
	fn file_exists(&self, path: &Path) -> bool {
		self.files.lock().contains_key(path)
	}

	fn load_from_file(&self, path: &Path) -> Result<ItemMetadata, BackendError> {
		self.file(path)
			.ok_or_else(|| BackendError::NotFound(format!("file <path='{}'>", path.display())))
	}

	fn write_to_file(
		&self,
		path: &Path,
		metadata: &ItemMetadata,
		tags_only: bool,
	) -> Result<(), BackendError> {
		let mut files = self.files.lock();
		let file = files
			.get_mut(path)
			.ok_or_else(|| BackendError::NotFound(format!("file <path='{}'>", path.display())))?;

		if tags_only {
			file.tags.clone_from(&metadata.tags);
		} else {
			*file = metadata.clone();
		}

		Ok(())
	}

	fn remove(&self, item: &ItemInfo, action: RemoveAction) -> Result<(), BackendError> {
		let mut files = self.files.lock();
		let file = files.get_mut(&item.path).ok_or_else(|| {
			BackendError::NotFound(format!("file <path='{}'>", item.path.display()))
		})?;

		match action {
			// Face regions aren't kept in these files
			RemoveAction::Faces => {}
			RemoveAction::Tags => file.tags.clear(),
			RemoveAction::Comments => file.comment = None,
		}

		Ok(())
	}
}

/// Every in-memory database bundled together.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
	pub core: Arc<MemoryCoreDb>,
	pub thumbs: Arc<MemoryThumbsDb>,
	pub faces: Arc<MemoryFaceDb>,
	pub similarity: Arc<MemorySimilarityDb>,
	pub metadata: Arc<MemoryMetadataHub>,
}

impl MemoryDatabase {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Fills the database backends, keeping whatever else `backends` already holds.
	#[must_use]
	pub fn attach(&self, backends: Backends) -> Backends {
		let core: Arc<dyn CoreDb> = self.core.clone();
		let thumbs: Arc<dyn ThumbsDb> = self.thumbs.clone();
		let faces: Arc<dyn FaceDb> = self.faces.clone();
		let similarity: Arc<dyn SimilarityDb> = self.similarity.clone();
		let metadata: Arc<dyn MetadataHub> = self.metadata.clone();

		backends
			.with_core_db(core)
			.with_thumbs_db(thumbs)
			.with_face_db(faces)
			.with_similarity_db(similarity)
			.with_metadata_hub(metadata)
	}
}
