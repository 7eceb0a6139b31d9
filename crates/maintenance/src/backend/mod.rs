//! External collaborators consumed by the maintenance tasks.
//!
//! Every trait here is synchronous: tasks always call them from tokio's blocking pool.

use std::{collections::HashSet, fmt, path::Path, sync::Arc};

use image::DynamicImage;

use crate::{
	error::{BackendError, Error},
	settings::QualitySettings,
	types::{
		AutotagModel, FaceRegion, FingerprintAlgorithm, Identity, ItemId, ItemInfo, ItemMetadata,
		PickLabel, RemoveAction, ThumbnailId,
	},
};

pub mod fs;
pub mod memory;

/// Maintenance operations every database offers.
pub trait DatabaseHousekeeping: Send + Sync {
	fn is_initialized(&self) -> bool {
		true
	}

	fn integrity_check(&self) -> bool;

	fn vacuum(&self);
}

pub trait ImageLoader: Send + Sync {
	fn load(&self, path: &Path) -> Result<DynamicImage, BackendError>;
}

pub trait ThumbnailStore: Send + Sync {
	/// Persists a thumbnail of `image` fitting in `size` pixels and returns it.
	fn store(&self, path: &Path, image: &DynamicImage, size: u32)
		-> Result<DynamicImage, BackendError>;
}

pub trait Fingerprinter: Send + Sync {
	fn algorithm(&self) -> FingerprintAlgorithm {
		FingerprintAlgorithm::Haar
	}

	fn fingerprint(&self, image: &DynamicImage) -> Result<String, BackendError>;
}

pub trait CoreDb: DatabaseHousekeeping {
	fn all_items(&self) -> Vec<ItemId>;

	fn item_info(&self, id: ItemId) -> Option<ItemInfo>;

	fn item_by_path(&self, path: &Path) -> Option<ItemInfo>;

	fn obsolete_item_ids(&self) -> Vec<ItemId>;

	fn delete_item(&self, id: ItemId) -> Result<(), BackendError>;

	fn face_regions(&self, id: ItemId) -> Vec<FaceRegion>;

	/// Face engine uuids referenced by the tag properties.
	fn face_engine_uuids(&self) -> HashSet<String>;

	fn assign_tags(&self, id: ItemId, tags: &[String]) -> Result<(), BackendError>;

	fn set_pick_label(&self, id: ItemId, label: PickLabel) -> Result<(), BackendError>;

	fn read_metadata(&self, id: ItemId) -> Result<ItemMetadata, BackendError>;

	fn write_metadata(
		&self,
		id: ItemId,
		metadata: &ItemMetadata,
		tags_only: bool,
	) -> Result<(), BackendError>;
}

pub trait ThumbsDb: DatabaseHousekeeping {
	fn find_all(&self) -> Vec<ThumbnailId>;

	fn find_by_file_path(&self, path: &Path) -> Option<ThumbnailId>;

	fn find_by_hash(&self, unique_hash: &str, file_size: u64) -> Option<ThumbnailId>;

	fn find_by_custom_identifier(&self, identifier: &str) -> Option<ThumbnailId>;

	fn begin_transaction(&self) -> Result<(), BackendError>;

	fn remove(&self, id: ThumbnailId) -> Result<(), BackendError>;

	fn commit_transaction(&self) -> Result<(), BackendError>;

	fn rollback_transaction(&self) -> Result<(), BackendError>;
}

pub trait FaceDb: DatabaseHousekeeping {
	fn all_identities(&self) -> Vec<Identity>;

	fn delete_identity(&self, identity: &Identity) -> Result<(), BackendError>;
}

pub trait SimilarityDb: DatabaseHousekeeping {
	fn has_fingerprint(&self, id: ItemId, algorithm: FingerprintAlgorithm) -> bool;

	fn store_fingerprint(
		&self,
		id: ItemId,
		algorithm: FingerprintAlgorithm,
		fingerprint: &str,
	) -> Result<(), BackendError>;

	fn remove_fingerprint(
		&self,
		id: ItemId,
		algorithm: FingerprintAlgorithm,
	) -> Result<(), BackendError>;

	fn registered_image_ids(&self) -> HashSet<ItemId>;
}

pub trait MetadataHub: Send + Sync {
	fn file_exists(&self, path: &Path) -> bool {
		path.exists()
	}

	fn load_from_file(&self, path: &Path) -> Result<ItemMetadata, BackendError>;

	fn write_to_file(
		&self,
		path: &Path,
		metadata: &ItemMetadata,
		tags_only: bool,
	) -> Result<(), BackendError>;

	fn remove(&self, item: &ItemInfo, action: RemoveAction) -> Result<(), BackendError>;
}

/// Heavy tagging model, loaded on first use and unloaded once a batch completes.
pub trait TagModel: Send + Sync {
	/// Returns one tag list per input image, in the same order.
	fn infer(
		&self,
		model: AutotagModel,
		images: &[DynamicImage],
	) -> Result<Vec<Vec<String>>, BackendError>;

	fn translate(&self, tag: &str, _language: &str) -> Result<String, BackendError> {
		Ok(tag.to_string())
	}

	/// Asks a running inference to stop as soon as possible.
	fn abort(&self) {}

	fn unload(&self) {}
}

pub trait QualityScorer: Send + Sync {
	/// Quality score in percent.
	fn score(&self, image: &DynamicImage, settings: &QualitySettings) -> Result<u8, BackendError>;

	fn abort(&self) {}

	fn unload(&self) {}
}

/// Every collaborator a [`Maintenance`](crate::Maintenance) may hand to its tasks. Batches only
/// require the ones their task kind uses.
#[derive(Clone, Default)]
pub struct Backends {
	pub image_loader: Option<Arc<dyn ImageLoader>>,
	pub thumbnail_store: Option<Arc<dyn ThumbnailStore>>,
	pub fingerprinter: Option<Arc<dyn Fingerprinter>>,
	pub core_db: Option<Arc<dyn CoreDb>>,
	pub thumbs_db: Option<Arc<dyn ThumbsDb>>,
	pub face_db: Option<Arc<dyn FaceDb>>,
	pub similarity_db: Option<Arc<dyn SimilarityDb>>,
	pub metadata_hub: Option<Arc<dyn MetadataHub>>,
	pub tag_model: Option<Arc<dyn TagModel>>,
	pub quality_scorer: Option<Arc<dyn QualityScorer>>,
}

impl fmt::Debug for Backends {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Backends")
			.field("image_loader", &self.image_loader.is_some())
			.field("thumbnail_store", &self.thumbnail_store.is_some())
			.field("fingerprinter", &self.fingerprinter.is_some())
			.field("core_db", &self.core_db.is_some())
			.field("thumbs_db", &self.thumbs_db.is_some())
			.field("face_db", &self.face_db.is_some())
			.field("similarity_db", &self.similarity_db.is_some())
			.field("metadata_hub", &self.metadata_hub.is_some())
			.field("tag_model", &self.tag_model.is_some())
			.field("quality_scorer", &self.quality_scorer.is_some())
			.finish()
	}
}

impl Backends {
	#[must_use]
	pub fn with_image_loader(mut self, image_loader: Arc<dyn ImageLoader>) -> Self {
		self.image_loader = Some(image_loader);
		self
	}

	#[must_use]
	pub fn with_thumbnail_store(mut self, thumbnail_store: Arc<dyn ThumbnailStore>) -> Self {
		self.thumbnail_store = Some(thumbnail_store);
		self
	}

	#[must_use]
	pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
		self.fingerprinter = Some(fingerprinter);
		self
	}

	#[must_use]
	pub fn with_core_db(mut self, core_db: Arc<dyn CoreDb>) -> Self {
		self.core_db = Some(core_db);
		self
	}

	#[must_use]
	pub fn with_thumbs_db(mut self, thumbs_db: Arc<dyn ThumbsDb>) -> Self {
		self.thumbs_db = Some(thumbs_db);
		self
	}

	#[must_use]
	pub fn with_face_db(mut self, face_db: Arc<dyn FaceDb>) -> Self {
		self.face_db = Some(face_db);
		self
	}

	#[must_use]
	pub fn with_similarity_db(mut self, similarity_db: Arc<dyn SimilarityDb>) -> Self {
		self.similarity_db = Some(similarity_db);
		self
	}

	#[must_use]
	pub fn with_metadata_hub(mut self, metadata_hub: Arc<dyn MetadataHub>) -> Self {
		self.metadata_hub = Some(metadata_hub);
		self
	}

	#[must_use]
	pub fn with_tag_model(mut self, tag_model: Arc<dyn TagModel>) -> Self {
		self.tag_model = Some(tag_model);
		self
	}

	#[must_use]
	pub fn with_quality_scorer(mut self, quality_scorer: Arc<dyn QualityScorer>) -> Self {
		self.quality_scorer = Some(quality_scorer);
		self
	}
}

pub(crate) fn require<T: ?Sized>(
	backend: Option<&Arc<T>>,
	name: &'static str,
) -> Result<Arc<T>, Error> {
	backend.cloned().ok_or(Error::MissingBackend(name))
}
