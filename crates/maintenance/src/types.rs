use std::{collections::BTreeMap, fmt, path::PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ItemId = i64;
pub type ThumbnailId = i32;
pub type IdentityId = i32;
pub type BatchId = Uuid;

/// Core database record of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemInfo {
	pub id: ItemId,
	pub path: PathBuf,
	pub unique_hash: String,
	pub file_size: u64,
}

/// A person known by the face recognition database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub id: IdentityId,
	pub attributes: BTreeMap<String, String>,
}

impl Identity {
	pub const UUID_ATTRIBUTE: &'static str = "uuid";

	#[must_use]
	pub fn uuid(&self) -> Option<&str> {
		self.attributes
			.get(Self::UUID_ATTRIBUTE)
			.map(String::as_str)
			.filter(|uuid| !uuid.is_empty())
	}
}

/// Face rectangle stored for an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
	pub x: i32,
	pub y: i32,
	pub width: i32,
	pub height: i32,
}

impl FaceRegion {
	/// Identifier under which the thumbnail of this face is cached.
	#[must_use]
	pub fn custom_identifier(&self, path: &std::path::Path) -> String {
		format!(
			"detail:{}?rect={},{}-{}x{}",
			path.display(),
			self.x,
			self.y,
			self.width,
			self.height
		)
	}
}

/// Small RGBA image handed to progress listeners.
#[derive(Clone, PartialEq, Eq)]
pub struct Preview {
	pub width: u32,
	pub height: u32,
	pub rgba: Vec<u8>,
}

impl Preview {
	#[must_use]
	pub fn from_image(image: &DynamicImage, size: u32) -> Self {
		let rgba = image.thumbnail(size, size).to_rgba8();

		Self {
			width: rgba.width(),
			height: rgba.height(),
			rgba: rgba.into_raw(),
		}
	}
}

impl fmt::Debug for Preview {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Preview")
			.field("width", &self.width)
			.field("height", &self.height)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseKind {
	Core,
	Thumbnails,
	Recognition,
	Similarity,
}

impl fmt::Display for DatabaseKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Core => "core",
			Self::Thumbnails => "thumbnails",
			Self::Recognition => "recognition",
			Self::Similarity => "similarity",
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
	WriteFromDatabaseToFile,
	ReadFromFileToDatabase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveAction {
	Faces,
	Tags,
	Comments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintAlgorithm {
	Haar,
	TfIdf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutotagModel {
	#[default]
	YoloNano,
	YoloXLarge,
	ResNet50,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickLabel {
	#[default]
	None,
	Rejected,
	Pending,
	Accepted,
}

/// Metadata exchanged between the core database and the image files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
	pub tags: Vec<String>,
	pub rating: Option<u8>,
	pub comment: Option<String>,
}

impl ItemMetadata {
	/// Keeps only the tags, as done by tag-only synchronizations.
	#[must_use]
	pub fn tags_only(self) -> Self {
		Self {
			tags: self.tags,
			..Default::default()
		}
	}
}

/// Outcome of shrinking one database: whether the vacuum ran and whether the database passed its
/// integrity check afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrinkResult {
	pub database: DatabaseKind,
	pub performed: bool,
	pub success: bool,
}

/// Stale entries found by a junk scan, to be fed to the cleaning batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunkReport {
	pub stale_image_ids: Vec<ItemId>,
	pub stale_thumbnail_ids: Vec<ThumbnailId>,
	pub stale_identities: Vec<Identity>,
	pub stale_similarity_image_ids: Vec<ItemId>,
}
