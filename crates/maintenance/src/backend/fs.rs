//! File system backed collaborators, built on the `image` crate.

use lumen_utils::error::FileIOError;

use std::{
	fs,
	path::{Path, PathBuf},
};

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use tracing::trace;

use crate::error::BackendError;

use super::{Fingerprinter, ImageLoader, ThumbnailStore};

pub const THUMBNAIL_EXTENSION: &str = "png";

const FINGERPRINT_SIDE: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
	fn load(&self, path: &Path) -> Result<DynamicImage, BackendError> {
		let bytes = fs::read(path).map_err(|e| FileIOError::from((path, e)))?;

		image::load_from_memory(&bytes).map_err(|source| BackendError::Decode {
			path: path.to_path_buf(),
			source,
		})
	}
}

/// Thumbnail cache where each thumbnail lives in a shard directory named after the first hex
/// characters of the hash of its source path.
#[derive(Debug, Clone)]
pub struct FsThumbnailStore {
	root: PathBuf,
}

impl FsThumbnailStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	#[must_use]
	pub fn thumbnail_path(&self, source: &Path) -> PathBuf {
		let hex = blake3::hash(source.as_os_str().as_encoded_bytes()).to_hex();
		let hash = hex.as_str();

		let mut path = self.root.join(&hash[0..3]);
		path.push(hash);
		path.set_extension(THUMBNAIL_EXTENSION);

		path
	}
}

/// Largest dimensions fitting in a `size` square while keeping the aspect ratio.
fn scale_dimensions(width: u32, height: u32, size: u32) -> (u32, u32) {
	if width <= size && height <= size {
		return (width, height);
	}

	let (long, short) = if width >= height {
		(width, height)
	} else {
		(height, width)
	};

	let scaled_short = (u64::from(short) * u64::from(size) / u64::from(long)).max(1);
	let scaled_short = u32::try_from(scaled_short).unwrap_or(size);

	if width >= height {
		(size, scaled_short)
	} else {
		(scaled_short, size)
	}
}

impl ThumbnailStore for FsThumbnailStore {
	fn store(
		&self,
		path: &Path,
		image: &DynamicImage,
		size: u32,
	) -> Result<DynamicImage, BackendError> {
		let (width, height) = image.dimensions();
		let (scaled_width, scaled_height) = scale_dimensions(width, height, size);

		let thumbnail = if (scaled_width, scaled_height) == (width, height) {
			image.clone()
		} else {
			image.resize_exact(scaled_width, scaled_height, FilterType::Triangle)
		};

		let output_path = self.thumbnail_path(path);

		if let Some(shard_dir) = output_path.parent() {
			fs::create_dir_all(shard_dir).map_err(|e| FileIOError::from((shard_dir, e)))?;
		}

		thumbnail.save_with_format(&output_path, ImageFormat::Png)?;

		trace!(
			source = %path.display(),
			thumbnail = %output_path.display(),
			"Stored thumbnail"
		);

		Ok(thumbnail)
	}
}

/// Content fingerprint of the downscaled grayscale image, so re-encoded copies of the same
/// picture usually share it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Fingerprinter;

impl Fingerprinter for Blake3Fingerprinter {
	fn fingerprint(&self, image: &DynamicImage) -> Result<String, BackendError> {
		let sample = image
			.resize_exact(FINGERPRINT_SIDE, FINGERPRINT_SIDE, FilterType::Triangle)
			.to_luma8();

		Ok(blake3::hash(sample.as_raw()).to_hex().to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scaling_keeps_aspect_ratio() {
		assert_eq!(scale_dimensions(100, 50, 256), (100, 50));
		assert_eq!(scale_dimensions(1024, 512, 256), (256, 128));
		assert_eq!(scale_dimensions(300, 1200, 256), (64, 256));
		assert_eq!(scale_dimensions(10_000, 1, 256), (256, 1));
	}
}
