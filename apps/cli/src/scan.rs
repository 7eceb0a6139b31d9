use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::debug;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff"];

fn is_image(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| {
			IMAGE_EXTENSIONS
				.iter()
				.any(|known| known.eq_ignore_ascii_case(ext))
		})
}

/// Every image file below `root`, sorted so batches are reproducible.
pub async fn collect_images(root: &Path) -> Result<Vec<PathBuf>> {
	let mut pending = vec![root.to_path_buf()];
	let mut images = Vec::new();

	while let Some(dir) = pending.pop() {
		let mut entries = fs::read_dir(&dir)
			.await
			.with_context(|| format!("Failed to read directory {}", dir.display()))?;

		while let Some(entry) = entries
			.next_entry()
			.await
			.with_context(|| format!("Failed to read entry of {}", dir.display()))?
		{
			let path = entry.path();
			let file_type = entry
				.file_type()
				.await
				.with_context(|| format!("Failed to stat {}", path.display()))?;

			if file_type.is_dir() {
				pending.push(path);
			} else if file_type.is_file() && is_image(&path) {
				images.push(path);
			}
		}
	}

	images.sort();
	debug!(root = %root.display(), count = images.len(), "Collected images");

	Ok(images)
}
