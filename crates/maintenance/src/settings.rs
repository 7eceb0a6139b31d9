use lumen_utils::error::FileIOError;

use std::{io, path::Path};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::types::PickLabel;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// User facing configuration of the maintenance tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSettings {
	#[serde(default = "default_true")]
	pub use_multi_core: bool,
	/// Overrides the worker count derived from the available CPU cores.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_workers: Option<usize>,
	#[serde(default = "default_thumbnail_size")]
	pub thumbnail_size: u32,
	#[serde(default = "default_autotag_batch_size")]
	pub autotag_batch_size: usize,
	#[serde(default = "default_preview_size")]
	pub preview_size: u32,
	#[serde(default)]
	pub quality: QualitySettings,
}

const fn default_true() -> bool {
	true
}

const fn default_thumbnail_size() -> u32 {
	256
}

const fn default_autotag_batch_size() -> usize {
	16
}

const fn default_preview_size() -> u32 {
	64
}

impl Default for MaintenanceSettings {
	fn default() -> Self {
		Self {
			use_multi_core: default_true(),
			max_workers: None,
			thumbnail_size: default_thumbnail_size(),
			autotag_batch_size: default_autotag_batch_size(),
			preview_size: default_preview_size(),
			quality: QualitySettings::default(),
		}
	}
}

impl MaintenanceSettings {
	/// One worker when multi core is disabled, otherwise the explicit override or one per core.
	#[must_use]
	pub fn worker_count(&self) -> usize {
		if !self.use_multi_core {
			return 1;
		}

		self.max_workers
			.map_or_else(lumen_utils::available_parallelism, |max| max.max(1))
	}

	/// Missing files yield the default settings.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
		let path = path.as_ref();

		match fs::read(path).await {
			Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "No settings file found, using defaults");
				Ok(Self::default())
			}
			Err(e) => Err(FileIOError::from((path, e, "Failed to read maintenance settings")).into()),
		}
	}

	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
		let path = path.as_ref();

		fs::write(path, serde_json::to_vec_pretty(self)?)
			.await
			.map_err(|e| FileIOError::from((path, e)))?;

		Ok(())
	}
}

/// Which quality aspects are scored and where the pick label thresholds lie, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
	pub detect_blur: bool,
	pub detect_noise: bool,
	pub detect_compression: bool,
	pub detect_exposure: bool,
	pub detect_aesthetic: bool,
	pub rejected_threshold: u8,
	pub pending_threshold: u8,
	pub accepted_threshold: u8,
}

impl Default for QualitySettings {
	fn default() -> Self {
		Self {
			detect_blur: true,
			detect_noise: true,
			detect_compression: true,
			detect_exposure: true,
			detect_aesthetic: false,
			rejected_threshold: 10,
			pending_threshold: 40,
			accepted_threshold: 60,
		}
	}
}

impl QualitySettings {
	#[must_use]
	pub const fn pick_label(&self, score: u8) -> PickLabel {
		if score <= self.rejected_threshold {
			PickLabel::Rejected
		} else if score >= self.accepted_threshold {
			PickLabel::Accepted
		} else if score <= self.pending_threshold {
			PickLabel::Pending
		} else {
			PickLabel::None
		}
	}
}
