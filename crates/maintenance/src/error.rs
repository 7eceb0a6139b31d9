use lumen_job_pool::PoolError;
use lumen_utils::error::FileIOError;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{settings::SettingsError, types::DatabaseKind};

/// Batch level errors, they stop a batch before anything gets dispatched.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("missing backend required by this batch: <backend='{0}'>")]
	MissingBackend(&'static str),
	#[error(transparent)]
	Pool(#[from] PoolError),
	#[error(transparent)]
	Settings(#[from] SettingsError),
	#[error("blocking task failed to execute to completion: {0}")]
	BlockingTask(String),
	#[error("batch completion watcher is gone before reporting")]
	CompletionLost,
}

/// Item level errors, reported with the failed item and never stopping the batch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonCriticalError {
	#[error("failed to decode image <path='{}'>: {reason}", .path.display())]
	Decode { path: PathBuf, reason: String },
	#[error("file is missing <path='{}'>", .0.display())]
	MissingFile(PathBuf),
	#[error("backend call failed: {0}")]
	Backend(String),
	#[error("inference failed: {0}")]
	Inference(String),
	#[error("integrity check failed <database='{0}'>")]
	Integrity(DatabaseKind),
	#[error("item processing aborted")]
	Aborted,
	#[error("item processing panicked: {0}")]
	Panicked(String),
}

/// Errors returned by the external collaborators behind the backend traits.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to decode image <path='{}'>: {source}", .path.display())]
	Decode {
		path: PathBuf,
		#[source]
		source: image::ImageError,
	},
	#[error("image encoding failed: {0}")]
	Encode(#[from] image::ImageError),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("call aborted")]
	Aborted,
	#[error("{0}")]
	Other(String),
}

impl From<BackendError> for NonCriticalError {
	fn from(e: BackendError) -> Self {
		match e {
			BackendError::Decode { path, source } => Self::Decode {
				path,
				reason: source.to_string(),
			},
			BackendError::Aborted => Self::Aborted,
			e => Self::Backend(e.to_string()),
		}
	}
}
