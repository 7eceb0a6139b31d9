//! Maintenance tasks, each one a [`Job`](lumen_job_pool::Job) draining the batch's shared
//! [`MaintenanceData`] until it runs dry or gets canceled.

use lumen_job_pool::{JobId, JobReporter, Progress};
use lumen_utils::panic_message;

use std::{panic, sync::Arc};

use tokio::{sync::oneshot, task::spawn_blocking};
use tracing::error;

use crate::{
	data::MaintenanceData,
	error::{Error, NonCriticalError},
	observer::{Advance, ItemOutcome, ItemRef, MaintenanceObserver},
	types::Preview,
};

mod autotags;
mod database;
mod fingerprints;
mod image_quality;
mod metadata_remove;
mod metadata_sync;
mod thumbs;

pub use autotags::AutotagsTask;
pub use database::{DatabaseMode, DatabaseTask};
pub use fingerprints::FingerprintsTask;
pub use image_quality::ImageQualityTask;
pub use metadata_remove::MetadataRemoveTask;
pub use metadata_sync::MetadataSyncTask;
pub use thumbs::ThumbsTask;

/// Wiring shared by every task of a batch.
#[derive(Clone)]
pub struct TaskBase {
	id: JobId,
	data: Arc<MaintenanceData>,
	observer: Arc<dyn MaintenanceObserver>,
	completed: u64,
}

impl TaskBase {
	#[must_use]
	pub fn new(data: Arc<MaintenanceData>, observer: Arc<dyn MaintenanceObserver>) -> Self {
		Self {
			id: JobId::new_v4(),
			data,
			observer,
			completed: 0,
		}
	}

	#[must_use]
	pub const fn id(&self) -> JobId {
		self.id
	}

	#[must_use]
	pub fn data(&self) -> &MaintenanceData {
		&self.data
	}

	#[must_use]
	pub fn observer(&self) -> &dyn MaintenanceObserver {
		self.observer.as_ref()
	}

	/// Notifies the observer about one processed item.
	pub fn advance(&mut self, item: ItemRef, res: Result<Option<Preview>, NonCriticalError>) {
		self.completed += 1;

		self.observer.on_advance(&Advance {
			item,
			outcome: ItemOutcome::from(res),
		});
	}

	/// Reports how far this task got, counting `remaining` items still waiting in the shared data.
	pub fn report(&self, reporter: &JobReporter, remaining: usize) {
		reporter.progress(Progress::Count {
			completed: self.completed,
			total: self.completed + remaining as u64,
		});
	}
}

impl std::fmt::Debug for TaskBase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskBase")
			.field("id", &self.id)
			.field("completed", &self.completed)
			.finish_non_exhaustive()
	}
}

/// Runs one item's processing on tokio's blocking pool.
///
/// A panic inside `f` becomes an item failure, only a vanished blocking task fails the whole job.
pub(crate) async fn blocking<T, F>(f: F) -> Result<Result<T, NonCriticalError>, Error>
where
	T: Send + 'static,
	F: FnOnce() -> Result<T, NonCriticalError> + Send + 'static,
{
	let (tx, rx) = oneshot::channel();

	let handle = spawn_blocking(move || {
		// Handling error on receiver side
		let _ = tx.send(
			panic::catch_unwind(panic::AssertUnwindSafe(f)).unwrap_or_else(|payload| {
				Err(NonCriticalError::Panicked(panic_message(payload.as_ref())))
			}),
		);
	});

	if let Ok(res) = rx.await {
		Ok(res)
	} else {
		error!("Blocking item processing vanished before answering");
		Err(Error::BlockingTask(match handle.await {
			Ok(()) => "result channel closed".to_string(),
			Err(e) => e.to_string(),
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn panics_become_item_failures() {
		let res = blocking::<(), _>(|| panic!("decoder blew up")).await.unwrap();

		assert_eq!(
			res,
			Err(NonCriticalError::Panicked("decoder blew up".to_string()))
		);
	}

	#[tokio::test]
	async fn results_pass_through() {
		assert_eq!(blocking(|| Ok(42)).await.unwrap(), Ok(42));
		assert_eq!(
			blocking::<(), _>(|| Err(NonCriticalError::Aborted)).await.unwrap(),
			Err(NonCriticalError::Aborted)
		);
	}
}
