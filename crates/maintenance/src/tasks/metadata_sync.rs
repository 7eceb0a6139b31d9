use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{
	backend::{CoreDb, MetadataHub},
	error::{Error, NonCriticalError},
	observer::ItemRef,
	types::SyncDirection,
};

use super::{blocking, TaskBase};

/// Synchronizes metadata between the core database and the image files, in one direction.
pub struct MetadataSyncTask {
	base: TaskBase,
	core_db: Arc<dyn CoreDb>,
	hub: Arc<dyn MetadataHub>,
	direction: SyncDirection,
	tags_only: bool,
}

impl MetadataSyncTask {
	#[must_use]
	pub fn new(
		base: TaskBase,
		core_db: Arc<dyn CoreDb>,
		hub: Arc<dyn MetadataHub>,
		direction: SyncDirection,
		tags_only: bool,
	) -> Self {
		Self {
			base,
			core_db,
			hub,
			direction,
			tags_only,
		}
	}
}

#[async_trait]
impl Job<Error> for MetadataSyncTask {
	fn id(&self) -> JobId {
		self.base.id()
	}

	#[instrument(
		skip_all,
		fields(task_id = %self.base.id(), direction = ?self.direction, tags_only = self.tags_only),
		err
	)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		reporter: &JobReporter,
	) -> Result<ExecStatus, Error> {
		loop {
			check_interruption!(interrupter);

			let Some(item) = self.base.data().item_info() else {
				break;
			};

			check_interruption!(interrupter);

			let outcome = blocking({
				let core_db = Arc::clone(&self.core_db);
				let hub = Arc::clone(&self.hub);
				let (direction, tags_only) = (self.direction, self.tags_only);
				let item = item.clone();

				move || {
					if !hub.file_exists(&item.path) {
						return Err(NonCriticalError::MissingFile(item.path));
					}

					match direction {
						SyncDirection::WriteFromDatabaseToFile => {
							let metadata = core_db.read_metadata(item.id)?;
							hub.write_to_file(&item.path, &metadata, tags_only)?;
						}
						SyncDirection::ReadFromFileToDatabase => {
							let metadata = hub.load_from_file(&item.path)?;
							let metadata = if tags_only {
								metadata.tags_only()
							} else {
								metadata
							};
							core_db.write_metadata(item.id, &metadata, tags_only)?;
						}
					}

					Ok(None)
				}
			})
			.await?;

			if matches!(outcome, Err(NonCriticalError::MissingFile(_))) {
				debug!(path = %item.path.display(), "File is gone, asking for the item removal");
				self.base.observer().on_remove_pending(&item);
			}

			self.base.advance(ItemRef::Item(item.id), outcome);
			self.base
				.report(reporter, self.base.data().remaining_item_infos());
		}

		Ok(ExecStatus::Done)
	}
}
