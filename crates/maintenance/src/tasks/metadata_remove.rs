use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::{backend::MetadataHub, error::Error, observer::ItemRef, types::RemoveAction};

use super::{blocking, TaskBase};

/// Strips one kind of metadata from the files of every pulled item.
pub struct MetadataRemoveTask {
	base: TaskBase,
	hub: Arc<dyn MetadataHub>,
	action: RemoveAction,
}

impl MetadataRemoveTask {
	#[must_use]
	pub fn new(base: TaskBase, hub: Arc<dyn MetadataHub>, action: RemoveAction) -> Self {
		Self { base, hub, action }
	}
}

#[async_trait]
impl Job<Error> for MetadataRemoveTask {
	fn id(&self) -> JobId {
		self.base.id()
	}

	#[instrument(skip_all, fields(task_id = %self.base.id(), action = ?self.action), err)]
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

			let id = item.id;
			let outcome = blocking({
				let hub = Arc::clone(&self.hub);
				let action = self.action;

				move || {
					hub.remove(&item, action)?;
					Ok(None)
				}
			})
			.await?;

			self.base.advance(ItemRef::Item(id), outcome);
			self.base
				.report(reporter, self.base.data().remaining_item_infos());
		}

		Ok(ExecStatus::Done)
	}
}
