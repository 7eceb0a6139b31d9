use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::{
	backend::{ImageLoader, ThumbnailStore},
	error::Error,
	observer::ItemRef,
	types::Preview,
};

use super::{blocking, TaskBase};

/// Builds and persists the thumbnail of every pulled image path.
pub struct ThumbsTask {
	base: TaskBase,
	loader: Arc<dyn ImageLoader>,
	store: Arc<dyn ThumbnailStore>,
	thumbnail_size: u32,
	preview_size: u32,
}

impl ThumbsTask {
	#[must_use]
	pub fn new(
		base: TaskBase,
		loader: Arc<dyn ImageLoader>,
		store: Arc<dyn ThumbnailStore>,
		thumbnail_size: u32,
		preview_size: u32,
	) -> Self {
		Self {
			base,
			loader,
			store,
			thumbnail_size,
			preview_size,
		}
	}
}

#[async_trait]
impl Job<Error> for ThumbsTask {
	fn id(&self) -> JobId {
		self.base.id()
	}

	#[instrument(skip_all, fields(task_id = %self.base.id()), err)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		reporter: &JobReporter,
	) -> Result<ExecStatus, Error> {
		loop {
			check_interruption!(interrupter);

			let Some(path) = self.base.data().image_path() else {
				break;
			};

			check_interruption!(interrupter);

			let outcome = blocking({
				let path = path.clone();
				let loader = Arc::clone(&self.loader);
				let store = Arc::clone(&self.store);
				let (thumbnail_size, preview_size) = (self.thumbnail_size, self.preview_size);

				move || {
					let image = loader.load(&path)?;
					let thumbnail = store.store(&path, &image, thumbnail_size)?;

					Ok(Some(Preview::from_image(&thumbnail, preview_size)))
				}
			})
			.await?;

			trace!(path = %path.display(), success = outcome.is_ok(), "Processed thumbnail");

			self.base.advance(ItemRef::Path(path), outcome);
			self.base
				.report(reporter, self.base.data().remaining_image_paths());
		}

		Ok(ExecStatus::Done)
	}
}
