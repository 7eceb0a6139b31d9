use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::{
	backend::{CoreDb, ImageLoader, QualityScorer},
	error::{Error, NonCriticalError},
	observer::ItemRef,
	settings::QualitySettings,
	types::Preview,
};

use super::{blocking, TaskBase};

/// Scores every pulled image and turns the score into a pick label.
pub struct ImageQualityTask {
	base: TaskBase,
	core_db: Arc<dyn CoreDb>,
	loader: Arc<dyn ImageLoader>,
	scorer: Arc<dyn QualityScorer>,
	quality: QualitySettings,
	preview_size: u32,
}

impl ImageQualityTask {
	#[must_use]
	pub fn new(
		base: TaskBase,
		core_db: Arc<dyn CoreDb>,
		loader: Arc<dyn ImageLoader>,
		scorer: Arc<dyn QualityScorer>,
		quality: QualitySettings,
		preview_size: u32,
	) -> Self {
		Self {
			base,
			core_db,
			loader,
			scorer,
			quality,
			preview_size,
		}
	}
}

#[async_trait]
impl Job<Error> for ImageQualityTask {
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
				let core_db = Arc::clone(&self.core_db);
				let loader = Arc::clone(&self.loader);
				let scorer = Arc::clone(&self.scorer);
				let (quality, preview_size) = (self.quality, self.preview_size);

				move || {
					let image = loader.load(&path)?;
					let score = scorer.score(&image, &quality)?;
					let label = quality.pick_label(score);

					let item = core_db.item_by_path(&path).ok_or_else(|| {
						NonCriticalError::Backend(format!("no item for <path='{}'>", path.display()))
					})?;

					trace!(id = item.id, score, ?label, "Scored image quality");
					core_db.set_pick_label(item.id, label)?;

					Ok(Some(Preview::from_image(&image, preview_size)))
				}
			})
			.await?;

			self.base.advance(ItemRef::Path(path), outcome);
			self.base
				.report(reporter, self.base.data().remaining_image_paths());
		}

		Ok(ExecStatus::Done)
	}
}
