use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::{
	backend::{CoreDb, Fingerprinter, ImageLoader, SimilarityDb},
	error::{Error, NonCriticalError},
	observer::ItemRef,
	types::Preview,
};

use super::{blocking, TaskBase};

/// Computes the similarity fingerprint of every pulled image id.
pub struct FingerprintsTask {
	base: TaskBase,
	core_db: Arc<dyn CoreDb>,
	similarity_db: Arc<dyn SimilarityDb>,
	loader: Arc<dyn ImageLoader>,
	fingerprinter: Arc<dyn Fingerprinter>,
	rebuild_all: bool,
	preview_size: u32,
}

impl FingerprintsTask {
	#[must_use]
	pub fn new(
		base: TaskBase,
		core_db: Arc<dyn CoreDb>,
		similarity_db: Arc<dyn SimilarityDb>,
		loader: Arc<dyn ImageLoader>,
		fingerprinter: Arc<dyn Fingerprinter>,
		rebuild_all: bool,
		preview_size: u32,
	) -> Self {
		Self {
			base,
			core_db,
			similarity_db,
			loader,
			fingerprinter,
			rebuild_all,
			preview_size,
		}
	}
}

#[async_trait]
impl Job<Error> for FingerprintsTask {
	fn id(&self) -> JobId {
		self.base.id()
	}

	#[instrument(skip_all, fields(task_id = %self.base.id(), rebuild_all = self.rebuild_all), err)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		reporter: &JobReporter,
	) -> Result<ExecStatus, Error> {
		loop {
			check_interruption!(interrupter);

			let Some(id) = self.base.data().image_id() else {
				break;
			};

			check_interruption!(interrupter);

			let outcome = blocking({
				let core_db = Arc::clone(&self.core_db);
				let similarity_db = Arc::clone(&self.similarity_db);
				let loader = Arc::clone(&self.loader);
				let fingerprinter = Arc::clone(&self.fingerprinter);
				let (rebuild_all, preview_size) = (self.rebuild_all, self.preview_size);

				move || {
					let info = core_db.item_info(id).ok_or_else(|| {
						NonCriticalError::Backend(format!("unknown item <id='{id}'>"))
					})?;

					let algorithm = fingerprinter.algorithm();

					if !rebuild_all && similarity_db.has_fingerprint(id, algorithm) {
						trace!(%id, "Fingerprint already computed, skipping");
						return Ok(None);
					}

					let image = loader.load(&info.path)?;
					let fingerprint = fingerprinter.fingerprint(&image)?;
					similarity_db.store_fingerprint(id, algorithm, &fingerprint)?;

					Ok(Some(Preview::from_image(&image, preview_size)))
				}
			})
			.await?;

			self.base.advance(ItemRef::Item(id), outcome);
			self.base
				.report(reporter, self.base.data().remaining_image_ids());
		}

		Ok(ExecStatus::Done)
	}
}
