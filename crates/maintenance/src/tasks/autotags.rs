use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use image::DynamicImage;
use tracing::{instrument, trace, warn};

use crate::{
	backend::{CoreDb, ImageLoader, TagModel},
	error::{BackendError, Error, NonCriticalError},
	observer::ItemRef,
	types::{AutotagModel, Preview},
};

use super::{blocking, TaskBase};

const BASE_LANGUAGE: &str = "en";

type ItemResult = Result<Option<Preview>, NonCriticalError>;

/// Assigns inferred tags to every pulled image, running the model once per micro-batch of paths.
pub struct AutotagsTask {
	base: TaskBase,
	core_db: Arc<dyn CoreDb>,
	loader: Arc<dyn ImageLoader>,
	tag_model: Arc<dyn TagModel>,
	model: AutotagModel,
	languages: Arc<[String]>,
	batch_size: usize,
	preview_size: u32,
}

impl AutotagsTask {
	#[must_use]
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		base: TaskBase,
		core_db: Arc<dyn CoreDb>,
		loader: Arc<dyn ImageLoader>,
		tag_model: Arc<dyn TagModel>,
		model: AutotagModel,
		languages: Arc<[String]>,
		batch_size: usize,
		preview_size: u32,
	) -> Self {
		Self {
			base,
			core_db,
			loader,
			tag_model,
			model,
			languages,
			batch_size: batch_size.max(1),
			preview_size,
		}
	}
}

/// Tags in the base language followed by their translations, without duplicates.
fn localized_tags(
	tag_model: &dyn TagModel,
	tags: Vec<String>,
	languages: &[String],
) -> Result<Vec<String>, BackendError> {
	let mut localized = tags.clone();

	for language in languages.iter().filter(|lang| *lang != BASE_LANGUAGE) {
		for tag in &tags {
			let translated = tag_model.translate(tag, language)?;
			if !localized.contains(&translated) {
				localized.push(translated);
			}
		}
	}

	Ok(localized)
}

#[allow(clippy::needless_pass_by_value)]
fn tag_batch(
	paths: Vec<PathBuf>,
	core_db: Arc<dyn CoreDb>,
	loader: Arc<dyn ImageLoader>,
	tag_model: Arc<dyn TagModel>,
	model: AutotagModel,
	languages: Arc<[String]>,
	preview_size: u32,
) -> Vec<ItemResult> {
	let mut results = Vec::with_capacity(paths.len());
	let mut loaded = Vec::with_capacity(paths.len());
	let mut images = Vec::<DynamicImage>::with_capacity(paths.len());

	for (idx, path) in paths.iter().enumerate() {
		match loader.load(path) {
			Ok(image) => {
				loaded.push(idx);
				images.push(image);
				results.push(Ok(None));
			}
			Err(e) => results.push(Err(e.into())),
		}
	}

	if images.is_empty() {
		return results;
	}

	let inferred = match tag_model.infer(model, &images) {
		Ok(inferred) if inferred.len() == images.len() => inferred,
		Ok(inferred) => {
			let e = NonCriticalError::Inference(format!(
				"model returned {} tag lists for {} images",
				inferred.len(),
				images.len()
			));
			for idx in loaded {
				results[idx] = Err(e.clone());
			}
			return results;
		}
		Err(e) => {
			let e = match e {
				BackendError::Aborted => NonCriticalError::Aborted,
				e => NonCriticalError::Inference(e.to_string()),
			};
			warn!(?e, count = images.len(), "Tag inference failed for a whole batch");
			for idx in loaded {
				results[idx] = Err(e.clone());
			}
			return results;
		}
	};

	for ((idx, image), tags) in loaded.into_iter().zip(&images).zip(inferred) {
		let path = &paths[idx];

		results[idx] = localized_tags(tag_model.as_ref(), tags, &languages)
			.map_err(NonCriticalError::from)
			.and_then(|tags| {
				let item = core_db.item_by_path(path).ok_or_else(|| {
					NonCriticalError::Backend(format!(
						"no item for <path='{}'>",
						path.display()
					))
				})?;

				trace!(id = item.id, ?tags, "Assigning inferred tags");
				core_db.assign_tags(item.id, &tags)?;

				Ok(Some(Preview::from_image(image, preview_size)))
			});
	}

	results
}

#[async_trait]
impl Job<Error> for AutotagsTask {
	fn id(&self) -> JobId {
		self.base.id()
	}

	#[instrument(skip_all, fields(task_id = %self.base.id(), model = ?self.model), err)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		reporter: &JobReporter,
	) -> Result<ExecStatus, Error> {
		loop {
			check_interruption!(interrupter);

			let paths = self.base.data().image_paths_batch(self.batch_size);
			if paths.is_empty() {
				break;
			}

			check_interruption!(interrupter);

			let results = blocking({
				let paths = paths.clone();
				let core_db = Arc::clone(&self.core_db);
				let loader = Arc::clone(&self.loader);
				let tag_model = Arc::clone(&self.tag_model);
				let languages = Arc::clone(&self.languages);
				let (model, preview_size) = (self.model, self.preview_size);

				move || {
					Ok(tag_batch(
						paths,
						core_db,
						loader,
						tag_model,
						model,
						languages,
						preview_size,
					))
				}
			})
			.await?;

			match results {
				Ok(results) => {
					for (path, res) in paths.into_iter().zip(results) {
						self.base.advance(ItemRef::Path(path), res);
					}
				}
				// A panic takes the whole micro-batch with it
				Err(e) => {
					for path in paths {
						self.base.advance(ItemRef::Path(path), Err(e.clone()));
					}
				}
			}

			self.base
				.report(reporter, self.base.data().remaining_image_paths());
		}

		Ok(ExecStatus::Done)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Translator;

	impl TagModel for Translator {
		fn infer(
			&self,
			_model: AutotagModel,
			images: &[DynamicImage],
		) -> Result<Vec<Vec<String>>, BackendError> {
			Ok(vec![Vec::new(); images.len()])
		}

		fn translate(&self, tag: &str, language: &str) -> Result<String, BackendError> {
			Ok(format!("{tag}@{language}"))
		}
	}

	#[test]
	fn base_language_is_never_translated() {
		let tags = localized_tags(
			&Translator,
			vec!["cat".to_string(), "sofa".to_string()],
			&["en".to_string(), "fr".to_string()],
		)
		.unwrap();

		assert_eq!(tags, ["cat", "sofa", "cat@fr", "sofa@fr"]);
	}
}
