use lumen_job_pool::{check_interruption, ExecStatus, Interrupter, Job, JobId, JobReporter};

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::{
	backend::{require, Backends, CoreDb, DatabaseHousekeeping, FaceDb, SimilarityDb, ThumbsDb},
	error::{Error, NonCriticalError},
	observer::ItemRef,
	types::{DatabaseKind, FingerprintAlgorithm, ItemId, JunkReport, ShrinkResult, ThumbnailId},
};

use super::{blocking, TaskBase};

const CORE_DB: &str = "core database";
const THUMBS_DB: &str = "thumbnails database";
const RECOGNITION_DB: &str = "recognition database";
const SIMILARITY_DB: &str = "similarity database";

/// What a [`DatabaseTask`] does with the databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseMode {
	/// Integrity check, vacuum and check again, database after database.
	ShrinkDatabases,
	/// Scans for stale entries without touching anything, the core database is always scanned.
	ComputeDatabaseJunk {
		thumbs_db: bool,
		faces_db: bool,
		similarity_db: bool,
	},
	CleanCoreDb,
	CleanThumbsDb,
	CleanRecognitionDb,
	CleanSimilarityDb,
}

impl DatabaseMode {
	/// Fails with the first database this mode needs but `backends` lacks.
	pub(crate) fn validate(self, backends: &Backends) -> Result<(), Error> {
		let (core, thumbs, faces, similarity) = match self {
			Self::ShrinkDatabases => (true, true, true, true),
			Self::ComputeDatabaseJunk {
				thumbs_db,
				faces_db,
				similarity_db,
			} => (true, thumbs_db, faces_db, similarity_db),
			Self::CleanCoreDb => (true, false, false, false),
			Self::CleanThumbsDb => (false, true, false, false),
			Self::CleanRecognitionDb => (false, false, true, false),
			Self::CleanSimilarityDb => (false, false, false, true),
		};

		if core {
			require(backends.core_db.as_ref(), CORE_DB)?;
		}
		if thumbs {
			require(backends.thumbs_db.as_ref(), THUMBS_DB)?;
		}
		if faces {
			require(backends.face_db.as_ref(), RECOGNITION_DB)?;
		}
		if similarity {
			require(backends.similarity_db.as_ref(), SIMILARITY_DB)?;
		}

		Ok(())
	}
}

/// Housekeeping over the databases, either shrinking them, scanning them for junk or cleaning
/// the junk found by a previous scan.
pub struct DatabaseTask {
	base: TaskBase,
	mode: DatabaseMode,
	backends: Backends,
}

fn shrink<D: DatabaseHousekeeping + ?Sized>(db: &D, database: DatabaseKind) -> ShrinkResult {
	if !db.integrity_check() {
		warn!(%database, "Integrity check failed, will not vacuum");
		return ShrinkResult {
			database,
			performed: false,
			success: false,
		};
	}

	db.vacuum();

	let success = db.integrity_check();
	if success {
		debug!(%database, "Finished vacuuming, integrity check afterwards was positive");
	} else {
		warn!(%database, "Integrity check failed after vacuum");
	}

	ShrinkResult {
		database,
		performed: true,
		success,
	}
}

/// Thumbnail ids still referenced by the core item `id`.
fn referenced_thumbnails(core: &dyn CoreDb, thumbs: &dyn ThumbsDb, id: ItemId) -> Vec<ThumbnailId> {
	let Some(info) = core.item_info(id) else {
		return Vec::new();
	};

	let mut referenced = Vec::new();

	if let Some(thumb_id) = thumbs.find_by_file_path(&info.path) {
		referenced.push(thumb_id);
	} else if let Some(thumb_id) = thumbs.find_by_hash(&info.unique_hash, info.file_size) {
		referenced.push(thumb_id);
	}

	referenced.extend(
		core.face_regions(id)
			.iter()
			.filter_map(|face| thumbs.find_by_custom_identifier(&face.custom_identifier(&info.path))),
	);

	referenced
}

impl DatabaseTask {
	#[must_use]
	pub fn new(base: TaskBase, mode: DatabaseMode, backends: Backends) -> Self {
		Self {
			base,
			mode,
			backends,
		}
	}

	fn core_db(&self) -> Result<Arc<dyn CoreDb>, Error> {
		require(self.backends.core_db.as_ref(), CORE_DB)
	}

	fn thumbs_db(&self) -> Result<Arc<dyn ThumbsDb>, Error> {
		require(self.backends.thumbs_db.as_ref(), THUMBS_DB)
	}

	fn face_db(&self) -> Result<Arc<dyn FaceDb>, Error> {
		require(self.backends.face_db.as_ref(), RECOGNITION_DB)
	}

	fn similarity_db(&self) -> Result<Arc<dyn SimilarityDb>, Error> {
		require(self.backends.similarity_db.as_ref(), SIMILARITY_DB)
	}

	fn report_shrink(&mut self, result: ShrinkResult) {
		self.base.observer().on_shrink_result(&result);

		let res = if result.success {
			Ok(None)
		} else {
			Err(NonCriticalError::Integrity(result.database))
		};

		self.base.advance(ItemRef::Database(result.database), res);
	}

	async fn shrink_databases(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let core = self.core_db()?;
		let thumbs = self.thumbs_db()?;
		let faces = self.face_db()?;
		let similarity = self.similarity_db()?;

		let result = blocking(move || Ok(shrink(core.as_ref(), DatabaseKind::Core))).await?;
		self.report_shrink(result.unwrap_or_else(|e| failed_shrink(DatabaseKind::Core, &e)));

		check_interruption!(interrupter);

		let result = blocking(move || {
			Ok(if thumbs.is_initialized() {
				shrink(thumbs.as_ref(), DatabaseKind::Thumbnails)
			} else {
				warn!("Thumbnails database is not initialized, will not vacuum");
				ShrinkResult {
					database: DatabaseKind::Thumbnails,
					performed: false,
					success: false,
				}
			})
		})
		.await?;
		self.report_shrink(result.unwrap_or_else(|e| failed_shrink(DatabaseKind::Thumbnails, &e)));

		check_interruption!(interrupter);

		let result = blocking(move || Ok(shrink(faces.as_ref(), DatabaseKind::Recognition))).await?;
		self.report_shrink(result.unwrap_or_else(|e| failed_shrink(DatabaseKind::Recognition, &e)));

		check_interruption!(interrupter);

		let result = blocking(move || {
			Ok(similarity
				.is_initialized()
				.then(|| shrink(similarity.as_ref(), DatabaseKind::Similarity)))
		})
		.await?;

		match result {
			Ok(Some(result)) => self.report_shrink(result),
			Ok(None) => debug!("Similarity database is not initialized, skipping it"),
			Err(e) => self.report_shrink(failed_shrink(DatabaseKind::Similarity, &e)),
		}

		Ok(ExecStatus::Done)
	}

	#[allow(clippy::too_many_lines)]
	async fn compute_junk(
		&mut self,
		interrupter: &Interrupter,
		scan_thumbs: bool,
		scan_faces: bool,
		scan_similarity: bool,
	) -> Result<ExecStatus, Error> {
		let core = self.core_db()?;
		let thumbs = if scan_thumbs { Some(self.thumbs_db()?) } else { None };
		let faces = if scan_faces { Some(self.face_db()?) } else { None };
		let similarity = if scan_similarity {
			Some(self.similarity_db()?)
		} else {
			None
		};

		let overview = blocking({
			let core = Arc::clone(&core);
			let thumbs = thumbs.clone();
			let faces = faces.clone();

			move || {
				let core_items = core.all_items();
				let obsolete = core.obsolete_item_ids();
				let thumbs_initialized = thumbs.as_ref().is_some_and(|db| db.is_initialized());
				let identities = faces
					.as_ref()
					.map(|db| (db.all_identities(), core.face_engine_uuids()));

				Ok((core_items, obsolete, thumbs_initialized, identities))
			}
		})
		.await?;

		let (core_items, stale_image_ids, thumbs_initialized, identities) = match overview {
			Ok(overview) => overview,
			Err(e) => {
				self.base.advance(ItemRef::Database(DatabaseKind::Core), Err(e));
				return Ok(ExecStatus::Done);
			}
		};

		let thumbs = thumbs.filter(|_| thumbs_initialized);

		// Every scan examines its entries one by one and then reports the database itself
		let mut additional = 0;
		if thumbs.is_some() {
			additional += core_items.len() + 1;
		}
		if let Some((identities, _)) = &identities {
			additional += identities.len() + 1;
		}
		if similarity.is_some() {
			additional += core_items.len() + 1;
		}

		if additional > 0 {
			self.base.observer().on_items_added(additional);
		}

		self.base.advance(ItemRef::Database(DatabaseKind::Core), Ok(None));

		let mut report = JunkReport {
			stale_image_ids,
			..Default::default()
		};

		if let Some(thumbs) = thumbs {
			let mut thumb_ids = blocking({
				let thumbs = Arc::clone(&thumbs);
				move || Ok(thumbs.find_all().into_iter().collect::<HashSet<_>>())
			})
			.await?
			.unwrap_or_default();

			for &id in &core_items {
				check_interruption!(interrupter);

				let res = blocking({
					let core = Arc::clone(&core);
					let thumbs = Arc::clone(&thumbs);
					move || Ok(referenced_thumbnails(core.as_ref(), thumbs.as_ref(), id))
				})
				.await?;

				let res = res.map(|referenced| {
					for thumb_id in referenced {
						thumb_ids.remove(&thumb_id);
					}
					None
				});

				self.base.advance(ItemRef::Item(id), res);
			}

			report.stale_thumbnail_ids = thumb_ids.into_iter().collect();
			report.stale_thumbnail_ids.sort_unstable();

			self.base
				.advance(ItemRef::Database(DatabaseKind::Thumbnails), Ok(None));
		}

		check_interruption!(interrupter);

		if let Some((identities, uuids)) = identities {
			for identity in identities {
				let stale = identity.uuid().is_some_and(|uuid| !uuids.contains(uuid));
				let id = identity.id;

				if stale {
					trace!(%id, "Identity is not referenced by any face tag");
					report.stale_identities.push(identity);
				}

				self.base.advance(ItemRef::Identity(id), Ok(None));
			}

			self.base
				.advance(ItemRef::Database(DatabaseKind::Recognition), Ok(None));
		}

		check_interruption!(interrupter);

		if let Some(similarity) = similarity {
			let mut registered = blocking(move || Ok(similarity.registered_image_ids()))
				.await?
				.unwrap_or_default();

			for &id in &core_items {
				registered.remove(&id);
				self.base.advance(ItemRef::Item(id), Ok(None));
			}

			report.stale_similarity_image_ids = registered.into_iter().collect();
			report.stale_similarity_image_ids.sort_unstable();

			self.base
				.advance(ItemRef::Database(DatabaseKind::Similarity), Ok(None));
		}

		debug!(
			stale_images = report.stale_image_ids.len(),
			stale_thumbnails = report.stale_thumbnail_ids.len(),
			stale_identities = report.stale_identities.len(),
			stale_similarity_images = report.stale_similarity_image_ids.len(),
			"Computed database junk"
		);

		self.base.observer().on_junk_data(&report);

		Ok(ExecStatus::Done)
	}

	async fn clean_core(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let core = self.core_db()?;

		loop {
			check_interruption!(interrupter);

			let Some(id) = self.base.data().image_id() else {
				break;
			};

			let res = blocking({
				let core = Arc::clone(&core);
				move || {
					core.delete_item(id)?;
					Ok(None)
				}
			})
			.await?;

			self.base.advance(ItemRef::Item(id), res);
		}

		Ok(ExecStatus::Done)
	}

	async fn clean_thumbs(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let thumbs = self.thumbs_db()?;

		let begun = blocking({
			let thumbs = Arc::clone(&thumbs);
			move || thumbs.begin_transaction().map_err(Into::into)
		})
		.await?;

		if let Err(e) = begun {
			warn!(?e, "Could not begin the transaction for the thumbnails removal");

			while let Some(id) = self.base.data().thumbnail_id() {
				self.base.advance(ItemRef::Thumbnail(id), Err(e.clone()));
			}

			return Ok(ExecStatus::Done);
		}

		let mut all_removed = true;
		let mut status = ExecStatus::Done;

		loop {
			if interrupter.is_canceled() {
				status = ExecStatus::Canceled;
				break;
			}

			let Some(id) = self.base.data().thumbnail_id() else {
				break;
			};

			let res = blocking({
				let thumbs = Arc::clone(&thumbs);
				move || {
					thumbs.remove(id)?;
					Ok(None)
				}
			})
			.await?;

			all_removed &= res.is_ok();
			self.base.advance(ItemRef::Thumbnail(id), res);
		}

		let commit = all_removed && status == ExecStatus::Done;

		let ended = blocking(move || {
			if commit {
				thumbs.commit_transaction()?;
			} else {
				thumbs.rollback_transaction()?;
			}
			Ok(())
		})
		.await?;

		match (ended, commit) {
			(Ok(()), true) => debug!("Committed the thumbnails removal"),
			(Ok(()), false) => warn!("Rolled back the thumbnails removal"),
			(Err(e), _) => warn!(?e, commit, "Could not end the thumbnails removal transaction"),
		}

		Ok(status)
	}

	async fn clean_recognition(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let faces = self.face_db()?;

		loop {
			check_interruption!(interrupter);

			let Some(identity) = self.base.data().identity() else {
				break;
			};

			let id = identity.id;
			let res = blocking({
				let faces = Arc::clone(&faces);
				move || {
					faces.delete_identity(&identity)?;
					Ok(None)
				}
			})
			.await?;

			self.base.advance(ItemRef::Identity(id), res);
		}

		Ok(ExecStatus::Done)
	}

	async fn clean_similarity(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		let similarity = self.similarity_db()?;

		loop {
			check_interruption!(interrupter);

			let Some(id) = self.base.data().similarity_image_id() else {
				break;
			};

			let res = blocking({
				let similarity = Arc::clone(&similarity);
				move || {
					similarity.remove_fingerprint(id, FingerprintAlgorithm::Haar)?;
					similarity.remove_fingerprint(id, FingerprintAlgorithm::TfIdf)?;
					Ok(None)
				}
			})
			.await?;

			self.base.advance(ItemRef::Item(id), res);
		}

		Ok(ExecStatus::Done)
	}
}

fn failed_shrink(database: DatabaseKind, e: &NonCriticalError) -> ShrinkResult {
	warn!(%database, ?e, "Shrinking database failed");

	ShrinkResult {
		database,
		performed: false,
		success: false,
	}
}

#[async_trait]
impl Job<Error> for DatabaseTask {
	fn id(&self) -> JobId {
		self.base.id()
	}

	#[instrument(skip_all, fields(task_id = %self.base.id(), mode = ?self.mode), err)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		_reporter: &JobReporter,
	) -> Result<ExecStatus, Error> {
		check_interruption!(interrupter);

		match self.mode {
			DatabaseMode::ShrinkDatabases => self.shrink_databases(interrupter).await,
			DatabaseMode::ComputeDatabaseJunk {
				thumbs_db,
				faces_db,
				similarity_db,
			} => {
				self.compute_junk(interrupter, thumbs_db, faces_db, similarity_db)
					.await
			}
			DatabaseMode::CleanCoreDb => self.clean_core(interrupter).await,
			DatabaseMode::CleanThumbsDb => self.clean_thumbs(interrupter).await,
			DatabaseMode::CleanRecognitionDb => self.clean_recognition(interrupter).await,
			DatabaseMode::CleanSimilarityDb => self.clean_similarity(interrupter).await,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::backend::memory::MemoryCoreDb;

	use super::*;

	#[test]
	fn failed_precheck_skips_vacuum() {
		let core = MemoryCoreDb::default();
		core.housekeeping().script_integrity_checks([false]);

		assert_eq!(
			shrink(&core, DatabaseKind::Core),
			ShrinkResult {
				database: DatabaseKind::Core,
				performed: false,
				success: false,
			}
		);
		assert_eq!(core.housekeeping().vacuum_count(), 0);
	}

	#[test]
	fn failed_postcheck_still_counts_as_performed() {
		let core = MemoryCoreDb::default();
		core.housekeeping().script_integrity_checks([true, false]);

		assert_eq!(
			shrink(&core, DatabaseKind::Core),
			ShrinkResult {
				database: DatabaseKind::Core,
				performed: true,
				success: false,
			}
		);
		assert_eq!(core.housekeeping().vacuum_count(), 1);
	}
}
