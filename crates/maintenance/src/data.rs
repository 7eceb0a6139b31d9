use std::{collections::VecDeque, path::PathBuf};

use parking_lot::Mutex;

use crate::types::{Identity, ItemId, ItemInfo, ThumbnailId};

/// FIFO supply of one kind of work item, every item popped exactly once.
#[derive(Debug)]
struct WorkQueue<T>(Mutex<VecDeque<T>>);

impl<T> Default for WorkQueue<T> {
	fn default() -> Self {
		Self(Mutex::new(VecDeque::new()))
	}
}

impl<T> WorkQueue<T> {
	fn load(&self, items: impl IntoIterator<Item = T>) {
		let mut queue = self.0.lock();
		queue.clear();
		queue.extend(items);
	}

	fn pop(&self) -> Option<T> {
		self.0.lock().pop_front()
	}

	fn pop_many(&self, count: usize) -> Vec<T> {
		let mut queue = self.0.lock();
		let count = count.min(queue.len());
		queue.drain(..count).collect()
	}

	fn len(&self) -> usize {
		self.0.lock().len()
	}
}

/// Work items shared by every task of a maintenance batch.
///
/// Each `set_*` is meant to be called once, before the tasks start pulling. Each getter pops the
/// next item of its kind, or returns `None` once that kind is exhausted, and keeps returning
/// `None` on every later call.
#[derive(Debug, Default)]
pub struct MaintenanceData {
	image_paths: WorkQueue<PathBuf>,
	image_ids: WorkQueue<ItemId>,
	item_infos: WorkQueue<ItemInfo>,
	thumbnail_ids: WorkQueue<ThumbnailId>,
	identities: WorkQueue<Identity>,
	similarity_image_ids: WorkQueue<ItemId>,
}

impl MaintenanceData {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_image_paths(&self, paths: impl IntoIterator<Item = PathBuf>) {
		self.image_paths.load(paths);
	}

	pub fn image_path(&self) -> Option<PathBuf> {
		self.image_paths.pop()
	}

	/// Pops up to `count` paths at once, an empty batch meaning the paths are exhausted.
	pub fn image_paths_batch(&self, count: usize) -> Vec<PathBuf> {
		self.image_paths.pop_many(count)
	}

	#[must_use]
	pub fn remaining_image_paths(&self) -> usize {
		self.image_paths.len()
	}

	pub fn set_image_ids(&self, ids: impl IntoIterator<Item = ItemId>) {
		self.image_ids.load(ids);
	}

	pub fn image_id(&self) -> Option<ItemId> {
		self.image_ids.pop()
	}

	#[must_use]
	pub fn remaining_image_ids(&self) -> usize {
		self.image_ids.len()
	}

	pub fn set_item_infos(&self, infos: impl IntoIterator<Item = ItemInfo>) {
		self.item_infos.load(infos);
	}

	pub fn item_info(&self) -> Option<ItemInfo> {
		self.item_infos.pop()
	}

	#[must_use]
	pub fn remaining_item_infos(&self) -> usize {
		self.item_infos.len()
	}

	pub fn set_thumbnail_ids(&self, ids: impl IntoIterator<Item = ThumbnailId>) {
		self.thumbnail_ids.load(ids);
	}

	pub fn thumbnail_id(&self) -> Option<ThumbnailId> {
		self.thumbnail_ids.pop()
	}

	#[must_use]
	pub fn remaining_thumbnail_ids(&self) -> usize {
		self.thumbnail_ids.len()
	}

	pub fn set_identities(&self, identities: impl IntoIterator<Item = Identity>) {
		self.identities.load(identities);
	}

	pub fn identity(&self) -> Option<Identity> {
		self.identities.pop()
	}

	#[must_use]
	pub fn remaining_identities(&self) -> usize {
		self.identities.len()
	}

	pub fn set_similarity_image_ids(&self, ids: impl IntoIterator<Item = ItemId>) {
		self.similarity_image_ids.load(ids);
	}

	pub fn similarity_image_id(&self) -> Option<ItemId> {
		self.similarity_image_ids.pop()
	}

	#[must_use]
	pub fn remaining_similarity_image_ids(&self) -> usize {
		self.similarity_image_ids.len()
	}
}
