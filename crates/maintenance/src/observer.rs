use std::path::PathBuf;

use async_channel as chan;
use serde::{Deserialize, Serialize};

use crate::{
	error::NonCriticalError,
	types::{
		BatchId, DatabaseKind, IdentityId, ItemId, ItemInfo, JunkReport, Preview, ShrinkResult,
		ThumbnailId,
	},
};

/// What a progress notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemRef {
	Path(PathBuf),
	Item(ItemId),
	Thumbnail(ThumbnailId),
	Identity(IdentityId),
	/// A whole database step of a database task.
	Database(DatabaseKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
	Succeeded { preview: Option<Preview> },
	Failed(NonCriticalError),
}

impl ItemOutcome {
	#[must_use]
	pub const fn is_success(&self) -> bool {
		matches!(self, Self::Succeeded { .. })
	}
}

impl From<Result<Option<Preview>, NonCriticalError>> for ItemOutcome {
	fn from(res: Result<Option<Preview>, NonCriticalError>) -> Self {
		match res {
			Ok(preview) => Self::Succeeded { preview },
			Err(e) => Self::Failed(e),
		}
	}
}

/// One processed work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
	pub item: ItemRef,
	pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
	Completed,
	/// The batch was canceled before every item got processed.
	StoppedEarly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
	pub batch_id: BatchId,
	pub status: BatchStatus,
	/// Items the batch expected to process, including the ones added while running.
	pub total: usize,
	pub succeeded: usize,
	pub failed: usize,
}

/// Progress sink of a maintenance batch.
///
/// Callbacks run synchronously on the worker that produced them, so they must return quickly.
pub trait MaintenanceObserver: Send + Sync + 'static {
	fn on_started(&self, _batch_id: BatchId, _total: usize) {}

	fn on_advance(&self, _advance: &Advance) {}

	fn on_items_added(&self, _count: usize) {}

	/// An item whose file vanished, so it should be removed from the collection.
	fn on_remove_pending(&self, _item: &ItemInfo) {}

	fn on_junk_data(&self, _report: &JunkReport) {}

	fn on_shrink_result(&self, _result: &ShrinkResult) {}

	/// Emitted exactly once per batch, after every task returned.
	fn on_completed(&self, _report: &BatchReport) {}
}

/// Observer ignoring everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MaintenanceObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceEvent {
	Started { batch_id: BatchId, total: usize },
	Advance(Advance),
	ItemsAdded(usize),
	RemovePending(ItemInfo),
	JunkData(JunkReport),
	ShrinkResult(ShrinkResult),
	Completed(BatchReport),
}

/// Forwards every notification to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
	tx: chan::Sender<MaintenanceEvent>,
}

impl ChannelObserver {
	#[must_use]
	pub fn new() -> (Self, chan::Receiver<MaintenanceEvent>) {
		let (tx, rx) = chan::unbounded();
		(Self { tx }, rx)
	}

	fn send(&self, event: MaintenanceEvent) {
		// A dropped receiver just means nobody listens anymore
		let _ = self.tx.try_send(event);
	}
}

impl MaintenanceObserver for ChannelObserver {
	fn on_started(&self, batch_id: BatchId, total: usize) {
		self.send(MaintenanceEvent::Started { batch_id, total });
	}

	fn on_advance(&self, advance: &Advance) {
		self.send(MaintenanceEvent::Advance(advance.clone()));
	}

	fn on_items_added(&self, count: usize) {
		self.send(MaintenanceEvent::ItemsAdded(count));
	}

	fn on_remove_pending(&self, item: &ItemInfo) {
		self.send(MaintenanceEvent::RemovePending(item.clone()));
	}

	fn on_junk_data(&self, report: &JunkReport) {
		self.send(MaintenanceEvent::JunkData(report.clone()));
	}

	fn on_shrink_result(&self, result: &ShrinkResult) {
		self.send(MaintenanceEvent::ShrinkResult(*result));
	}

	fn on_completed(&self, report: &BatchReport) {
		self.send(MaintenanceEvent::Completed(*report));
	}
}
