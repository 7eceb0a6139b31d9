use std::sync::Arc;

use async_channel as chan;
use parking_lot::Mutex;

use super::job::{JobId, JobOutcome};

/// Progress a running job may report, either as a percentage or as a count of work units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
	Percent(u8),
	Count { completed: u64, total: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEventKind {
	/// The job body was entered by a worker.
	Started,
	Progress(Progress),
	/// Emitted exactly once per dispatched job, whatever way it ended.
	Done(JobOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
	pub job_id: JobId,
	pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
	Job(JobEvent),
	/// The coordinator stopped because no job is waiting or pending anymore, or the pool was
	/// canceled. Every `Done` emitted before the coordinator stopped precedes this event.
	Finished,
}

/// Fan-out of pool events to every subscriber, each one getting its own unbounded channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventBus {
	subscribers: Arc<Mutex<Vec<chan::Sender<PoolEvent>>>>,
}

impl EventBus {
	pub fn subscribe(&self) -> chan::Receiver<PoolEvent> {
		let (tx, rx) = chan::unbounded();
		self.subscribers.lock().push(tx);
		rx
	}

	pub fn emit(&self, event: PoolEvent) {
		// Closed subscribers are dropped on the way
		self.subscribers
			.lock()
			.retain(|tx| tx.try_send(event.clone()).is_ok());
	}

	pub fn emit_job(&self, job_id: JobId, kind: JobEventKind) {
		self.emit(PoolEvent::Job(JobEvent { job_id, kind }));
	}
}
