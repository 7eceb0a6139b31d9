use std::{
	cmp::Ordering,
	collections::BinaryHeap,
	future::Future,
	pin::pin,
	sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::{Mutex, MutexGuard};
use tokio::{runtime::Handle, sync::Notify};
use tracing::trace;

use super::job::Priority;

struct Queued {
	priority: Priority,
	seq: u64,
	fut: BoxFuture<'static, ()>,
}

impl Queued {
	const fn key(&self) -> (Priority, u64) {
		(self.priority, self.seq)
	}
}

impl PartialEq for Queued {
	fn eq(&self, other: &Self) -> bool {
		self.key() == other.key()
	}
}

impl Eq for Queued {}

impl PartialOrd for Queued {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Queued {
	// BinaryHeap pops the greatest element, so lower priority values and older submissions
	// have to compare as greater
	fn cmp(&self, other: &Self) -> Ordering {
		other.key().cmp(&self.key())
	}
}

struct QueueState {
	max_workers: usize,
	active: usize,
	queue: BinaryHeap<Queued>,
	next_seq: u64,
}

struct Inner {
	state: Mutex<QueueState>,
	drained: Notify,
	runtime: Handle,
}

/// Bounded executor for job bodies: at most `max_workers` submitted futures run at once, the
/// others wait in a priority queue.
pub(crate) struct WorkerPool {
	inner: Arc<Inner>,
}

impl WorkerPool {
	pub fn new(max_workers: usize, runtime: Handle) -> Self {
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(QueueState {
					max_workers: max_workers.max(1),
					active: 0,
					queue: BinaryHeap::new(),
					next_seq: 0,
				}),
				drained: Notify::new(),
				runtime,
			}),
		}
	}

	pub fn submit(&self, priority: Priority, fut: impl Future<Output = ()> + Send + 'static) {
		let mut state = self.inner.state.lock();

		let seq = state.next_seq;
		state.next_seq += 1;

		state.queue.push(Queued {
			priority,
			seq,
			fut: fut.boxed(),
		});

		Inner::launch_ready(&self.inner, state);
	}

	/// Only future slot launches are affected, running futures are never preempted.
	pub fn set_max_workers(&self, max_workers: usize) {
		let mut state = self.inner.state.lock();
		state.max_workers = max_workers.max(1);

		trace!(
			max_workers = state.max_workers,
			active = state.active,
			"Worker pool capacity changed"
		);

		Inner::launch_ready(&self.inner, state);
	}

	pub fn max_workers(&self) -> usize {
		self.inner.state.lock().max_workers
	}

	#[cfg(test)]
	pub fn active_count(&self) -> usize {
		self.inner.state.lock().active
	}

	#[cfg(test)]
	pub fn queued_count(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Waits until no slot is running and nothing is queued.
	pub async fn wait_for_done(&self) {
		loop {
			let mut notified = pin!(self.inner.drained.notified());
			notified.as_mut().enable();

			{
				let state = self.inner.state.lock();
				if state.active == 0 && state.queue.is_empty() {
					return;
				}
			}

			notified.await;
		}
	}
}

impl Inner {
	/// Takes as many queued futures as the capacity allows and spawns them once the lock is
	/// released, so a future dropped by a shutting down runtime can't deadlock on its guard.
	fn launch_ready(this: &Arc<Self>, mut state: MutexGuard<'_, QueueState>) {
		let mut ready = Vec::new();

		while state.active < state.max_workers {
			let Some(queued) = state.queue.pop() else {
				break;
			};

			state.active += 1;
			trace!(
				priority = queued.priority,
				seq = queued.seq,
				active = state.active,
				"Launching worker slot"
			);
			ready.push(queued.fut);
		}

		drop(state);

		for fut in ready {
			let guard = SlotGuard(Arc::clone(this));
			this.runtime.spawn(async move {
				// Moved in so the slot is released even if the future panics
				let _guard = guard;
				fut.await;
			});
		}
	}

	fn release_slot(this: &Arc<Self>) {
		let mut state = this.state.lock();
		state.active -= 1;

		if state.active == 0 && state.queue.is_empty() {
			drop(state);
			this.drained.notify_waiters();
		} else {
			Self::launch_ready(this, state);
		}
	}
}

struct SlotGuard(Arc<Inner>);

impl Drop for SlotGuard {
	fn drop(&mut self) {
		Inner::release_slot(&self.0);
	}
}
