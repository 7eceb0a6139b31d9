use std::{
	collections::HashMap,
	mem,
	panic::AssertUnwindSafe,
	pin::pin,
	sync::Arc,
	time::{Duration, Instant},
};

use async_channel as chan;
use futures::FutureExt;
use lumen_utils::panic_message;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, instrument, trace, warn};

use super::{
	error::{PoolError, RunError},
	event::{EventBus, JobEventKind, PoolEvent},
	job::{
		interruption_pair, ExecStatus, Interrupter, IntoJob, Job, JobCollection,
		JobController, JobId, JobReporter, JobStatus, Priority,
	},
	worker_pool::WorkerPool,
};

struct TodoEntry<E: RunError> {
	job: Box<dyn Job<E>>,
	priority: Priority,
	seq: u64,
}

struct PendingEntry {
	priority: Priority,
	controller: JobController,
	dispatched_at: Instant,
}

/// A job the pool is done with, either reclaimed from its worker or force canceled.
///
/// A force canceled job may still be running when it lands here: its box and status only show up
/// once the worker hands it back.
#[derive(Debug)]
pub struct ProcessedJob<E: RunError> {
	job_id: JobId,
	priority: Priority,
	job: Option<Box<dyn Job<E>>>,
	status: Option<JobStatus<E>>,
	elapsed: Option<Duration>,
}

impl<E: RunError> ProcessedJob<E> {
	const fn force_canceled(job_id: JobId, priority: Priority) -> Self {
		Self {
			job_id,
			priority,
			job: None,
			status: None,
			elapsed: None,
		}
	}

	#[must_use]
	pub const fn job_id(&self) -> JobId {
		self.job_id
	}

	#[must_use]
	pub const fn priority(&self) -> Priority {
		self.priority
	}

	#[must_use]
	pub fn status(&self) -> Option<&JobStatus<E>> {
		self.status.as_ref()
	}

	/// Time between the job being dispatched and its worker handing it back.
	#[must_use]
	pub const fn elapsed(&self) -> Option<Duration> {
		self.elapsed
	}

	/// Recovers the concrete job type, `None` if the job isn't back yet or has another type.
	#[must_use]
	pub fn downcast_job<T: Job<E>>(self) -> Option<Box<T>> {
		self.job.and_then(|job| job.downcast::<T>().ok())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
	pub todo: usize,
	pub pending: usize,
	pub processed: usize,
}

struct PoolState<E: RunError> {
	todo: Vec<TodoEntry<E>>,
	pending: HashMap<JobId, PendingEntry>,
	processed: HashMap<JobId, ProcessedJob<E>>,
	running: bool,
	coordinator_alive: bool,
	is_shutdown: bool,
	next_seq: u64,
}

impl<E: RunError> Default for PoolState<E> {
	fn default() -> Self {
		Self {
			todo: Vec::new(),
			pending: HashMap::new(),
			processed: HashMap::new(),
			running: false,
			coordinator_alive: false,
			is_shutdown: false,
			next_seq: 0,
		}
	}
}

struct Shared<E: RunError> {
	state: Mutex<PoolState<E>>,
	wake: Notify,
	stopped: Notify,
	events: EventBus,
	workers: WorkerPool,
	runtime: Handle,
}

impl<E: RunError> Shared<E> {
	async fn coordinate(self: Arc<Self>) {
		trace!("Coordinator started");

		loop {
			let mut woken = pin!(self.wake.notified());
			woken.as_mut().enable();

			{
				let mut state = self.state.lock();

				if !state.running {
					state.coordinator_alive = false;
					trace!("Coordinator stopping, nothing left to dispatch");
					self.events.emit(PoolEvent::Finished);
					drop(state);

					self.stopped.notify_waiters();
					return;
				}

				if !state.todo.is_empty() {
					let mut todo = mem::take(&mut state.todo);
					todo.sort_by_key(|entry| (entry.priority, entry.seq));

					for entry in todo {
						self.dispatch(&mut state, entry);
					}

					continue;
				}
			}

			woken.await;
		}
	}

	fn dispatch(self: &Arc<Self>, state: &mut PoolState<E>, entry: TodoEntry<E>) {
		let TodoEntry { job, priority, .. } = entry;
		let job_id = job.id();
		let (controller, interrupter) = interruption_pair(job_id);

		trace!(%job_id, priority, "Dispatching job: todo -> pending");

		state.pending.insert(
			job_id,
			PendingEntry {
				priority,
				controller,
				dispatched_at: Instant::now(),
			},
		);

		self.workers
			.submit(priority, Arc::clone(self).execute(job, interrupter));
	}

	async fn execute(self: Arc<Self>, mut job: Box<dyn Job<E>>, interrupter: Interrupter) {
		let job_id = job.id();

		// Checked under the pool lock so a concurrent cancel either wins here or finds the job running
		let should_run = {
			let _state = self.state.lock();
			!interrupter.is_canceled()
		};

		let status = if should_run {
			self.events.emit_job(job_id, JobEventKind::Started);
			let reporter = JobReporter::new(job_id, self.events.clone());

			match AssertUnwindSafe(job.run(&interrupter, &reporter))
				.catch_unwind()
				.await
			{
				Ok(Ok(ExecStatus::Done)) => JobStatus::Done,
				Ok(Ok(ExecStatus::Canceled)) => JobStatus::Canceled,
				Ok(Err(e)) => {
					warn!(%job_id, ?e, "Job failed");
					JobStatus::Error(e)
				}
				Err(payload) => {
					let msg = panic_message(&*payload);
					error!(%job_id, %msg, "Job panicked");
					JobStatus::Panicked(msg)
				}
			}
		} else {
			trace!(%job_id, "Job canceled before a worker entered it, skipping its body");
			JobStatus::Canceled
		};

		self.reclaim(job, status);
	}

	fn reclaim(&self, job: Box<dyn Job<E>>, status: JobStatus<E>) {
		let job_id = job.id();
		let outcome = status.outcome();

		let mut state = self.state.lock();

		if let Some(PendingEntry {
			priority,
			dispatched_at,
			..
		}) = state.pending.remove(&job_id)
		{
			trace!(%job_id, ?outcome, "Reclaiming job: pending -> processed");
			state.processed.insert(
				job_id,
				ProcessedJob {
					job_id,
					priority,
					job: Some(job),
					status: Some(status),
					elapsed: Some(dispatched_at.elapsed()),
				},
			);
		} else if let Some(processed) = state.processed.get_mut(&job_id) {
			trace!(%job_id, ?outcome, "Force canceled job returned from its worker");
			processed.job = Some(job);
			processed.status = Some(status);
		} else {
			debug!(%job_id, "Job returned after its bookkeeping was dropped");
		}

		self.events.emit_job(job_id, JobEventKind::Done(outcome));

		if state.running && state.pending.is_empty() && state.todo.is_empty() {
			state.running = false;
			drop(state);

			self.wake.notify_one();
		}
	}
}

/// The job pool manager.
///
/// Jobs appended to the pool wait in `todo` until the coordinator task moves them to `pending`
/// and submits them to a bounded worker pool, ordered by priority. A worker hands every job back
/// once its body returns, moving it to `processed`. All three collections live under one lock and
/// a job is always in exactly one of them, until [`JobPool::take_processed`] hands it back to the
/// caller or the pool drops it on shutdown.
pub struct JobPool<E: RunError> {
	shared: Arc<Shared<E>>,
	coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl<E: RunError> JobPool<E> {
	/// Must be called from within a tokio runtime, which will host the coordinator and the workers.
	pub fn new(max_workers: usize) -> Result<Self, PoolError> {
		let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

		Ok(Self {
			shared: Arc::new(Shared {
				state: Mutex::new(PoolState::default()),
				wake: Notify::new(),
				stopped: Notify::new(),
				events: EventBus::default(),
				workers: WorkerPool::new(max_workers, runtime.clone()),
				runtime,
			}),
			coordinator: Mutex::new(None),
		})
	}

	/// A pool with one worker per available CPU core.
	pub fn with_default_workers() -> Result<Self, PoolError> {
		Self::new(lumen_utils::available_parallelism())
	}

	/// Every subscriber receives every event emitted after it subscribed.
	pub fn subscribe(&self) -> chan::Receiver<PoolEvent> {
		self.shared.events.subscribe()
	}

	/// Adds the jobs to `todo` and wakes the coordinator, never waiting on any job.
	#[instrument(skip_all, fields(count = jobs.len()))]
	pub fn append_jobs(&self, jobs: JobCollection<E>) -> Result<(), PoolError> {
		let mut state = self.shared.state.lock();

		if state.is_shutdown {
			return Err(PoolError::Shutdown);
		}

		if jobs.is_empty() {
			trace!("No jobs to append");
			return Ok(());
		}

		for (job, priority) in jobs {
			let seq = state.next_seq;
			state.next_seq += 1;

			trace!(job_id = %job.id(), priority, "Job added to todo");
			state.todo.push(TodoEntry { job, priority, seq });
		}

		state.running = true;

		if !state.coordinator_alive {
			state.coordinator_alive = true;
			let handle = self
				.shared
				.runtime
				.spawn(Arc::clone(&self.shared).coordinate());
			*self.coordinator.lock() = Some(handle);
		}

		drop(state);

		self.shared.wake.notify_one();

		Ok(())
	}

	pub fn append_job(&self, job: impl IntoJob<E>, priority: Priority) -> Result<(), PoolError> {
		self.append_jobs(vec![(job.into_job(), priority)])
	}

	/// Only future dispatches are limited by the new capacity, running jobs are left alone.
	pub fn set_max_workers(&self, max_workers: usize) {
		self.shared.workers.set_max_workers(max_workers);
	}

	#[must_use]
	pub fn max_workers(&self) -> usize {
		self.shared.workers.max_workers()
	}

	/// Drops every job still in `todo` and asks every pending job to stop, moving it straight to
	/// `processed` without waiting for its worker. No job body starts after this returns.
	#[instrument(skip(self))]
	pub fn cancel(&self, is_hard_cancel: bool) {
		let mut state = self.shared.state.lock();

		if is_hard_cancel {
			info!(
				todo = state.todo.len(),
				pending = state.pending.len(),
				"Canceling every job in the pool"
			);
		} else {
			debug!(
				todo = state.todo.len(),
				pending = state.pending.len(),
				"Canceling every job in the pool"
			);
		}

		state.todo.clear();

		for (job_id, PendingEntry { priority, controller, .. }) in mem::take(&mut state.pending) {
			controller.cancel();
			state
				.processed
				.insert(job_id, ProcessedJob::force_canceled(job_id, priority));
		}

		state.running = false;
		drop(state);

		self.shared.wake.notify_one();
	}

	/// True when no job is pending.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.shared.state.lock().pending.is_empty()
	}

	/// True while the coordinator is alive.
	#[must_use]
	pub fn is_running(&self) -> bool {
		self.shared.state.lock().coordinator_alive
	}

	#[must_use]
	pub fn counts(&self) -> PoolCounts {
		let state = self.shared.state.lock();

		PoolCounts {
			todo: state.todo.len(),
			pending: state.pending.len(),
			processed: state.processed.len(),
		}
	}

	/// Remote handle of a pending job.
	#[must_use]
	pub fn controller(&self, job_id: JobId) -> Option<JobController> {
		self.shared
			.state
			.lock()
			.pending
			.get(&job_id)
			.map(|entry| entry.controller.clone())
	}

	#[must_use]
	pub fn processed_ids(&self) -> Vec<JobId> {
		self.shared.state.lock().processed.keys().copied().collect()
	}

	/// Hands back every processed job whose worker already returned it. Force canceled jobs still
	/// running stay in `processed`.
	pub fn take_processed(&self) -> Vec<ProcessedJob<E>> {
		let mut state = self.shared.state.lock();

		let (returned, in_flight) = mem::take(&mut state.processed)
			.into_iter()
			.partition::<HashMap<_, _>, _>(|(_, processed)| processed.job.is_some());

		state.processed = in_flight;

		returned.into_values().collect()
	}

	/// Waits until the coordinator stopped and every worker slot returned.
	pub async fn wait_for_done(&self) {
		loop {
			let mut stopped = pin!(self.shared.stopped.notified());
			stopped.as_mut().enable();

			if !self.shared.state.lock().coordinator_alive {
				break;
			}

			stopped.await;
		}

		self.shared.workers.wait_for_done().await;
	}

	/// Cancels outstanding work, joins the coordinator, waits for every in-flight job body to
	/// return and then drops all processed jobs. Appending jobs afterwards fails.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		{
			let mut state = self.shared.state.lock();
			if state.is_shutdown {
				warn!("Trying to shutdown a job pool that was already shutdown");
				return;
			}
			state.is_shutdown = true;
		}

		self.cancel(false);

		let maybe_handle = self.coordinator.lock().take();
		if let Some(handle) = maybe_handle {
			if let Err(e) = handle.await {
				error!(?e, "Job pool coordinator failed on shutdown");
			}
		}

		self.shared.workers.wait_for_done().await;

		let processed = mem::take(&mut self.shared.state.lock().processed);
		debug!(count = processed.len(), "Job pool shutdown, dropping processed jobs");
	}
}

impl<E: RunError> Drop for JobPool<E> {
	fn drop(&mut self) {
		let has_outstanding_jobs = {
			let state = self.shared.state.lock();
			!state.is_shutdown && (!state.todo.is_empty() || !state.pending.is_empty())
		};

		if has_outstanding_jobs {
			warn!("Job pool dropped without shutdown, canceling outstanding jobs");
			self.cancel(false);
		}
	}
}
