use std::{
	fmt,
	future::{Future, IntoFuture},
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use async_channel as chan;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use tracing::trace;
use uuid::Uuid;

use super::{
	error::RunError,
	event::{EventBus, JobEventKind, Progress},
};

/// A unique identifier for a job using the [`uuid`](https://docs.rs/uuid) crate.
pub type JobId = Uuid;

/// Scheduling priority of a job, lower values are dispatched first.
pub type Priority = i32;

/// A batch of jobs handed over to the pool, each one with its own priority.
pub type JobCollection<E> = Vec<(Box<dyn Job<E>>, Priority)>;

/// What a [`Job::run`] call tells the pool about how its body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	Canceled,
}

/// Final status of a job, kept by the pool next to the job itself once it is processed.
#[derive(Debug)]
pub enum JobStatus<E: RunError> {
	Done,
	/// Canceled while running, or before a worker ever entered its body.
	Canceled,
	Error(E),
	Panicked(String),
}

impl<E: RunError> JobStatus<E> {
	#[must_use]
	pub fn outcome(&self) -> JobOutcome {
		match self {
			Self::Done => JobOutcome::Done,
			Self::Canceled => JobOutcome::Canceled,
			Self::Error(e) => JobOutcome::Failed(e.to_string()),
			Self::Panicked(msg) => JobOutcome::Panicked(msg.clone()),
		}
	}
}

/// Cloneable summary of a [`JobStatus`], carried by pool events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
	Done,
	Canceled,
	Failed(String),
	Panicked(String),
}

/// The trait every unit of work dispatched to a [`JobPool`](crate::JobPool) implements.
///
/// A job is run at most once, by exactly one worker. Its body must poll the [`Interrupter`]
/// between work units and leave promptly once a cancellation is observed. The pool emits the
/// `Started` and `Done` notifications on the job's behalf, the body only reports progress.
#[async_trait]
pub trait Job<E: RunError>: Downcast + Send + Sync + 'static {
	fn id(&self) -> JobId;

	async fn run(
		&mut self,
		interrupter: &Interrupter,
		reporter: &JobReporter,
	) -> Result<ExecStatus, E>;
}

impl_downcast!(Job<E> where E: RunError);

impl<E: RunError> fmt::Debug for Box<dyn Job<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Job id='{}'>", self.id())
	}
}

/// A helper trait to box any [`Job<E>`] into a [`Box<dyn Job<E>>`].
pub trait IntoJob<E>: Send {
	fn into_job(self) -> Box<dyn Job<E>>;
}

impl<T: Job<E> + 'static, E: RunError> IntoJob<E> for T {
	fn into_job(self) -> Box<dyn Job<E>> {
		Box::new(self)
	}
}

#[derive(Debug)]
pub(crate) struct JobWorktable {
	canceled: AtomicBool,
	cancel_tx: chan::Sender<()>,
}

impl JobWorktable {
	pub fn new(cancel_tx: chan::Sender<()>) -> Self {
		Self {
			canceled: AtomicBool::new(false),
			cancel_tx,
		}
	}

	pub fn is_canceled(&self) -> bool {
		self.canceled.load(Ordering::Acquire)
	}

	/// Flips the cancellation flag, only the first call has any effect.
	pub fn cancel(&self) -> bool {
		if self.canceled.swap(true, Ordering::AcqRel) {
			return false;
		}

		// Closing the channel wakes every task awaiting the interrupter
		self.cancel_tx.close();

		true
	}
}

/// Creates the linked pair of a [`JobController`] and the [`Interrupter`] handed to the job body.
pub(crate) fn interruption_pair(job_id: JobId) -> (JobController, Interrupter) {
	let (cancel_tx, cancel_rx) = chan::bounded(1);
	let worktable = Arc::new(JobWorktable::new(cancel_tx));

	(
		JobController {
			job_id,
			worktable: Arc::clone(&worktable),
		},
		Interrupter {
			worktable,
			cancel_rx,
		},
	)
}

/// Remote handle over a dispatched job, used to cancel it from any thread.
#[derive(Debug, Clone)]
pub struct JobController {
	job_id: JobId,
	worktable: Arc<JobWorktable>,
}

impl JobController {
	#[must_use]
	pub const fn job_id(&self) -> JobId {
		self.job_id
	}

	/// Asks the job to stop at its next check point. Never blocks and never waits for the job to
	/// actually return. Returns `false` if the job was already canceled.
	pub fn cancel(&self) -> bool {
		let first = self.worktable.cancel();
		trace!(job_id = %self.job_id, %first, "Received cancel command for job");
		first
	}

	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.worktable.is_canceled()
	}
}

/// Lets a job body observe cancellation, either by polling [`Interrupter::is_canceled`] between
/// work units or by awaiting `&interrupter` until a cancellation arrives.
#[derive(Debug)]
pub struct Interrupter {
	worktable: Arc<JobWorktable>,
	cancel_rx: chan::Receiver<()>,
}

impl Interrupter {
	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.worktable.is_canceled()
	}
}

pin_project_lite::pin_project! {
	/// Resolves once the job owning the [`Interrupter`] gets canceled.
	#[must_use = "`InterrupterFuture` does nothing unless polled"]
	pub struct InterrupterFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, ()>,
	}
}

impl Future for InterrupterFuture<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match self.project().fut.poll(cx) {
			// Nothing is ever sent, the channel only gets closed on cancel
			Poll::Ready(_) => {
				trace!("Running job received cancellation");
				Poll::Ready(())
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<'recv> IntoFuture for &'recv Interrupter {
	type Output = ();

	type IntoFuture = InterrupterFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		InterrupterFuture {
			fut: self.cancel_rx.recv(),
		}
	}
}

/// Returns `Ok(ExecStatus::Canceled)` from the enclosing `run` if the job was canceled.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		if interrupter.is_canceled() {
			::tracing::trace!("Job was canceled, leaving its run loop");
			return Ok($crate::ExecStatus::Canceled);
		}
	};
}

/// Progress sink handed to a running job.
#[derive(Debug, Clone)]
pub struct JobReporter {
	job_id: JobId,
	events: EventBus,
}

impl JobReporter {
	pub(crate) const fn new(job_id: JobId, events: EventBus) -> Self {
		Self { job_id, events }
	}

	#[must_use]
	pub const fn job_id(&self) -> JobId {
		self.job_id
	}

	pub fn progress(&self, progress: Progress) {
		self.events
			.emit_job(self.job_id, JobEventKind::Progress(progress));
	}
}
