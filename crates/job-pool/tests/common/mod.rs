#![allow(dead_code)]

use lumen_job_pool::{
	check_interruption, ExecStatus, Interrupter, Job, JobEventKind, JobId, JobReporter,
	PoolEvent, Progress,
};

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("sample job failed on purpose")]
	Sample,
}

#[derive(Debug)]
pub struct ReadyJob {
	id: JobId,
}

impl Default for ReadyJob {
	fn default() -> Self {
		Self {
			id: JobId::new_v4(),
		}
	}
}

#[async_trait]
impl Job<SampleError> for ReadyJob {
	fn id(&self) -> JobId {
		self.id
	}

	async fn run(
		&mut self,
		_interrupter: &Interrupter,
		reporter: &JobReporter,
	) -> Result<ExecStatus, SampleError> {
		reporter.progress(Progress::Percent(100));
		Ok(ExecStatus::Done)
	}
}

/// Only returns once canceled.
#[derive(Debug)]
pub struct NeverJob {
	id: JobId,
}

impl Default for NeverJob {
	fn default() -> Self {
		Self {
			id: JobId::new_v4(),
		}
	}
}

#[async_trait]
impl Job<SampleError> for NeverJob {
	fn id(&self) -> JobId {
		self.id
	}

	async fn run(
		&mut self,
		interrupter: &Interrupter,
		_reporter: &JobReporter,
	) -> Result<ExecStatus, SampleError> {
		interrupter.await;
		info!("Canceling NeverJob <id='{}'>", self.id);
		Ok(ExecStatus::Canceled)
	}
}

#[derive(Debug)]
pub struct FailingJob {
	id: JobId,
}

impl Default for FailingJob {
	fn default() -> Self {
		Self {
			id: JobId::new_v4(),
		}
	}
}

#[async_trait]
impl Job<SampleError> for FailingJob {
	fn id(&self) -> JobId {
		self.id
	}

	async fn run(
		&mut self,
		_interrupter: &Interrupter,
		_reporter: &JobReporter,
	) -> Result<ExecStatus, SampleError> {
		Err(SampleError::Sample)
	}
}

#[derive(Debug)]
pub struct PanickingJob {
	id: JobId,
}

impl Default for PanickingJob {
	fn default() -> Self {
		Self {
			id: JobId::new_v4(),
		}
	}
}

#[async_trait]
impl Job<SampleError> for PanickingJob {
	fn id(&self) -> JobId {
		self.id
	}

	async fn run(
		&mut self,
		_interrupter: &Interrupter,
		_reporter: &JobReporter,
	) -> Result<ExecStatus, SampleError> {
		panic!("PanickingJob <id='{}'> exploded", self.id);
	}
}

/// Waits for the gate to open (or close) before checking for interruption, counting how many
/// times its body was entered.
#[derive(Debug)]
pub struct GateJob {
	id: JobId,
	gate: chan::Receiver<()>,
	entered: Arc<AtomicUsize>,
}

impl GateJob {
	pub fn new(gate: chan::Receiver<()>, entered: Arc<AtomicUsize>) -> Self {
		Self {
			id: JobId::new_v4(),
			gate,
			entered,
		}
	}
}

#[async_trait]
impl Job<SampleError> for GateJob {
	fn id(&self) -> JobId {
		self.id
	}

	async fn run(
		&mut self,
		interrupter: &Interrupter,
		_reporter: &JobReporter,
	) -> Result<ExecStatus, SampleError> {
		self.entered.fetch_add(1, Ordering::SeqCst);

		let _ = self.gate.recv().await;
		check_interruption!(interrupter);

		Ok(ExecStatus::Done)
	}
}

/// Tracks how many bodies run at once and the order they were entered in.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
	running: Arc<AtomicUsize>,
	peak: Arc<AtomicUsize>,
	order: Arc<Mutex<Vec<String>>>,
}

impl Tracker {
	pub fn peak(&self) -> usize {
		self.peak.load(Ordering::SeqCst)
	}

	pub fn order(&self) -> Vec<String> {
		self.order.lock().clone()
	}

	pub fn reset_peak(&self) {
		self.peak.store(0, Ordering::SeqCst);
	}
}

#[derive(Debug)]
pub struct TrackedJob {
	id: JobId,
	label: String,
	hold: Duration,
	tracker: Tracker,
}

impl TrackedJob {
	pub fn new(label: impl Into<String>, hold: Duration, tracker: Tracker) -> Self {
		Self {
			id: JobId::new_v4(),
			label: label.into(),
			hold,
			tracker,
		}
	}

	pub fn label(&self) -> &str {
		&self.label
	}
}

#[async_trait]
impl Job<SampleError> for TrackedJob {
	fn id(&self) -> JobId {
		self.id
	}

	async fn run(
		&mut self,
		interrupter: &Interrupter,
		_reporter: &JobReporter,
	) -> Result<ExecStatus, SampleError> {
		self.tracker.order.lock().push(self.label.clone());
		let now = self.tracker.running.fetch_add(1, Ordering::SeqCst) + 1;
		self.tracker.peak.fetch_max(now, Ordering::SeqCst);

		sleep(self.hold).await;

		self.tracker.running.fetch_sub(1, Ordering::SeqCst);
		check_interruption!(interrupter);

		Ok(ExecStatus::Done)
	}
}

/// Collects pool events until `Finished` shows up, panicking if it takes too long.
pub async fn collect_until_finished(events: &chan::Receiver<PoolEvent>) -> Vec<PoolEvent> {
	timeout(Duration::from_secs(10), async {
		let mut collected = Vec::new();

		while let Ok(event) = events.recv().await {
			let finished = event == PoolEvent::Finished;
			collected.push(event);
			if finished {
				break;
			}
		}

		collected
	})
	.await
	.expect("pool never finished")
}

pub fn done_events(events: &[PoolEvent]) -> Vec<(JobId, &JobEventKind)> {
	events
		.iter()
		.filter_map(|event| match event {
			PoolEvent::Job(job_event) if matches!(job_event.kind, JobEventKind::Done(_)) => {
				Some((job_event.job_id, &job_event.kind))
			}
			_ => None,
		})
		.collect()
}

/// Waits until `count` jobs reported they started.
pub async fn wait_for_started(events: &chan::Receiver<PoolEvent>, count: usize) -> Vec<JobId> {
	timeout(Duration::from_secs(10), async {
		let mut started = Vec::with_capacity(count);

		while started.len() < count {
			match events.recv().await {
				Ok(PoolEvent::Job(job_event)) if job_event.kind == JobEventKind::Started => {
					started.push(job_event.job_id);
				}
				Ok(_) => {}
				Err(_) => break,
			}
		}

		started
	})
	.await
	.expect("jobs never started")
}

pub fn drain(events: &chan::Receiver<PoolEvent>) -> Vec<PoolEvent> {
	let mut drained = Vec::new();
	while let Ok(event) = events.try_recv() {
		drained.push(event);
	}
	drained
}
