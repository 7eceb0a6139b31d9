//!
//! # Job Pool
//!
//! A small concurrency core to run batches of cancellable jobs on a bounded set of workers.
//!
//! Bring your own unified error type, append some jobs with their priorities and the pool will take
//! care of dispatching, running and reclaiming them:
//! - A single coordinator task moves jobs from `todo` to `pending` as they arrive, lower priority
//!   values first and then in submission order;
//! - At most `max_workers` job bodies run at once, and the capacity can be changed on the fly;
//! - Cancellation is cooperative: jobs poll (or await) their [`Interrupter`] between work units;
//! - Every dispatched job emits exactly one `Done` event, even when its body errors out or panics;
//! - Finished jobs are handed back to the caller, who can downcast them to their concrete type.
//!
//! ## Basic example
//!
//! ```
//! use lumen_job_pool::{
//! 	ExecStatus, Interrupter, Job, JobId, JobPool, JobReporter, PoolEvent,
//! };
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum SampleError {
//! 	#[error("Sample error")]
//! 	SampleError,
//! }
//!
//! #[derive(Debug)]
//! pub struct ReadyJob {
//! 	id: JobId,
//! }
//!
//! #[async_trait]
//! impl Job<SampleError> for ReadyJob {
//! 	fn id(&self) -> JobId {
//! 		self.id
//! 	}
//!
//! 	async fn run(
//! 		&mut self,
//! 		_interrupter: &Interrupter,
//! 		_reporter: &JobReporter,
//! 	) -> Result<ExecStatus, SampleError> {
//! 		Ok(ExecStatus::Done)
//! 	}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//! 	let pool = JobPool::<SampleError>::new(2).unwrap();
//! 	let events = pool.subscribe();
//!
//! 	pool.append_job(ReadyJob { id: JobId::new_v4() }, 0).unwrap();
//!
//! 	while let Ok(event) = events.recv().await {
//! 		if event == PoolEvent::Finished {
//! 			break;
//! 		}
//! 	}
//!
//! 	assert_eq!(pool.take_processed().len(), 1);
//!
//! 	pool.shutdown().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod event;
mod job;
mod pool;
mod worker_pool;

pub use error::{PoolError, RunError};
pub use event::{JobEvent, JobEventKind, PoolEvent, Progress};
pub use job::{
	ExecStatus, Interrupter, InterrupterFuture, IntoJob, Job, JobCollection, JobController, JobId,
	JobOutcome, JobReporter, JobStatus, Priority,
};
pub use pool::{JobPool, PoolCounts, ProcessedJob};
