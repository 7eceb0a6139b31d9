use lumen_job_pool::{
	IntoJob, Job, JobCollection, JobEventKind, JobOutcome, JobPool, JobStatus, PoolCounts,
	PoolError, PoolEvent,
};

use std::{
	collections::HashSet,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

mod common;

use common::{
	collect_until_finished, done_events, drain, wait_for_started, FailingJob, GateJob, NeverJob,
	PanickingJob, ReadyJob, SampleError, TrackedJob, Tracker,
};

async fn wait_for_pending(pool: &JobPool<SampleError>, count: usize) {
	timeout(Duration::from_secs(10), async {
		while pool.counts().pending < count {
			sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("jobs never got dispatched");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn every_job_is_done_once_and_pool_finishes_once() {
	let pool = JobPool::<SampleError>::new(3).unwrap();
	let events = pool.subscribe();

	let mut jobs: JobCollection<SampleError> = (0..8)
		.map(|_| (ReadyJob::default().into_job(), 0))
		.collect();
	let failing = FailingJob::default().into_job();
	let panicking = PanickingJob::default().into_job();
	let (failing_id, panicking_id) = (failing.id(), panicking.id());
	jobs.push((failing, 0));
	jobs.push((panicking, 0));

	pool.append_jobs(jobs).unwrap();

	let collected = collect_until_finished(&events).await;
	pool.wait_for_done().await;
	let late = drain(&events);

	assert!(
		!late.contains(&PoolEvent::Finished),
		"pool finished twice: {late:#?}"
	);

	let dones = done_events(&collected);
	assert_eq!(dones.len(), 10);
	assert_eq!(
		dones.iter().map(|(id, _)| *id).collect::<HashSet<_>>().len(),
		10
	);

	for (job_id, kind) in dones {
		if job_id == failing_id {
			assert!(matches!(kind, JobEventKind::Done(JobOutcome::Failed(_))));
		} else if job_id == panicking_id {
			assert!(matches!(kind, JobEventKind::Done(JobOutcome::Panicked(_))));
		} else {
			assert_eq!(*kind, JobEventKind::Done(JobOutcome::Done));
		}
	}

	assert_eq!(pool.take_processed().len(), 10);
	assert_eq!(pool.counts().processed, 0);
	assert!(pool.is_empty());

	pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn canceling_a_job_twice_is_a_no_op() {
	let pool = JobPool::<SampleError>::new(2).unwrap();
	let started = pool.subscribe();
	let events = pool.subscribe();

	let job = NeverJob::default();
	let job_id = job.id();
	pool.append_job(job, 0).unwrap();

	assert_eq!(wait_for_started(&started, 1).await, vec![job_id]);

	let controller = pool.controller(job_id).expect("job should be pending");
	assert!(controller.cancel());
	assert!(!controller.cancel());
	assert!(controller.is_canceled());

	let collected = collect_until_finished(&events).await;
	pool.wait_for_done().await;
	let mut all = collected;
	all.extend(drain(&events));

	let dones = done_events(&all);
	assert_eq!(dones.len(), 1);
	assert_eq!(*dones[0].1, JobEventKind::Done(JobOutcome::Canceled));

	pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn canceling_the_pool_twice_emits_a_single_done_per_job() {
	let pool = JobPool::<SampleError>::new(2).unwrap();
	let started = pool.subscribe();
	let events = pool.subscribe();

	pool.append_jobs(vec![
		(NeverJob::default().into_job(), 0),
		(NeverJob::default().into_job(), 0),
	])
	.unwrap();

	wait_for_started(&started, 2).await;

	pool.cancel(true);
	pool.cancel(true);

	assert_eq!(pool.counts().pending, 0);
	assert_eq!(pool.counts().processed, 2);

	pool.wait_for_done().await;

	let all = drain(&events);
	assert_eq!(done_events(&all).len(), 2);
	assert_eq!(
		all.iter()
			.filter(|event| **event == PoolEvent::Finished)
			.count(),
		1
	);

	pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn lower_priority_values_are_dispatched_first() {
	let pool = JobPool::<SampleError>::new(1).unwrap();
	let started = pool.subscribe();
	let tracker = Tracker::default();

	let (gate_tx, gate_rx) = chan::bounded(1);
	pool.append_job(GateJob::new(gate_rx, Arc::default()), 0)
		.unwrap();
	wait_for_started(&started, 1).await;

	pool.append_jobs(
		[(5, "e"), (1, "a"), (3, "c"), (1, "b")]
			.into_iter()
			.map(|(priority, label)| {
				(
					TrackedJob::new(label, Duration::ZERO, tracker.clone()).into_job(),
					priority,
				)
			})
			.collect(),
	)
	.unwrap();

	wait_for_pending(&pool, 5).await;
	gate_tx.close();

	pool.wait_for_done().await;

	assert_eq!(tracker.order(), vec!["a", "b", "c", "e"]);

	pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn shrinking_workers_keeps_running_jobs_alive() {
	let pool = JobPool::<SampleError>::new(4).unwrap();
	let started = pool.subscribe();
	let events = pool.subscribe();
	let tracker = Tracker::default();
	let entered = Arc::new(AtomicUsize::new(0));

	let (gate_tx, gate_rx) = chan::bounded(1);
	let gates = (0..4)
		.map(|_| GateJob::new(gate_rx.clone(), Arc::clone(&entered)).into_job())
		.collect::<Vec<_>>();
	let gate_ids = gates.iter().map(|job| job.id()).collect::<HashSet<_>>();

	pool.append_jobs(gates.into_iter().map(|job| (job, 0)).collect())
		.unwrap();
	wait_for_started(&started, 4).await;

	pool.set_max_workers(1);
	assert_eq!(pool.max_workers(), 1);

	pool.append_jobs(
		(0..4)
			.map(|i| {
				(
					TrackedJob::new(format!("t{i}"), Duration::from_millis(20), tracker.clone())
						.into_job(),
					0,
				)
			})
			.collect(),
	)
	.unwrap();

	wait_for_pending(&pool, 8).await;
	sleep(Duration::from_millis(50)).await;

	// The 4 running jobs are still holding every slot
	assert_eq!(entered.load(Ordering::SeqCst), 4);
	assert!(tracker.order().is_empty());

	gate_tx.close();

	let collected = collect_until_finished(&events).await;
	pool.wait_for_done().await;

	let dones = done_events(&collected);
	assert_eq!(dones.len(), 8);
	for (job_id, kind) in dones {
		if gate_ids.contains(&job_id) {
			assert_eq!(*kind, JobEventKind::Done(JobOutcome::Done));
		}
	}

	assert_eq!(tracker.order().len(), 4);
	assert_eq!(tracker.peak(), 1);

	pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn no_job_body_starts_after_cancel() {
	let pool = JobPool::<SampleError>::new(1).unwrap();
	let started = pool.subscribe();
	let events = pool.subscribe();
	let entered = Arc::new(AtomicUsize::new(0));

	let (gate_tx, gate_rx) = chan::bounded(1);
	pool.append_job(GateJob::new(gate_rx.clone(), Arc::clone(&entered)), 0)
		.unwrap();
	wait_for_started(&started, 1).await;

	pool.append_jobs(
		(0..5)
			.map(|_| (GateJob::new(gate_rx.clone(), Arc::clone(&entered)).into_job(), 0))
			.collect(),
	)
	.unwrap();
	wait_for_pending(&pool, 6).await;

	pool.cancel(true);
	gate_tx.close();

	pool.wait_for_done().await;

	assert_eq!(entered.load(Ordering::SeqCst), 1);

	let all = drain(&events);
	let dones = done_events(&all);
	assert_eq!(dones.len(), 6);
	assert!(dones
		.iter()
		.all(|(_, kind)| **kind == JobEventKind::Done(JobOutcome::Canceled)));

	assert_eq!(pool.processed_ids().len(), 6);
	assert_eq!(pool.take_processed().len(), 6);

	pool.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn processed_jobs_can_be_downcast() {
	let pool = JobPool::<SampleError>::new(1).unwrap();
	let events = pool.subscribe();

	pool.append_job(
		TrackedJob::new("downcast me", Duration::ZERO, Tracker::default()),
		0,
	)
	.unwrap();

	collect_until_finished(&events).await;
	pool.wait_for_done().await;

	let mut processed = pool.take_processed();
	assert_eq!(processed.len(), 1);

	let processed = processed.remove(0);
	assert!(matches!(
		processed.status(),
		Some(JobStatus::Done)
	));
	assert!(processed.elapsed().is_some());

	let job = processed
		.downcast_job::<TrackedJob>()
		.expect("job should be a TrackedJob");
	assert_eq!(job.label(), "downcast me");

	pool.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn appending_nothing_does_not_start_the_coordinator() {
	let pool = JobPool::<SampleError>::new(1).unwrap();

	pool.append_jobs(Vec::new()).unwrap();

	assert!(!pool.is_running());
	assert!(pool.is_empty());

	pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn shutdown_waits_for_in_flight_jobs() {
	let pool = JobPool::<SampleError>::new(2).unwrap();
	let started = pool.subscribe();

	pool.append_job(NeverJob::default(), 0).unwrap();
	wait_for_started(&started, 1).await;

	timeout(Duration::from_secs(10), pool.shutdown())
		.await
		.expect("shutdown never returned");

	assert!(!pool.is_running());
	assert_eq!(pool.counts(), PoolCounts::default());

	assert!(matches!(
		pool.append_job(ReadyJob::default(), 0),
		Err(PoolError::Shutdown)
	));
}

#[test]
fn creating_a_pool_outside_a_runtime_fails() {
	assert!(matches!(
		JobPool::<SampleError>::new(1),
		Err(PoolError::NoRuntime)
	));
}
