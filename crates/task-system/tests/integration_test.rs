use std::{
	sync::{atomic::AtomicUsize, atomic::Ordering, Arc, Mutex},
	time::Duration,
};

use futures_concurrency::future::Join;
use rand::Rng;
use shelf_operation_store::{LogLevel, OperationStatus, OperationStore};
use shelf_task_system::{OperationEvent, Priority, SystemError};
use tokio::time::sleep;
use tracing::info;
use tracing_test::traced_test;

mod common;

use common::{
	jobs::{
		DeafJob, FailingJob, GateJob, LoopingJob, NeverJob, OverlapJob, PanicJob, ReadyJob,
		RecordStartJob,
	},
	new_operation, new_scheduler, wait_for_terminal, wait_until_active, wait_until_idle,
};

#[tokio::test]
#[traced_test]
async fn dispatch_follows_priority_then_arrival() {
	let (store, scheduler) = new_scheduler(1);

	// Occupy the only worker so every job below is queued before any of them starts
	let (gate_job, gate) = GateJob::new();
	let gate_id = new_operation(store.as_ref(), "gate", "test").await;
	scheduler
		.enqueue(gate_id.clone(), "test", Priority::HIGH, gate_job)
		.unwrap();
	wait_until_active(&scheduler, &gate_id).await;

	let starts = Arc::new(Mutex::new(vec![]));
	let mut ids = vec![];
	for (name, priority) in [
		("A", Priority::LOW),
		("B", Priority::HIGH),
		("C", Priority::NORMAL),
		("D", Priority::NORMAL),
	] {
		let id = new_operation(store.as_ref(), name, "test").await;
		scheduler
			.enqueue(
				id.clone(),
				"test",
				priority,
				RecordStartJob {
					name,
					starts: Arc::clone(&starts),
				},
			)
			.unwrap();
		ids.push(id);
	}

	let queued = scheduler
		.queued_operations()
		.into_iter()
		.map(|op| op.id.to_string())
		.collect::<Vec<_>>();
	assert_eq!(queued, ["B", "C", "D", "A"]);

	gate.send(()).unwrap();
	for id in &ids {
		assert_eq!(
			wait_for_terminal(store.as_ref(), id).await.status,
			OperationStatus::Completed
		);
	}

	assert_eq!(*starts.lock().unwrap(), ["B", "C", "D", "A"]);

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn cancel_stops_a_cooperative_job() {
	let (store, scheduler) = new_scheduler(2);
	let iterations = Arc::new(AtomicUsize::new(0));

	let id = new_operation(store.as_ref(), "looping", "test").await;
	scheduler
		.enqueue(
			id.clone(),
			"test",
			Priority::NORMAL,
			LoopingJob {
				max: 100,
				iterations: Arc::clone(&iterations),
			},
		)
		.unwrap();

	sleep(Duration::from_millis(20)).await;
	info!("issuing cancel");
	scheduler.cancel(&id).await.unwrap();

	let record = wait_for_terminal(store.as_ref(), &id).await;
	assert_eq!(record.status, OperationStatus::Canceled);
	assert!(iterations.load(Ordering::SeqCst) < 100);
	assert!(record.completed_at.is_some());

	let logs = store.get_operation_logs(&id, Some(1)).await.unwrap();
	assert_eq!(logs[0].level, LogLevel::Warn);
	assert_eq!(logs[0].message, "operation canceled");

	// Once the worker lets go, the id is unknown again
	wait_until_idle(&scheduler).await;
	assert!(matches!(
		scheduler.cancel(&id).await,
		Err(SystemError::OperationNotFound(_))
	));

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn cancel_is_a_request_not_an_interruption() {
	let (store, scheduler) = new_scheduler(1);

	let id = new_operation(store.as_ref(), "deaf", "test").await;
	scheduler
		.enqueue(id.clone(), "test", Priority::NORMAL, DeafJob(Duration::from_millis(30)))
		.unwrap();
	wait_until_active(&scheduler, &id).await;

	scheduler.cancel(&id).await.unwrap();

	// Never looked at the interrupter, so it simply ran to completion
	assert_eq!(
		wait_for_terminal(store.as_ref(), &id).await.status,
		OperationStatus::Completed
	);

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn canceling_a_queued_job_means_it_never_runs() {
	let (store, scheduler) = new_scheduler(1);

	let (gate_job, gate) = GateJob::new();
	let gate_id = new_operation(store.as_ref(), "gate", "test").await;
	scheduler
		.enqueue(gate_id.clone(), "test", Priority::NORMAL, gate_job)
		.unwrap();
	wait_until_active(&scheduler, &gate_id).await;

	let starts = Arc::new(Mutex::new(vec![]));
	let id = new_operation(store.as_ref(), "waiting", "test").await;
	scheduler
		.enqueue(
			id.clone(),
			"test",
			Priority::NORMAL,
			RecordStartJob {
				name: "waiting",
				starts: Arc::clone(&starts),
			},
		)
		.unwrap();

	scheduler.cancel(&id).await.unwrap();

	let record = store.get_operation_by_id(&id).await.unwrap();
	assert_eq!(record.status, OperationStatus::Canceled);
	assert!(record.started_at.is_none());
	assert!(scheduler.queued_operations().is_empty());
	// Recorded as canceled before the id was released
	assert!(matches!(
		scheduler.cancel(&id).await,
		Err(SystemError::OperationNotFound(_))
	));

	gate.send(()).unwrap();
	wait_for_terminal(store.as_ref(), &gate_id).await;
	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();

	assert!(starts.lock().unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn failing_job_leaves_one_error_entry_and_frees_the_worker() {
	let (store, scheduler) = new_scheduler(1);

	let failing = new_operation(store.as_ref(), "failing", "test").await;
	scheduler
		.enqueue(failing.clone(), "test", Priority::NORMAL, FailingJob("disk on fire"))
		.unwrap();

	let record = wait_for_terminal(store.as_ref(), &failing).await;
	assert_eq!(record.status, OperationStatus::Failed);
	assert_eq!(record.error_message.as_deref(), Some("sample error: disk on fire"));

	let errors = store
		.get_operation_logs(&failing, None)
		.await
		.unwrap()
		.into_iter()
		.filter(|entry| entry.level == LogLevel::Error)
		.collect::<Vec<_>>();
	assert_eq!(errors.len(), 1);
	assert!(errors[0].message.contains("disk on fire"));

	let next = new_operation(store.as_ref(), "next", "test").await;
	scheduler
		.enqueue(next.clone(), "test", Priority::NORMAL, ReadyJob)
		.unwrap();
	assert_eq!(
		wait_for_terminal(store.as_ref(), &next).await.status,
		OperationStatus::Completed
	);

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn panicking_job_fails_alone() {
	let (store, scheduler) = new_scheduler(1);

	let panicking = new_operation(store.as_ref(), "panicking", "test").await;
	scheduler
		.enqueue(panicking.clone(), "test", Priority::NORMAL, PanicJob)
		.unwrap();

	let record = wait_for_terminal(store.as_ref(), &panicking).await;
	assert_eq!(record.status, OperationStatus::Failed);

	let logs = store.get_operation_logs(&panicking, None).await.unwrap();
	let messages = logs.iter().map(|e| e.message.as_str()).collect::<Vec<_>>();
	assert_eq!(
		messages,
		[
			"operation started",
			"about to misbehave",
			"operation panicked: job body exploded"
		]
	);
	assert_eq!(logs[2].level, LogLevel::Error);
	let details = logs[2].details.as_deref().unwrap();
	assert!(details.starts_with("job body exploded\n\nstack backtrace:\n"), "{details}");
	wait_until_idle(&scheduler).await;

	let next = new_operation(store.as_ref(), "next", "test").await;
	scheduler
		.enqueue(next.clone(), "test", Priority::NORMAL, ReadyJob)
		.unwrap();
	assert_eq!(
		wait_for_terminal(store.as_ref(), &next).await.status,
		OperationStatus::Completed
	);

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn duplicate_ids_are_refused_while_in_flight() {
	let (store, scheduler) = new_scheduler(1);

	let (gate_job, gate) = GateJob::new();
	let id = new_operation(store.as_ref(), "only-once", "test").await;
	scheduler
		.enqueue(id.clone(), "test", Priority::NORMAL, gate_job)
		.unwrap();
	wait_until_active(&scheduler, &id).await;

	assert!(matches!(
		scheduler.enqueue(id.clone(), "test", Priority::HIGH, ReadyJob),
		Err(SystemError::AlreadyInFlight(_))
	));
	assert_eq!(scheduler.active_operations().len(), 1);
	assert!(scheduler.queued_operations().is_empty());

	gate.send(()).unwrap();
	wait_for_terminal(store.as_ref(), &id).await;

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn never_more_running_than_workers() {
	const WORKERS: usize = 3;

	let (store, scheduler) = new_scheduler(WORKERS);
	let running = Arc::new(AtomicUsize::new(0));
	let max_seen = Arc::new(AtomicUsize::new(0));

	let mut ids = vec![];
	for i in 0..15 {
		let hold = Duration::from_millis(rand::thread_rng().gen_range(5..25));
		let id = new_operation(store.as_ref(), &format!("overlap-{i}"), "test").await;
		scheduler
			.enqueue(
				id.clone(),
				"test",
				Priority(rand::thread_rng().gen_range(0..3)),
				OverlapJob {
					running: Arc::clone(&running),
					max_seen: Arc::clone(&max_seen),
					hold,
				},
			)
			.unwrap();
		ids.push(id);

		assert!(scheduler.active_operations().len() <= WORKERS);
	}

	let store_ref = store.as_ref();
	ids.iter()
		.map(|id| async move {
			let record = wait_for_terminal(store_ref, id).await;
			assert_eq!(record.status, OperationStatus::Completed);
		})
		.collect::<Vec<_>>()
		.join()
		.await;

	assert!(max_seen.load(Ordering::SeqCst) <= WORKERS);
	assert!(max_seen.load(Ordering::SeqCst) >= 1);

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn shutdown_drains_queue_and_refuses_new_work() {
	let (store, scheduler) = new_scheduler(1);
	let starts = Arc::new(Mutex::new(vec![]));

	let mut ids = vec![];
	for name in ["first", "second", "third"] {
		let id = new_operation(store.as_ref(), name, "test").await;
		scheduler
			.enqueue(
				id.clone(),
				"test",
				Priority::NORMAL,
				RecordStartJob {
					name,
					starts: Arc::clone(&starts),
				},
			)
			.unwrap();
		ids.push(id);
	}

	scheduler.shutdown(Duration::from_secs(5)).await.unwrap();

	for id in &ids {
		assert_eq!(
			store.get_operation_by_id(id).await.unwrap().status,
			OperationStatus::Completed
		);
	}
	assert_eq!(starts.lock().unwrap().len(), 3);

	let late = new_operation(store.as_ref(), "late", "test").await;
	assert!(matches!(
		scheduler.enqueue(late, "test", Priority::NORMAL, ReadyJob),
		Err(SystemError::ShuttingDown)
	));

	// A second shutdown has nothing left to do
	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn shutdown_timeout_names_running_operations() {
	let (store, scheduler) = new_scheduler(1);

	let stuck = new_operation(store.as_ref(), "stuck", "test").await;
	scheduler
		.enqueue(stuck.clone(), "test", Priority::NORMAL, NeverJob)
		.unwrap();
	wait_until_active(&scheduler, &stuck).await;

	let waiting = new_operation(store.as_ref(), "waiting", "test").await;
	scheduler
		.enqueue(waiting.clone(), "test", Priority::NORMAL, ReadyJob)
		.unwrap();

	match scheduler.shutdown(Duration::from_millis(50)).await {
		Err(SystemError::ShutdownTimeout { still_running, .. }) => {
			assert_eq!(still_running, [stuck.clone()]);
		}
		other => panic!("expected a shutdown timeout, got {other:?}"),
	}

	let waiting = store.get_operation_by_id(&waiting).await.unwrap();
	assert_eq!(waiting.status, OperationStatus::Canceled);
	assert_eq!(waiting.message, "scheduler shut down before dispatch");

	// The stuck job got its cancel request once time ran out
	assert_eq!(
		wait_for_terminal(store.as_ref(), &stuck).await.status,
		OperationStatus::Canceled
	);
}

#[tokio::test]
#[traced_test]
async fn events_follow_an_operation_from_queue_to_finish() {
	let (store, scheduler) = new_scheduler(1);
	let mut events = scheduler.subscribe();

	let id = new_operation(store.as_ref(), "looping", "test").await;
	scheduler
		.enqueue(
			id.clone(),
			"test",
			Priority::HIGH,
			LoopingJob {
				max: 3,
				iterations: Arc::default(),
			},
		)
		.unwrap();

	let mut seen = vec![];
	loop {
		let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(event.operation_id(), &id);

		let finished = matches!(event, OperationEvent::Finished { .. });
		seen.push(event);
		if finished {
			break;
		}
	}

	assert!(matches!(
		seen.first(),
		Some(OperationEvent::Queued { priority: Priority::HIGH, .. })
	));
	assert!(seen
		.iter()
		.any(|event| matches!(event, OperationEvent::Started { .. })));
	assert_eq!(
		seen.iter()
			.filter(|event| matches!(event, OperationEvent::Progress { .. }))
			.count(),
		3
	);
	assert!(matches!(
		seen.last(),
		Some(OperationEvent::Finished {
			status: OperationStatus::Completed,
			..
		})
	));

	scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
}
