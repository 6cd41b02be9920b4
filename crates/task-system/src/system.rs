use std::{
	sync::{Arc, Mutex, PoisonError},
	time::Duration,
};

use futures_concurrency::future::Join;
use shelf_operation_store::{OperationId, OperationStore};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, trace, warn};

use super::{
	error::{capture_panic_backtraces, RunError, SystemError},
	event::OperationEvent,
	job::{IntoJob, Priority},
	queue::{ActiveOperation, CancelOutcome, OperationQueue, QueuedOperation},
	worker::{finalize_unstarted, Worker, WorkerContext},
};

const EVENTS_CAPACITY: usize = 256;
const CANCELED_BEFORE_START_MESSAGE: &str = "operation canceled before start";
const ABANDONED_AT_SHUTDOWN_MESSAGE: &str = "scheduler shut down before dispatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
	/// Upper bound of operations running at the same time.
	pub workers: usize,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self { workers: 2 }
	}
}

/// Runs submitted operations on a fixed pool of workers, highest priority first and in
/// arrival order within a priority.
///
/// Construct it once at startup and hand clones to whoever needs to submit work; all
/// clones drive the same pool. Submission and execution are decoupled: [`Scheduler::enqueue`]
/// only fails for reasons known at submission time, while execution outcomes end up in
/// the operation's record in the store.
pub struct Scheduler<E: RunError> {
	queue: Arc<OperationQueue<E>>,
	store: Arc<dyn OperationStore>,
	events: broadcast::Sender<OperationEvent>,
	workers: Arc<Mutex<Option<Vec<Worker>>>>,
	workers_count: usize,
}

impl<E: RunError> Clone for Scheduler<E> {
	fn clone(&self) -> Self {
		Self {
			queue: Arc::clone(&self.queue),
			store: Arc::clone(&self.store),
			events: self.events.clone(),
			workers: Arc::clone(&self.workers),
			workers_count: self.workers_count,
		}
	}
}

impl<E: RunError> Scheduler<E> {
	/// Spawns the worker pool, so it must be called from within a tokio runtime.
	///
	/// Also chains a process-wide panic hook, once, so panicking jobs get a backtrace in
	/// their error log entry.
	pub fn new(store: Arc<dyn OperationStore>, config: SchedulerConfig) -> Self {
		capture_panic_backtraces();

		let workers_count = config.workers.max(1);
		let queue = Arc::new(OperationQueue::new());
		let (events, _) = broadcast::channel(EVENTS_CAPACITY);

		let ctx = WorkerContext {
			queue: Arc::clone(&queue),
			store: Arc::clone(&store),
			events: events.clone(),
		};

		let workers = (0..workers_count)
			.map(|id| Worker::spawn(id, ctx.clone()))
			.collect::<Vec<_>>();

		info!(workers_count, "Scheduler started");

		Self {
			queue,
			store,
			events,
			workers: Arc::new(Mutex::new(Some(workers))),
			workers_count,
		}
	}

	/// Queues an operation. The caller is expected to have created its record already.
	///
	/// Fails if an operation with the same id is still queued or running, or if the
	/// scheduler is shutting down. Never waits for execution.
	pub fn enqueue(
		&self,
		id: impl Into<OperationId>,
		kind: impl Into<String>,
		priority: Priority,
		job: impl IntoJob<E>,
	) -> Result<(), SystemError> {
		let id = id.into();
		let kind = kind.into();

		self.queue
			.push(id.clone(), kind.clone(), priority, job.into_job())?;
		trace!(operation_id = %id, %kind, %priority, "Operation enqueued");

		let _ = self.events.send(OperationEvent::Queued { id, kind, priority });

		Ok(())
	}

	/// Requests a cooperative stop.
	///
	/// A running job keeps going until it checks its interrupter. A job still waiting in
	/// the queue never starts and is recorded as canceled right away. Unknown or already
	/// finished ids are an error.
	#[instrument(skip(self), err)]
	pub async fn cancel(&self, id: &OperationId) -> Result<(), SystemError> {
		match self.queue.cancel(id)? {
			CancelOutcome::Signaled => info!("Cancel requested for running operation"),
			CancelOutcome::Dequeued { kind } => {
				info!(%kind, "Operation canceled before dispatch");
				finalize_unstarted(
					self.store.as_ref(),
					&self.events,
					id,
					&kind,
					CANCELED_BEFORE_START_MESSAGE,
				)
				.await;
				self.queue.finish(id);
			}
		}

		Ok(())
	}

	/// Snapshot of the operations currently held by a worker, oldest first.
	#[must_use]
	pub fn active_operations(&self) -> Vec<ActiveOperation> {
		self.queue.active()
	}

	/// Snapshot of the operations waiting for a worker, in dispatch order.
	#[must_use]
	pub fn queued_operations(&self) -> Vec<QueuedOperation> {
		self.queue.queued()
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
		self.events.subscribe()
	}

	#[must_use]
	pub fn store(&self) -> &Arc<dyn OperationStore> {
		&self.store
	}

	#[must_use]
	pub const fn workers_count(&self) -> usize {
		self.workers_count
	}

	/// Stops accepting submissions and lets the workers drain the queue, waiting up to
	/// `timeout` for them.
	///
	/// When time runs out, operations that never reached a worker are recorded as
	/// canceled, running ones get a cancel request, and the error lists the running ones.
	#[instrument(skip(self))]
	pub async fn shutdown(&self, timeout: Duration) -> Result<(), SystemError> {
		let Some(workers) = self
			.workers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take()
		else {
			warn!("Trying to shutdown the scheduler that was already shutdown");
			return Ok(());
		};

		self.queue.close();
		info!(
			queued = self.queue.queued().len(),
			running = self.queue.active().len(),
			"Scheduler shutting down, waiting for in-flight operations"
		);

		let drained = tokio::time::timeout(
			timeout,
			workers
				.into_iter()
				.map(|Worker { id, handle }| async move {
					if let Err(e) = handle.await {
						error!(worker_id = id, ?e, "Worker failed to shutdown on handle await;");
					}
				})
				.collect::<Vec<_>>()
				.join(),
		)
		.await;

		if drained.is_ok() {
			info!("Scheduler gracefully shutdown");
			return Ok(());
		}

		for (id, kind) in self.queue.abandon_pending() {
			warn!(operation_id = %id, %kind, "Dropping operation that never started");
			finalize_unstarted(
				self.store.as_ref(),
				&self.events,
				&id,
				&kind,
				ABANDONED_AT_SHUTDOWN_MESSAGE,
			)
			.await;
		}

		let still_running = self.queue.cancel_running();
		warn!(?still_running, "Shutdown timed out with operations still running");

		Err(SystemError::ShutdownTimeout {
			timeout,
			still_running,
		})
	}
}
