use std::{
	cmp::Ordering,
	collections::{BinaryHeap, HashMap},
	pin::pin,
	sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shelf_operation_store::OperationId;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{
	error::{RunError, SystemError},
	job::{Job, Priority},
};

/// A dispatched operation, as listed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveOperation {
	pub id: OperationId,
	pub kind: String,
	pub started_at: DateTime<Utc>,
}

/// An operation still waiting for a free worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedOperation {
	pub id: OperationId,
	pub kind: String,
	pub priority: Priority,
}

pub(crate) struct PendingOperation<E: RunError> {
	pub(crate) id: OperationId,
	pub(crate) kind: String,
	priority: Priority,
	seq: u64,
	pub(crate) job: Box<dyn Job<E>>,
}

impl<E: RunError> PartialEq for PendingOperation<E> {
	fn eq(&self, other: &Self) -> bool {
		self.priority == other.priority && self.seq == other.seq
	}
}

impl<E: RunError> Eq for PendingOperation<E> {}

impl<E: RunError> PartialOrd for PendingOperation<E> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

// Max-heap: higher priority first, then the lower (older) sequence number.
impl<E: RunError> Ord for PendingOperation<E> {
	fn cmp(&self, other: &Self) -> Ordering {
		self.priority
			.cmp(&other.priority)
			.then_with(|| other.seq.cmp(&self.seq))
	}
}

/// What a worker receives when it takes an operation off the queue.
pub(crate) struct Dispatched<E: RunError> {
	pub(crate) id: OperationId,
	pub(crate) kind: String,
	pub(crate) job: Box<dyn Job<E>>,
	pub(crate) token: CancellationToken,
	pub(crate) started_at: DateTime<Utc>,
}

pub(crate) enum CancelOutcome {
	/// The job is running, its token was fired.
	Signaled,
	/// The job never started and is gone from the queue. Its id stays taken until
	/// [`OperationQueue::finish`] is called for it.
	Dequeued { kind: String },
}

#[derive(Debug)]
struct InFlight {
	kind: String,
	token: CancellationToken,
	started_at: Option<DateTime<Utc>>,
}

struct QueueState<E: RunError> {
	pending: BinaryHeap<PendingOperation<E>>,
	/// At most one entry per queued or running id.
	in_flight: HashMap<OperationId, InFlight>,
	next_seq: u64,
	accepting: bool,
}

pub(crate) struct OperationQueue<E: RunError> {
	state: Mutex<QueueState<E>>,
	wakeup: Notify,
}

impl<E: RunError> OperationQueue<E> {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(QueueState {
				pending: BinaryHeap::new(),
				in_flight: HashMap::new(),
				next_seq: 0,
				accepting: true,
			}),
			wakeup: Notify::new(),
		}
	}

	// Nothing panics while holding the lock, but a poisoned queue is still consistent.
	fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub(crate) fn push(
		&self,
		id: OperationId,
		kind: String,
		priority: Priority,
		job: Box<dyn Job<E>>,
	) -> Result<(), SystemError> {
		{
			let mut state = self.lock();
			if !state.accepting {
				return Err(SystemError::ShuttingDown);
			}
			if state.in_flight.contains_key(&id) {
				return Err(SystemError::AlreadyInFlight(id));
			}

			state.in_flight.insert(
				id.clone(),
				InFlight {
					kind: kind.clone(),
					token: CancellationToken::new(),
					started_at: None,
				},
			);

			let seq = state.next_seq;
			state.next_seq += 1;
			state.pending.push(PendingOperation {
				id,
				kind,
				priority,
				seq,
				job,
			});
		}

		self.wakeup.notify_one();

		Ok(())
	}

	/// Waits for the next operation in priority order. Returns `None` once the queue is
	/// closed and fully drained.
	pub(crate) async fn next(&self) -> Option<Dispatched<E>> {
		loop {
			// Registered before looking at the queue, so a push or close that happens
			// in between still wakes us.
			let mut notified = pin!(self.wakeup.notified());
			notified.as_mut().enable();

			{
				let mut state = self.lock();
				if let Some(PendingOperation { id, kind, job, .. }) = state.pending.pop() {
					let started_at = Utc::now();
					let token = state
						.in_flight
						.entry(id.clone())
						.or_insert_with(|| InFlight {
							kind: kind.clone(),
							token: CancellationToken::new(),
							started_at: None,
						})
						.start(started_at);

					if !state.pending.is_empty() {
						// More work left, pass the baton to another idle worker
						self.wakeup.notify_one();
					}

					return Some(Dispatched {
						id,
						kind,
						job,
						token,
						started_at,
					});
				}

				if !state.accepting {
					return None;
				}
			}

			trace!("Queue empty, worker going idle");
			notified.await;
		}
	}

	/// Drops the in-flight entry of a finished operation, freeing its id.
	pub(crate) fn finish(&self, id: &OperationId) {
		self.lock().in_flight.remove(id);
	}

	pub(crate) fn cancel(&self, id: &OperationId) -> Result<CancelOutcome, SystemError> {
		let mut state = self.lock();

		let entry = state
			.in_flight
			.get(id)
			.ok_or_else(|| SystemError::OperationNotFound(id.clone()))?;

		// A dequeued entry keeps its fired token until `finish`, so a repeated cancel
		// lands here too.
		if entry.started_at.is_some() || entry.token.is_cancelled() {
			entry.token.cancel();
			return Ok(CancelOutcome::Signaled);
		}

		entry.token.cancel();
		let kind = entry.kind.clone();
		state.pending.retain(|pending| pending.id != *id);

		Ok(CancelOutcome::Dequeued { kind })
	}

	pub(crate) fn active(&self) -> Vec<ActiveOperation> {
		let mut active = self
			.lock()
			.in_flight
			.iter()
			.filter_map(|(id, entry)| {
				entry.started_at.map(|started_at| ActiveOperation {
					id: id.clone(),
					kind: entry.kind.clone(),
					started_at,
				})
			})
			.collect::<Vec<_>>();
		active.sort_by(|a, b| a.started_at.cmp(&b.started_at));

		active
	}

	/// Pending operations in the order they will be dispatched.
	pub(crate) fn queued(&self) -> Vec<QueuedOperation> {
		let state = self.lock();
		let mut pending = state.pending.iter().collect::<Vec<_>>();
		pending.sort_by(|a, b| b.cmp(a));

		pending
			.into_iter()
			.map(|op| QueuedOperation {
				id: op.id.clone(),
				kind: op.kind.clone(),
				priority: op.priority,
			})
			.collect()
	}

	/// Stops accepting submissions; workers keep draining what is already queued.
	/// Returns `false` if the queue was already closed.
	pub(crate) fn close(&self) -> bool {
		let was_accepting = std::mem::replace(&mut self.lock().accepting, false);
		self.wakeup.notify_waiters();

		was_accepting
	}

	/// Takes every operation that never reached a worker out of the queue, in dispatch order.
	pub(crate) fn abandon_pending(&self) -> Vec<(OperationId, String)> {
		let mut state = self.lock();
		let mut pending = std::mem::take(&mut state.pending).into_sorted_vec();
		pending.reverse();

		pending
			.into_iter()
			.map(|PendingOperation { id, kind, .. }| {
				state.in_flight.remove(&id);
				(id, kind)
			})
			.collect()
	}

	/// Fires the cancel token of every running operation, returning their ids.
	pub(crate) fn cancel_running(&self) -> Vec<OperationId> {
		let state = self.lock();
		let mut running = state
			.in_flight
			.iter()
			.filter(|(_, entry)| entry.started_at.is_some())
			.map(|(id, entry)| {
				entry.token.cancel();
				id.clone()
			})
			.collect::<Vec<_>>();
		running.sort();

		running
	}
}

impl InFlight {
	fn start(&mut self, started_at: DateTime<Utc>) -> CancellationToken {
		self.started_at = Some(started_at);
		self.token.clone()
	}
}
