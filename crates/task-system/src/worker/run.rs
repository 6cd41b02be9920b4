use std::{panic::AssertUnwindSafe, time::Instant};

use futures::FutureExt;
use shelf_operation_store::{LogLevel, OperationId, OperationStatus, OperationStore};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, trace, warn};

use super::{WorkerContext, WorkerId};
use crate::{
	error::{panic_message, take_panic_backtrace, RunError},
	event::OperationEvent,
	interrupter::Interrupter,
	job::ExecStatus,
	metrics,
	progress::ProgressReporter,
	queue::{Dispatched, OperationQueue},
};

const STARTED_MESSAGE: &str = "operation started";
const COMPLETED_MESSAGE: &str = "operation completed";
const CANCELED_MESSAGE: &str = "operation canceled";

enum Outcome {
	Completed,
	Canceled,
	Failed {
		message: String,
		details: Option<String>,
	},
}

/// Frees the operation's id when execution ends, however it ends.
struct InFlightGuard<'queue, E: RunError> {
	queue: &'queue OperationQueue<E>,
	id: OperationId,
}

impl<E: RunError> Drop for InFlightGuard<'_, E> {
	fn drop(&mut self) {
		self.queue.finish(&self.id);
	}
}

pub(super) async fn run<E: RunError>(worker_id: WorkerId, ctx: WorkerContext<E>) {
	while let Some(dispatched) = ctx.queue.next().await {
		execute(worker_id, &ctx, dispatched).await;
	}

	trace!("Queue closed and drained, worker loop ending");
}

#[instrument(
	skip(ctx, dispatched),
	fields(operation_id = %dispatched.id, kind = %dispatched.kind)
)]
async fn execute<E: RunError>(
	worker_id: WorkerId,
	ctx: &WorkerContext<E>,
	dispatched: Dispatched<E>,
) {
	let Dispatched {
		id,
		kind,
		mut job,
		token,
		started_at,
	} = dispatched;
	let WorkerContext { queue, store, events } = ctx;

	let _in_flight = InFlightGuard {
		queue: queue.as_ref(),
		id: id.clone(),
	};

	persist_or_warn(
		&id,
		store
			.update_operation_status(&id, OperationStatus::Running, STARTED_MESSAGE)
			.await,
	);
	persist_or_warn(
		&id,
		store
			.add_operation_log(&id, LogLevel::Info, STARTED_MESSAGE, None)
			.await,
	);
	let _ = events.send(OperationEvent::Started {
		id: id.clone(),
		kind: kind.clone(),
		started_at,
	});
	metrics::record_started(&kind);
	info!("Operation started");
	let clock = Instant::now();

	let interrupter = Interrupter::new(token);
	let reporter = ProgressReporter::new(
		id.clone(),
		store.clone(),
		interrupter.clone(),
		events.clone(),
	);

	let outcome = match AssertUnwindSafe(job.run(&interrupter, &reporter))
		.catch_unwind()
		.await
	{
		Ok(Ok(ExecStatus::Canceled)) => Outcome::Canceled,
		Ok(Ok(ExecStatus::Done)) if interrupter.has_observed_cancel() => Outcome::Canceled,
		Ok(Ok(ExecStatus::Done)) => Outcome::Completed,
		Ok(Err(e)) => {
			error!(?e, "Operation failed;");
			Outcome::Failed {
				message: e.to_string(),
				details: Some(format!("{e:?}")),
			}
		}
		Err(panic) => {
			let payload = panic_message(panic.as_ref());
			let details = match take_panic_backtrace() {
				Some(backtrace) => format!("{payload}\n\nstack backtrace:\n{backtrace}"),
				None => payload.clone(),
			};
			error!(%payload, "Operation panicked;");
			Outcome::Failed {
				message: format!("operation panicked: {payload}"),
				details: Some(details),
			}
		}
	};

	// From here on the worker is the only writer again
	reporter.finish().await;
	drop(job);

	let status = finalize(store.as_ref(), events, &id, outcome).await;
	metrics::record_finished(&kind, status, Some(clock.elapsed()));
}

async fn finalize(
	store: &dyn OperationStore,
	events: &broadcast::Sender<OperationEvent>,
	id: &OperationId,
	outcome: Outcome,
) -> OperationStatus {
	let (status, level, message, details) = match outcome {
		Outcome::Completed => (
			OperationStatus::Completed,
			LogLevel::Info,
			COMPLETED_MESSAGE.to_owned(),
			None,
		),
		Outcome::Canceled => (
			OperationStatus::Canceled,
			LogLevel::Warn,
			CANCELED_MESSAGE.to_owned(),
			None,
		),
		Outcome::Failed { message, details } => {
			(OperationStatus::Failed, LogLevel::Error, message, details)
		}
	};

	// Log line first: the terminal status closes the record to further writes
	persist_or_warn(
		id,
		store
			.add_operation_log(id, level, &message, details.as_deref())
			.await,
	);
	persist_or_warn(
		id,
		store.update_operation_status(id, status, &message).await,
	);

	let _ = events.send(OperationEvent::Log {
		id: id.clone(),
		level,
		message: message.clone(),
	});
	let _ = events.send(OperationEvent::Finished {
		id: id.clone(),
		status,
		message,
	});

	info!(%status, "Operation finished");

	status
}

/// Records an operation that was dropped from the queue before any worker touched it.
pub(crate) async fn finalize_unstarted(
	store: &dyn OperationStore,
	events: &broadcast::Sender<OperationEvent>,
	id: &OperationId,
	kind: &str,
	message: &str,
) {
	persist_or_warn(
		id,
		store
			.add_operation_log(id, LogLevel::Warn, message, None)
			.await,
	);
	persist_or_warn(
		id,
		store
			.update_operation_status(id, OperationStatus::Canceled, message)
			.await,
	);

	let _ = events.send(OperationEvent::Finished {
		id: id.clone(),
		status: OperationStatus::Canceled,
		message: message.to_owned(),
	});

	metrics::record_finished(kind, OperationStatus::Canceled, None);
}

/// Store failures never abort an operation, they only leave a trace.
fn persist_or_warn<E: std::fmt::Display>(id: &OperationId, res: Result<(), E>) {
	if let Err(e) = res {
		warn!(operation_id = %id, "Failed to persist operation state: {e:#}");
	}
}
