use std::{fmt, sync::Arc};

use shelf_operation_store::{LogLevel, OperationId, OperationStore};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::{error::ReportError, event::OperationEvent, interrupter::Interrupter};

#[derive(Debug, Default)]
struct ReportState {
	finished: bool,
	current: u64,
	total: u64,
}

struct Inner {
	operation_id: OperationId,
	store: Arc<dyn OperationStore>,
	interrupter: Interrupter,
	events: broadcast::Sender<OperationEvent>,
	state: Mutex<ReportState>,
}

/// Handle a running job uses to persist progress and log lines, bound to one operation.
///
/// Cheap to clone and safe to share with a job's own helper tasks. Every write goes
/// straight to the store, one at a time, so concurrent callers can never leave a half
/// updated row behind. Once the worker has finished the operation, writes are refused
/// with [`ReportError::Finished`].
#[derive(Clone)]
pub struct ProgressReporter {
	inner: Arc<Inner>,
}

impl fmt::Debug for ProgressReporter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProgressReporter")
			.field("operation_id", &self.inner.operation_id)
			.finish_non_exhaustive()
	}
}

impl ProgressReporter {
	pub(crate) fn new(
		operation_id: OperationId,
		store: Arc<dyn OperationStore>,
		interrupter: Interrupter,
		events: broadcast::Sender<OperationEvent>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				operation_id,
				store,
				interrupter,
				events,
				state: Mutex::default(),
			}),
		}
	}

	#[must_use]
	pub fn operation_id(&self) -> &OperationId {
		&self.inner.operation_id
	}

	/// Persists progress. `total` is advisory: when `current` runs past it, the total is
	/// raised to match instead of showing more work done than exists.
	pub async fn update_progress(
		&self,
		current: u64,
		total: u64,
		message: impl AsRef<str> + Send,
	) -> Result<(), ReportError> {
		let Inner {
			operation_id,
			store,
			events,
			state,
			..
		} = &*self.inner;
		let message = message.as_ref();

		let mut state = state.lock().await;
		if state.finished {
			return Err(ReportError::Finished(operation_id.clone()));
		}

		let total = total.max(current);
		store
			.update_operation_progress(operation_id, current, total, message)
			.await?;
		state.current = current;
		state.total = total;

		// No subscribers is fine
		let _ = events.send(OperationEvent::Progress {
			id: operation_id.clone(),
			current,
			total,
			message: message.to_owned(),
		});

		Ok(())
	}

	/// Appends one entry to the operation's log trail, mirrored to tracing.
	pub async fn log(
		&self,
		level: LogLevel,
		message: impl AsRef<str> + Send,
		details: Option<&str>,
	) -> Result<(), ReportError> {
		let Inner {
			operation_id,
			store,
			events,
			state,
			..
		} = &*self.inner;
		let message = message.as_ref();

		let state = state.lock().await;
		if state.finished {
			return Err(ReportError::Finished(operation_id.clone()));
		}

		match level {
			LogLevel::Debug => debug!(%operation_id, ?details, "{message}"),
			LogLevel::Info => info!(%operation_id, ?details, "{message}"),
			LogLevel::Warn => warn!(%operation_id, ?details, "{message}"),
			LogLevel::Error => error!(%operation_id, ?details, "{message}"),
		}

		store
			.add_operation_log(operation_id, level, message, details)
			.await?;

		let _ = events.send(OperationEvent::Log {
			id: operation_id.clone(),
			level,
			message: message.to_owned(),
		});

		Ok(())
	}

	/// Non-blocking check of the cooperative stop flag.
	pub fn is_canceled(&self) -> bool {
		self.inner.interrupter.is_canceled()
	}

	/// Last persisted `(current, total)` pair.
	pub async fn last_progress(&self) -> (u64, u64) {
		let state = self.inner.state.lock().await;
		(state.current, state.total)
	}

	/// Closes the reporter. Waits for a write already in flight, so nothing the job
	/// reports can land after the terminal status.
	pub(crate) async fn finish(&self) {
		self.inner.state.lock().await.finished = true;
	}
}
