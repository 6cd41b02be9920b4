use std::sync::Arc;

use shelf_operation_store::OperationStore;
use tokio::{spawn, sync::broadcast, task::JoinHandle};
use tracing::{error, info, instrument, trace, Instrument};

use super::{error::RunError, event::OperationEvent, queue::OperationQueue};

mod run;

pub(crate) use run::finalize_unstarted;

pub type WorkerId = usize;

/// Everything a worker shares with the scheduler.
pub(crate) struct WorkerContext<E: RunError> {
	pub(crate) queue: Arc<OperationQueue<E>>,
	pub(crate) store: Arc<dyn OperationStore>,
	pub(crate) events: broadcast::Sender<OperationEvent>,
}

impl<E: RunError> Clone for WorkerContext<E> {
	fn clone(&self) -> Self {
		Self {
			queue: Arc::clone(&self.queue),
			store: Arc::clone(&self.store),
			events: self.events.clone(),
		}
	}
}

/// One execution slot of the scheduler.
#[derive(Debug)]
pub(crate) struct Worker {
	pub(crate) id: WorkerId,
	pub(crate) handle: JoinHandle<()>,
}

impl Worker {
	#[instrument(name = "scheduler_worker", skip(ctx), fields(worker_id = id))]
	pub(crate) fn spawn<E: RunError>(id: WorkerId, ctx: WorkerContext<E>) -> Self {
		let handle = spawn(
			async move {
				trace!("Worker loop starting...");
				// Job panics are caught inside the loop, this only restarts the loop itself
				// if something in the scheduler plumbing blows up.
				while let Err(e) = spawn(run::run(id, ctx.clone()).in_current_span()).await {
					if e.is_panic() {
						error!(?e, "Worker critically failed and will restart;");
					} else {
						trace!("Worker loop was aborted and will exit...");
						break;
					}
				}

				info!("Worker gracefully shutdown");
			}
			.in_current_span(),
		);

		Self { id, handle }
	}
}
