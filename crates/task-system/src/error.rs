use std::{
	any::Any,
	backtrace::Backtrace,
	cell::RefCell,
	fmt::Display,
	panic,
	sync::Once,
	time::Duration,
};

use shelf_operation_store::{OperationId, StoreError};
use tracing::warn;

/// Bring your own unified error type for job bodies, anything that is a sendable
/// [`std::error::Error`] qualifies.
pub trait RunError: std::error::Error + Send + Sync + 'static {}

impl<T: std::error::Error + Send + Sync + 'static> RunError for T {}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
	#[error("operation already queued or running: <id='{0}'>")]
	AlreadyInFlight(OperationId),
	#[error("scheduler is shutting down and refuses new operations")]
	ShuttingDown,
	#[error("operation not found: <id='{0}'>")]
	OperationNotFound(OperationId),
	#[error("shutdown timed out after {timeout:?}, still running: [{}]", join_ids(.still_running))]
	ShutdownTimeout {
		timeout: Duration,
		still_running: Vec<OperationId>,
	},

	#[error(transparent)]
	Store(#[from] StoreError),
}

/// A progress or log write that didn't reach the store.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
	#[error("operation <id='{0}'> already finished, report dropped")]
	Finished(OperationId),

	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Losing a progress update is less harmful than aborting the operation, so job bodies
/// report these failures and keep going.
pub fn report_error(res: &Result<(), impl Display>) {
	if let Err(e) = res {
		warn!("{e:#}");
	}
}

fn join_ids(ids: &[OperationId]) -> String {
	ids.iter()
		.map(OperationId::as_str)
		.collect::<Vec<_>>()
		.join(", ")
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(|msg| (*msg).to_owned())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic payload".to_owned())
}

thread_local! {
	static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a panic hook that keeps a backtrace of the latest panic on each thread, for
/// [`take_panic_backtrace`] to pick up after unwinding. The previous hook still runs.
pub(crate) fn capture_panic_backtraces() {
	PANIC_HOOK.call_once(|| {
		let previous = panic::take_hook();
		panic::set_hook(Box::new(move |info| {
			let backtrace = Backtrace::force_capture().to_string();
			PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
			previous(info);
		}));
	});
}

/// Must be called on the thread that caught the panic.
pub(crate) fn take_panic_backtrace() -> Option<String> {
	PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}
