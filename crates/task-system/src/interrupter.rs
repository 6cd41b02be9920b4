use std::{
	future::{Future, IntoFuture},
	pin::Pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	task::{Context, Poll},
};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::trace;

/// The cooperative stop signal handed to a running job.
///
/// Cancel requests are never forced on the job: it decides where it is safe to stop by
/// checking [`Interrupter::is_canceled`] (or awaiting the interrupter). Any positive check
/// is remembered, so the worker can tell a job that saw the request from one that
/// finished without looking.
#[derive(Debug, Clone)]
pub struct Interrupter {
	token: CancellationToken,
	observed: Arc<AtomicBool>,
}

impl Interrupter {
	pub(crate) fn new(token: CancellationToken) -> Self {
		Self {
			token,
			observed: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Non-blocking check for a pending cancel request.
	pub fn is_canceled(&self) -> bool {
		let canceled = self.token.is_cancelled();
		if canceled && !self.observed.swap(true, Ordering::AcqRel) {
			trace!("Interrupter observed cancel request");
		}

		canceled
	}

	/// A new interrupter that fires together with this one, for pools spun up inside a job.
	/// A cancel the child observes counts as observed by the job itself.
	#[must_use]
	pub fn child(&self) -> Self {
		Self {
			token: self.token.child_token(),
			observed: Arc::clone(&self.observed),
		}
	}

	pub(crate) fn has_observed_cancel(&self) -> bool {
		self.observed.load(Ordering::Acquire)
	}
}

pin_project_lite::pin_project! {
	/// Resolves once a cancel is requested for the job.
	#[must_use = "`InterrupterFuture` does nothing unless polled"]
	pub struct InterrupterFuture<'recv> {
		#[pin]
		fut: WaitForCancellationFuture<'recv>,
		observed: &'recv AtomicBool,
	}
}

impl Future for InterrupterFuture<'_> {
	type Output = ();

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();

		match this.fut.poll(cx) {
			Poll::Ready(()) => {
				trace!("Running job received cancel request");
				this.observed.store(true, Ordering::Release);
				Poll::Ready(())
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Lets a job `select!` on `interrupter` next to its own work.
impl<'recv> IntoFuture for &'recv Interrupter {
	type Output = ();

	type IntoFuture = InterrupterFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		InterrupterFuture {
			fut: self.token.cancelled(),
			observed: &self.observed,
		}
	}
}

/// Returns `Ok(ExecStatus::Canceled)` from the enclosing job if a cancel was requested.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:expr) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		if interrupter.is_canceled() {
			::tracing::trace!("Operation was canceled by the user");
			return Ok($crate::ExecStatus::Canceled);
		}
	};
}
