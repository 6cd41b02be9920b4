use std::{fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::future::Join;
use tokio::spawn;
use tracing::{error, trace, Instrument};

use super::{
	error::{panic_message, report_error, take_panic_backtrace},
	interrupter::Interrupter,
	progress::ProgressReporter,
};

/// Why a single item of a [`FanOut`] run didn't produce an output.
#[derive(Debug)]
pub enum ItemFailure<E> {
	Error(E),
	Panic(String),
	/// The sub-worker handling the item died without reporting it.
	Lost,
}

impl<E: fmt::Display> fmt::Display for ItemFailure<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error(e) => write!(f, "{e}"),
			Self::Panic(payload) => write!(f, "item processing panicked: {payload}"),
			Self::Lost => write!(f, "item was lost by a fan-out sub-worker"),
		}
	}
}

impl<E: std::error::Error + 'static> std::error::Error for ItemFailure<E> {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Error(e) => Some(e),
			Self::Panic(_) | Self::Lost => None,
		}
	}
}

#[derive(Debug)]
pub struct FanOutSummary<T, E> {
	/// Successful outputs keyed by the item's position in the input, ascending.
	pub outputs: Vec<(usize, T)>,
	/// Failed items keyed by the item's position in the input, ascending.
	pub failures: Vec<(usize, ItemFailure<E>)>,
	pub processed: u64,
	pub total: u64,
	/// Items were left undispatched because the parent operation was canceled.
	pub canceled: bool,
}

/// A bounded pool a job spins up for itself to process many independent items.
///
/// Sized independently from the scheduler. Sub-workers pull items from a shared channel
/// and a single collector turns their results into progress updates, so the reported
/// count only ever goes up and never exceeds the reported total. Once the job's
/// interrupter fires, no new items are dispatched; items already being processed finish.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
	workers: usize,
	label: &'static str,
}

enum FeedEnd {
	Exhausted,
	Canceled,
	PoolGone,
}

impl FanOut {
	#[must_use]
	pub fn new(workers: usize) -> Self {
		Self {
			workers: workers.max(1),
			label: "items",
		}
	}

	/// Noun used in progress messages, `"processed 3/10 {label}"`.
	#[must_use]
	pub const fn with_label(mut self, label: &'static str) -> Self {
		self.label = label;
		self
	}

	/// Processes `items` with `process`, `expected_total` being the best guess of how many
	/// items the iterator yields.
	pub async fn run<Items, I, T, E, F, Fut>(
		&self,
		items: Items,
		expected_total: u64,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
		process: F,
	) -> FanOutSummary<T, E>
	where
		Items: IntoIterator<Item = I>,
		Items::IntoIter: Send,
		I: Send + 'static,
		T: Send + 'static,
		E: Send + 'static,
		F: Fn(I) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
	{
		let interrupter = interrupter.child();
		let process = Arc::new(process);

		let (items_tx, items_rx) = chan::bounded::<(usize, I)>(self.workers * 2);
		let (results_tx, results_rx) = chan::unbounded::<(usize, Result<T, ItemFailure<E>>)>();

		let sub_workers = (0..self.workers)
			.map(|sub_worker_id| {
				spawn(
					sub_worker(
						items_rx.clone(),
						results_tx.clone(),
						interrupter.clone(),
						Arc::clone(&process),
					)
					.instrument(tracing::trace_span!("fan_out_sub_worker", sub_worker_id)),
				)
			})
			.collect::<Vec<_>>();
		drop(items_rx);
		drop(results_tx);

		let feed = async {
			let mut fed = 0;
			for (index, item) in items.into_iter().enumerate() {
				if interrupter.is_canceled() {
					items_tx.close();
					return (FeedEnd::Canceled, fed);
				}
				if items_tx.send((index, item)).await.is_err() {
					error!(fed, "Every fan-out sub-worker is gone, stopping dispatch;");
					return (FeedEnd::PoolGone, fed);
				}
				fed += 1;
			}
			items_tx.close();

			(FeedEnd::Exhausted, fed)
		};

		let collect = async {
			let mut summary = FanOutSummary {
				outputs: vec![],
				failures: vec![],
				processed: 0,
				total: expected_total,
				canceled: false,
			};

			while let Ok((index, result)) = results_rx.recv().await {
				match result {
					Ok(output) => summary.outputs.push((index, output)),
					Err(failure) => summary.failures.push((index, failure)),
				}
				summary.processed += 1;
				summary.total = summary.total.max(summary.processed);
				self.report(progress, summary.processed, summary.total).await;
			}

			summary
		};

		let ((feed_end, fed), mut summary) = (feed, collect).join().await;

		let mut skipped = vec![];
		for res in sub_workers.join().await {
			match res {
				Ok(sub_worker_skipped) => skipped.extend(sub_worker_skipped),
				Err(e) => error!(?e, "Fan-out sub-worker died, its items are reported as lost;"),
			}
		}

		// Every dispatched index must come back as an output, a failure or a skip
		let mut accounted = vec![false; fed];
		for index in summary
			.outputs
			.iter()
			.map(|(index, _)| *index)
			.chain(summary.failures.iter().map(|(index, _)| *index))
			.chain(skipped.iter().copied())
		{
			accounted[index] = true;
		}
		let lost = accounted
			.into_iter()
			.enumerate()
			.filter_map(|(index, seen)| (!seen).then_some(index))
			.collect::<Vec<_>>();
		if !lost.is_empty() {
			error!(?lost, "Fan-out items never produced a result;");
			summary.processed += u64::try_from(lost.len()).unwrap_or(u64::MAX);
			summary.total = summary.total.max(summary.processed);
			summary
				.failures
				.extend(lost.into_iter().map(|index| (index, ItemFailure::Lost)));
			self.report(progress, summary.processed, summary.total).await;
		}

		summary.canceled = matches!(feed_end, FeedEnd::Canceled) || !skipped.is_empty();
		if matches!(feed_end, FeedEnd::Exhausted)
			&& skipped.is_empty()
			&& summary.total > summary.processed
		{
			// The guess was too high, settle on what really existed
			summary.total = summary.processed;
			self.report(progress, summary.processed, summary.total).await;
		}

		summary.outputs.sort_unstable_by_key(|(index, _)| *index);
		summary.failures.sort_unstable_by_key(|(index, _)| *index);

		trace!(
			processed = summary.processed,
			failures = summary.failures.len(),
			canceled = summary.canceled,
			"Fan-out finished"
		);

		summary
	}

	async fn report(&self, progress: &ProgressReporter, processed: u64, total: u64) {
		report_error(
			&progress
				.update_progress(
					processed,
					total,
					format!("processed {processed}/{total} {}", self.label),
				)
				.await,
		);
	}
}

/// Returns the indices of received items it dropped because of cancellation.
async fn sub_worker<I, T, E, F, Fut>(
	items_rx: chan::Receiver<(usize, I)>,
	results_tx: chan::Sender<(usize, Result<T, ItemFailure<E>>)>,
	interrupter: Interrupter,
	process: Arc<F>,
) -> Vec<usize>
where
	F: Fn(I) -> Fut,
	Fut: Future<Output = Result<T, E>>,
{
	let mut skipped = vec![];

	while let Ok((index, item)) = items_rx.recv().await {
		if interrupter.is_canceled() {
			skipped.push(index);
			continue;
		}

		let process_item = &*process;
		// Building the future may panic too, not only polling it
		let result = match AssertUnwindSafe(async move { process_item(item).await })
			.catch_unwind()
			.await
		{
			Ok(result) => result.map_err(ItemFailure::Error),
			Err(panic) => {
				// Item failures carry the payload only
				take_panic_backtrace();
				Err(ItemFailure::Panic(panic_message(panic.as_ref())))
			}
		};

		if results_tx.send((index, result)).await.is_err() {
			break;
		}
	}

	skipped
}
