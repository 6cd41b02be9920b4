use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use shelf_operation_store::LogLevel;
use shelf_task_system::{
	check_interruption, report_error, ExecStatus, FanOut, FanOutSummary, Interrupter, Job,
	ProgressReporter,
};
use tokio::{sync::oneshot, time::sleep};

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
	#[error("sample error: {0}")]
	Boom(String),
}

/// Finishes right away.
#[derive(Debug, Default)]
pub struct ReadyJob;

#[async_trait]
impl Job<SampleError> for ReadyJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done)
	}
}

/// Holds its worker until the gate is opened or dropped.
#[derive(Debug)]
pub struct GateJob {
	gate: Option<oneshot::Receiver<()>>,
}

impl GateJob {
	pub fn new() -> (Self, oneshot::Sender<()>) {
		let (tx, rx) = oneshot::channel();
		(Self { gate: Some(rx) }, tx)
	}
}

#[async_trait]
impl Job<SampleError> for GateJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		if let Some(gate) = self.gate.take() {
			let _ = gate.await;
		}
		Ok(ExecStatus::Done)
	}
}

/// Appends its name to a shared list when it starts, then sleeps a bit.
#[derive(Debug)]
pub struct RecordStartJob {
	pub name: &'static str,
	pub starts: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Job<SampleError> for RecordStartJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		self.starts.lock().unwrap().push(self.name);
		sleep(Duration::from_millis(10)).await;
		Ok(ExecStatus::Done)
	}
}

/// Loops up to `max` times, sleeping 1ms and checking for cancellation on each turn.
#[derive(Debug)]
pub struct LoopingJob {
	pub max: usize,
	pub iterations: Arc<AtomicUsize>,
}

#[async_trait]
impl Job<SampleError> for LoopingJob {
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		for i in 0..self.max {
			check_interruption!(interrupter);

			sleep(Duration::from_millis(1)).await;
			self.iterations.fetch_add(1, Ordering::SeqCst);
			report_error(
				&progress
					.update_progress(i as u64 + 1, self.max as u64, "looping")
					.await,
			);
		}

		Ok(ExecStatus::Done)
	}
}

/// Waits for a cancel request that may never come.
#[derive(Debug, Default)]
pub struct NeverJob;

#[async_trait]
impl Job<SampleError> for NeverJob {
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		interrupter.await;
		Ok(ExecStatus::Canceled)
	}
}

/// Sleeps through any cancel request and reports success.
#[derive(Debug)]
pub struct DeafJob(pub Duration);

#[async_trait]
impl Job<SampleError> for DeafJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		sleep(self.0).await;
		Ok(ExecStatus::Done)
	}
}

#[derive(Debug)]
pub struct FailingJob(pub &'static str);

#[async_trait]
impl Job<SampleError> for FailingJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		Err(SampleError::Boom(self.0.to_owned()))
	}
}

#[derive(Debug)]
pub struct PanicJob;

#[async_trait]
impl Job<SampleError> for PanicJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		report_error(&progress.log(LogLevel::Info, "about to misbehave", None).await);
		panic!("job body exploded");
	}
}

/// Tracks how many jobs run at the same time.
#[derive(Debug)]
pub struct OverlapJob {
	pub running: Arc<AtomicUsize>,
	pub max_seen: Arc<AtomicUsize>,
	pub hold: Duration,
}

#[async_trait]
impl Job<SampleError> for OverlapJob {
	async fn run(
		&mut self,
		_: &Interrupter,
		_: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_seen.fetch_max(now, Ordering::SeqCst);
		sleep(self.hold).await;
		self.running.fetch_sub(1, Ordering::SeqCst);
		Ok(ExecStatus::Done)
	}
}

pub type SharedSummary = Arc<Mutex<Option<FanOutSummary<usize, SampleError>>>>;

/// Pushes `items` numbers through a fan-out pool, each item sleeping `item_delay`.
/// Items listed in `failing` error out, items listed in `panicking` panic.
#[derive(Debug)]
pub struct FanOutJob {
	pub items: usize,
	pub expected_total: u64,
	pub workers: usize,
	pub item_delay: Duration,
	pub failing: Vec<usize>,
	pub panicking: Vec<usize>,
	/// Panic while building the item's future, before anything is awaited.
	pub panicking_eagerly: Vec<usize>,
	/// Reports `Done` even when the pool stopped early.
	pub ignore_cancel: bool,
	pub processed: Arc<Mutex<Vec<usize>>>,
	pub summary: SharedSummary,
}

impl FanOutJob {
	pub fn new(items: usize, workers: usize) -> Self {
		Self {
			items,
			expected_total: items as u64,
			workers,
			item_delay: Duration::from_millis(1),
			failing: vec![],
			panicking: vec![],
			panicking_eagerly: vec![],
			ignore_cancel: false,
			processed: Arc::default(),
			summary: Arc::default(),
		}
	}
}

#[async_trait]
impl Job<SampleError> for FanOutJob {
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, SampleError> {
		let processed = Arc::clone(&self.processed);
		let failing = self.failing.clone();
		let panicking = self.panicking.clone();
		let panicking_eagerly = self.panicking_eagerly.clone();
		let delay = self.item_delay;

		let summary = FanOut::new(self.workers)
			.run(
				0..self.items,
				self.expected_total,
				interrupter,
				progress,
				move |item| {
					if panicking_eagerly.contains(&item) {
						panic!("item {item} refused to start");
					}
					let processed = Arc::clone(&processed);
					let fails = failing.contains(&item);
					let panics = panicking.contains(&item);
					async move {
						sleep(delay).await;
						processed.lock().unwrap().push(item);
						if panics {
							panic!("item {item} exploded");
						}
						if fails {
							return Err(SampleError::Boom(format!("item {item}")));
						}
						Ok(item * 2)
					}
				},
			)
			.await;

		let canceled = summary.canceled;
		*self.summary.lock().unwrap() = Some(summary);

		Ok(if canceled && !self.ignore_cancel {
			ExecStatus::Canceled
		} else {
			ExecStatus::Done
		})
	}
}
