use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_operation_store::LogLevel;
use shelf_task_system::{report_error, ExecStatus, FanOut, Interrupter, Job, ProgressReporter};
use tracing::instrument;

use crate::{count, error::Error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganizeOutcome {
	Moved { from: PathBuf, to: PathBuf },
	Skipped { path: PathBuf, reason: String },
}

/// Decides where a file belongs and puts it there.
#[async_trait]
pub trait Organizer: Send + Sync + 'static {
	async fn organize(&self, file: PathBuf) -> Result<OrganizeOutcome, Error>;
}

/// Runs an [`Organizer`] over a set of files in parallel. A file that can't be organized
/// is logged and the rest carry on.
pub struct OrganizeJob {
	files: Vec<PathBuf>,
	fanout_workers: usize,
	organizer: Arc<dyn Organizer>,
}

impl OrganizeJob {
	pub fn new(files: Vec<PathBuf>, organizer: Arc<dyn Organizer>) -> Self {
		Self {
			files,
			fanout_workers: 4,
			organizer,
		}
	}

	#[must_use]
	pub const fn with_fanout_workers(mut self, workers: usize) -> Self {
		self.fanout_workers = workers;
		self
	}
}

#[async_trait]
impl Job<Error> for OrganizeJob {
	#[instrument(skip_all, fields(files = self.files.len()))]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, Error> {
		let total = count(self.files.len());

		let organizer = Arc::clone(&self.organizer);
		let summary = FanOut::new(self.fanout_workers)
			.with_label("files")
			.run(
				self.files.iter().cloned(),
				total,
				interrupter,
				progress,
				move |file: PathBuf| {
					let organizer = Arc::clone(&organizer);
					async move { organizer.organize(file).await }
				},
			)
			.await;

		let mut moved = 0;
		let mut skipped = 0;
		for (_, outcome) in &summary.outputs {
			match outcome {
				OrganizeOutcome::Moved { from, to } => {
					moved += 1;
					report_error(
						&progress
							.log(
								LogLevel::Debug,
								format!("moved {} to {}", from.display(), to.display()),
								None,
							)
							.await,
					);
				}
				OrganizeOutcome::Skipped { path, reason } => {
					skipped += 1;
					report_error(
						&progress
							.log(
								LogLevel::Info,
								format!("skipped {}", path.display()),
								Some(reason),
							)
							.await,
					);
				}
			}
		}

		for (index, failure) in &summary.failures {
			report_error(
				&progress
					.log(
						LogLevel::Warn,
						format!("failed to organize {}", self.files[*index].display()),
						Some(&failure.to_string()),
					)
					.await,
			);
		}

		if summary.canceled {
			return Ok(ExecStatus::Canceled);
		}

		report_error(
			&progress
				.log(
					LogLevel::Info,
					format!(
						"organize finished: {moved} moved, {skipped} skipped, {} failed",
						summary.failures.len()
					),
					None,
				)
				.await,
		);

		Ok(ExecStatus::Done)
	}
}
