use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_operation_store::LogLevel;
use shelf_task_system::{
	check_interruption, report_error, ExecStatus, Interrupter, Job, ProgressReporter,
};
use tracing::instrument;

use crate::{count, error::Error};

/// A new location to publish back to an external library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBackItem {
	pub key: String,
	pub location: PathBuf,
}

#[async_trait]
pub trait WriteBackClient: Send + Sync + 'static {
	async fn write_batch(&self, batch: &[WriteBackItem]) -> Result<(), Error>;
}

/// Publishes updated locations in batches. Batches are not retried: the first one that
/// fails fails the operation, and earlier batches stay written.
pub struct WriteBackJob {
	items: Vec<WriteBackItem>,
	batch_size: usize,
	client: Arc<dyn WriteBackClient>,
}

impl WriteBackJob {
	pub fn new(items: Vec<WriteBackItem>, client: Arc<dyn WriteBackClient>) -> Self {
		Self {
			items,
			batch_size: 50,
			client,
		}
	}

	#[must_use]
	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size.max(1);
		self
	}
}

#[async_trait]
impl Job<Error> for WriteBackJob {
	#[instrument(skip_all, fields(items = self.items.len(), batch_size = self.batch_size))]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, Error> {
		let total = count(self.items.len());
		let batches = self.items.len().div_ceil(self.batch_size);
		let mut written = 0;

		for (batch, items) in self.items.chunks(self.batch_size).enumerate() {
			check_interruption!(interrupter);

			self.client
				.write_batch(items)
				.await
				.map_err(|e| Error::WriteBack {
					batch: batch + 1,
					source: Box::new(e),
				})?;

			written += items.len();
			report_error(
				&progress
					.update_progress(
						count(written),
						total,
						format!("wrote batch {}/{batches}", batch + 1),
					)
					.await,
			);
		}

		report_error(
			&progress
				.log(
					LogLevel::Info,
					format!("write-back finished: {written} locations in {batches} batches"),
					None,
				)
				.await,
		);

		Ok(ExecStatus::Done)
	}
}
