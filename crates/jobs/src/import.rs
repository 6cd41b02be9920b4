use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_operation_store::LogLevel;
use shelf_task_system::{
	check_interruption, report_error, ExecStatus, Interrupter, Job, ProgressReporter,
};
use tracing::instrument;

use crate::{count, error::Error};

/// One title of an external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
	/// Identifier inside the external catalog.
	pub key: String,
	pub title: String,
	pub location: Option<PathBuf>,
}

#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
	/// Reads the whole catalog.
	async fn entries(&self) -> Result<Vec<CatalogEntry>, Error>;

	async fn import(&self, entry: &CatalogEntry) -> Result<(), Error>;
}

/// Imports an external catalog one entry at a time.
///
/// Not being able to read the catalog fails the operation, a single entry that doesn't
/// import is only logged.
pub struct ImportJob {
	source: Arc<dyn CatalogSource>,
}

impl ImportJob {
	pub fn new(source: Arc<dyn CatalogSource>) -> Self {
		Self { source }
	}
}

#[async_trait]
impl Job<Error> for ImportJob {
	#[instrument(skip_all)]
	async fn run(
		&mut self,
		interrupter: &Interrupter,
		progress: &ProgressReporter,
	) -> Result<ExecStatus, Error> {
		let entries = self.source.entries().await?;
		let total = count(entries.len());

		report_error(
			&progress
				.log(
					LogLevel::Info,
					format!("importing {total} catalog entries"),
					None,
				)
				.await,
		);

		let mut imported = 0;
		let mut failed = 0;
		for (index, entry) in entries.iter().enumerate() {
			check_interruption!(interrupter);

			match self.source.import(entry).await {
				Ok(()) => imported += 1,
				Err(e) => {
					failed += 1;
					report_error(
						&progress
							.log(
								LogLevel::Warn,
								format!("failed to import '{}' <key='{}'>", entry.title, entry.key),
								Some(&e.to_string()),
							)
							.await,
					);
				}
			}

			report_error(
				&progress
					.update_progress(
						count(index + 1),
						total,
						format!("imported {}/{total}: {}", index + 1, entry.title),
					)
					.await,
			);
		}

		report_error(
			&progress
				.log(
					LogLevel::Info,
					format!("import finished: {imported} imported, {failed} failed"),
					None,
				)
				.await,
		);

		Ok(ExecStatus::Done)
	}
}
