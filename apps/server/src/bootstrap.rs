use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use shelf_config::{default_data_dir, AppConfig};
use shelf_operation_store::{OperationStore, SqliteStore};
use shelf_task_system::metrics::{describe_metrics, OPERATION_DURATION, OPERATION_DURATION_BUCKETS};
use tracing::info;
use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn load_config(data_dir: Option<PathBuf>) -> Result<AppConfig> {
	let data_dir = match data_dir {
		Some(dir) => {
			fs::create_dir_all(&dir)
				.with_context(|| format!("Failed to create data directory {}", dir.display()))?;
			dir
		}
		None => default_data_dir()?,
	};

	AppConfig::load_from(&data_dir)
}

/// Console goes to stderr so command output on stdout stays clean. The returned guard
/// flushes the log file when dropped.
pub fn init_tracing(config: &AppConfig) -> Result<WorkerGuard> {
	let logs_dir = config.logs_dir();
	fs::create_dir_all(&logs_dir)
		.with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

	let (file_writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
		Rotation::DAILY,
		&logs_dir,
		"shelf.log",
	));

	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
		)
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_writer(std::io::stderr),
		)
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_ansi(false)
				.with_writer(file_writer),
		)
		.try_init()
		.context("Failed to initialize tracing")?;

	info!(data_dir = %config.data_dir.display(), "Shelf starting");

	Ok(guard)
}

pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn OperationStore>> {
	let store = SqliteStore::open(config.database_path())
		.await
		.context("Failed to open the operations database")?;

	Ok(Arc::new(store))
}

/// Installs the process-wide Prometheus recorder. The handle renders the text exposition.
pub fn init_metrics() -> Result<PrometheusHandle> {
	let handle = PrometheusBuilder::new()
		.set_buckets_for_metric(
			Matcher::Full(OPERATION_DURATION.to_owned()),
			&OPERATION_DURATION_BUCKETS,
		)?
		.install_recorder()
		.context("Failed to install the metrics recorder")?;

	describe_metrics();
	info!("Prometheus metrics initialized");

	Ok(handle)
}
