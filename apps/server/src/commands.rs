use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use shelf_config::AppConfig;
use shelf_jobs::{kind, MetadataProcessor, ScanJob};
use shelf_operation_store::{OperationId, OperationRecord, OperationStore};
use shelf_task_system::{
	recover_interrupted_operations, OperationEvent, Priority, Scheduler, SchedulerConfig,
};
use tokio::{signal, sync::broadcast::error::RecvError};
use tracing::{info, warn};

pub async fn scan(
	config: &AppConfig,
	store: Arc<dyn OperationStore>,
	path: PathBuf,
	priority: Priority,
	metrics: Option<&PrometheusHandle>,
) -> Result<()> {
	let path = path
		.canonicalize()
		.with_context(|| format!("Failed to resolve {}", path.display()))?;

	// Leftovers of a crashed run would otherwise look like they are still going
	let recovered = recover_interrupted_operations(store.as_ref()).await?;
	if !recovered.is_empty() {
		info!(count = recovered.len(), "Recovered interrupted operations");
	}

	let scheduler = Scheduler::<shelf_jobs::Error>::new(
		Arc::clone(&store),
		SchedulerConfig {
			workers: config.scheduler.workers,
		},
	);
	let mut events = scheduler.subscribe();

	let id = OperationId::new();
	let target = path.to_string_lossy();
	store
		.create_operation(&id, kind::SCAN, Some(target.as_ref()))
		.await?;

	let job = ScanJob::new(&path, Arc::new(MetadataProcessor))
		.with_extensions(&config.scan.extensions)
		.with_fanout_workers(config.scan.fanout_workers);
	scheduler.enqueue(id.clone(), kind::SCAN, priority, job)?;
	println!("operation {id} queued");

	let mut cancel_requested = false;
	loop {
		tokio::select! {
			event = events.recv() => match event {
				Ok(event) if event.operation_id() == &id => {
					if print_event(&event) {
						break;
					}
				}
				Ok(_) => {}
				Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
				Err(RecvError::Closed) => break,
			},
			res = signal::ctrl_c(), if !cancel_requested => {
				res.context("Failed to listen for Ctrl-C")?;
				cancel_requested = true;
				println!("canceling {id}...");
				scheduler.cancel(&id).await?;
			}
		}
	}

	scheduler
		.shutdown(Duration::from_secs(config.scheduler.shutdown_timeout_secs))
		.await?;

	print_record(&store.get_operation_by_id(&id).await?)?;

	if let Some(metrics) = metrics {
		print!("{}", metrics.render());
	}

	Ok(())
}

/// Returns `true` once the operation is finished.
fn print_event(event: &OperationEvent) -> bool {
	match event {
		OperationEvent::Queued { .. } => false,
		OperationEvent::Started { kind, .. } => {
			println!("{kind} started");
			false
		}
		OperationEvent::Progress {
			current,
			total,
			message,
			..
		} => {
			println!("[{current}/{total}] {message}");
			false
		}
		OperationEvent::Log { level, message, .. } => {
			println!("{level}: {message}");
			false
		}
		OperationEvent::Finished {
			status, message, ..
		} => {
			println!("{status}: {message}");
			true
		}
	}
}

pub async fn status(store: &dyn OperationStore, id: &OperationId) -> Result<()> {
	print_record(&store.get_operation_by_id(id).await?)
}

pub async fn logs(store: &dyn OperationStore, id: &OperationId, tail: Option<usize>) -> Result<()> {
	for entry in store.get_operation_logs(id, tail).await? {
		println!(
			"{} {:>5} {}",
			entry.created_at.to_rfc3339(),
			entry.level.as_str(),
			entry.message
		);
		if let Some(details) = entry.details {
			println!("      {details}");
		}
	}

	Ok(())
}

pub async fn recent(store: &dyn OperationStore, limit: usize) -> Result<()> {
	for record in store.get_recent_operations(limit).await? {
		println!(
			"{}  {:<10} {:<9} {}/{}  {}",
			record.id,
			record.kind,
			record.status.as_str(),
			record.current,
			record.total,
			record.message
		);
	}

	Ok(())
}

pub async fn recover(store: &dyn OperationStore) -> Result<()> {
	let recovered = recover_interrupted_operations(store).await?;
	if recovered.is_empty() {
		println!("nothing to recover");
	}
	for id in recovered {
		println!("{id} marked failed");
	}

	Ok(())
}

fn print_record(record: &OperationRecord) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(record)?);

	Ok(())
}
