#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use shelf_operation_store::{MemoryStore, OperationId, OperationRecord, OperationStore};
use shelf_task_system::{Scheduler, SchedulerConfig};

pub mod jobs;

use jobs::SampleError;

pub fn new_scheduler(workers: usize) -> (Arc<MemoryStore>, Scheduler<SampleError>) {
	let store = Arc::new(MemoryStore::new());
	let scheduler = Scheduler::new(
		Arc::clone(&store) as Arc<dyn OperationStore>,
		SchedulerConfig { workers },
	);

	(store, scheduler)
}

pub async fn new_operation(store: &dyn OperationStore, id: &str, kind: &str) -> OperationId {
	let id = OperationId::from(id);
	store.create_operation(&id, kind, None).await.unwrap();
	id
}

/// Polls the store until the record reaches a terminal status.
pub async fn wait_for_terminal(store: &dyn OperationStore, id: &OperationId) -> OperationRecord {
	tokio::time::timeout(Duration::from_secs(10), async {
		loop {
			let record = store.get_operation_by_id(id).await.unwrap();
			if record.status.is_terminal() {
				return record;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("operation {id} never finished"))
}

/// Polls the scheduler until `id` is held by a worker.
pub async fn wait_until_active(scheduler: &Scheduler<SampleError>, id: &OperationId) {
	tokio::time::timeout(Duration::from_secs(10), async {
		while !scheduler
			.active_operations()
			.iter()
			.any(|active| &active.id == id)
		{
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("operation {id} never started"));
}

/// Polls the scheduler until no worker holds an operation.
pub async fn wait_until_idle(scheduler: &Scheduler<SampleError>) {
	tokio::time::timeout(Duration::from_secs(10), async {
		while !scheduler.active_operations().is_empty() {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await
	.expect("workers never went idle");
}
