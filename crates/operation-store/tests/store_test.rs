use std::sync::Arc;

use shelf_operation_store::{
	LogLevel, MemoryStore, OperationId, OperationStatus, OperationStore, SqliteStore, StoreError,
};

use tempfile::tempdir;
use tracing_test::traced_test;

async fn lifecycle_is_forward_only(store: &dyn OperationStore) {
	let id = OperationId::from("scan-1");

	let record = store
		.create_operation(&id, "scan", Some("/music"))
		.await
		.unwrap();
	assert_eq!(record.status, OperationStatus::Queued);
	assert_eq!(record.target.as_deref(), Some("/music"));
	assert!(matches!(
		store.create_operation(&id, "scan", None).await,
		Err(StoreError::AlreadyExists(_))
	));

	store
		.update_operation_status(&id, OperationStatus::Running, "operation started")
		.await
		.unwrap();
	store
		.update_operation_progress(&id, 3, 10, "processing")
		.await
		.unwrap();

	let running = store.get_operation_by_id(&id).await.unwrap();
	assert_eq!(running.status, OperationStatus::Running);
	assert_eq!((running.current, running.total), (3, 10));
	assert!(running.started_at.is_some());
	assert!(running.completed_at.is_none());

	store
		.update_operation_status(&id, OperationStatus::Failed, "disk vanished")
		.await
		.unwrap();

	let failed = store.get_operation_by_id(&id).await.unwrap();
	assert_eq!(failed.status, OperationStatus::Failed);
	assert_eq!(failed.error_message.as_deref(), Some("disk vanished"));
	assert!(failed.completed_at.is_some());

	assert!(matches!(
		store
			.update_operation_status(&id, OperationStatus::Completed, "late")
			.await,
		Err(StoreError::Finished {
			status: OperationStatus::Failed,
			..
		})
	));
	assert!(matches!(
		store.update_operation_progress(&id, 10, 10, "late").await,
		Err(StoreError::Finished { .. })
	));
	assert!(matches!(
		store
			.add_operation_log(&id, LogLevel::Info, "late", None)
			.await,
		Err(StoreError::Finished { .. })
	));
	assert_eq!(
		store.get_operation_by_id(&id).await.unwrap().status,
		OperationStatus::Failed
	);
}

async fn queued_cannot_jump_to_completed(store: &dyn OperationStore) {
	let id = OperationId::new();
	store.create_operation(&id, "import", None).await.unwrap();

	assert!(matches!(
		store
			.update_operation_status(&id, OperationStatus::Completed, "done")
			.await,
		Err(StoreError::InvalidTransition {
			from: OperationStatus::Queued,
			to: OperationStatus::Completed,
			..
		})
	));
}

async fn logs_keep_append_order_and_tail(store: &dyn OperationStore) {
	let id = OperationId::from("organize-1");
	store.create_operation(&id, "organize", None).await.unwrap();

	for i in 0..5 {
		store
			.add_operation_log(&id, LogLevel::Info, &format!("step {i}"), None)
			.await
			.unwrap();
	}
	store
		.add_operation_log(&id, LogLevel::Error, "boom", Some("stack"))
		.await
		.unwrap();

	let all = store.get_operation_logs(&id, None).await.unwrap();
	assert_eq!(all.len(), 6);
	assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));

	let tail = store.get_operation_logs(&id, Some(2)).await.unwrap();
	let messages = tail.iter().map(|e| e.message.as_str()).collect::<Vec<_>>();
	assert_eq!(messages, ["step 4", "boom"]);
	assert_eq!(tail[1].level, LogLevel::Error);
	assert_eq!(tail[1].details.as_deref(), Some("stack"));

	assert!(matches!(
		store.get_operation_logs(&"missing".into(), None).await,
		Err(StoreError::NotFound(_))
	));
}

async fn recent_and_by_status(store: &dyn OperationStore) {
	let ids = ["a", "b", "c"].map(OperationId::from);
	for id in &ids {
		store.create_operation(id, "scan", None).await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(2)).await;
	}
	store
		.update_operation_status(&ids[1], OperationStatus::Running, "operation started")
		.await
		.unwrap();
	store
		.update_operation_status(&ids[2], OperationStatus::Canceled, "canceled")
		.await
		.unwrap();

	let recent = store.get_recent_operations(2).await.unwrap();
	let recent = recent.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
	assert_eq!(recent, ["c", "b"]);

	let pending = store
		.get_operations_by_status(&[OperationStatus::Queued, OperationStatus::Running])
		.await
		.unwrap();
	// Earlier checks on the same store leave their own queued rows behind.
	let pending = pending
		.iter()
		.map(|r| r.id.as_str())
		.filter(|id| ["a", "b", "c"].contains(id))
		.collect::<Vec<_>>();
	assert_eq!(pending, ["a", "b"]);

	assert!(store.get_operations_by_status(&[]).await.unwrap().is_empty());
}

async fn run_contract(store: &dyn OperationStore) {
	lifecycle_is_forward_only(store).await;
	queued_cannot_jump_to_completed(store).await;
	logs_keep_append_order_and_tail(store).await;
	recent_and_by_status(store).await;
}

#[tokio::test]
#[traced_test]
async fn memory_store_contract() {
	run_contract(&MemoryStore::new()).await;
}

#[tokio::test]
#[traced_test]
async fn sqlite_in_memory_store_contract() {
	run_contract(&SqliteStore::open_in_memory().await.unwrap()).await;
}

#[tokio::test]
#[traced_test]
async fn sqlite_store_survives_reopen() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("nested").join("operations.db");
	let id = OperationId::from("write-back-1");

	{
		let store = SqliteStore::open(&path).await.unwrap();
		store.create_operation(&id, "write_back", None).await.unwrap();
		store
			.update_operation_status(&id, OperationStatus::Running, "operation started")
			.await
			.unwrap();
		store
			.add_operation_log(&id, LogLevel::Info, "operation started", None)
			.await
			.unwrap();
	}

	let store = SqliteStore::open(&path).await.unwrap();
	let record = store.get_operation_by_id(&id).await.unwrap();
	assert_eq!(record.status, OperationStatus::Running);
	assert_eq!(record.kind, "write_back");
	assert_eq!(store.get_operation_logs(&id, None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn racing_terminal_moves_settle_once_across_handles() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("operations.db");

	// Two handles on one file share no in-process lock, only the database
	let first = Arc::new(SqliteStore::open(&path).await.unwrap());
	let second = Arc::new(SqliteStore::open(&path).await.unwrap());

	for i in 0..20 {
		let id = OperationId::from(format!("race-{i}"));
		first.create_operation(&id, "scan", None).await.unwrap();
		first
			.update_operation_status(&id, OperationStatus::Running, "operation started")
			.await
			.unwrap();

		let completing = tokio::spawn({
			let store = Arc::clone(&first);
			let id = id.clone();
			async move {
				store
					.update_operation_status(&id, OperationStatus::Completed, "done")
					.await
			}
		});
		let canceling = tokio::spawn({
			let store = Arc::clone(&second);
			let id = id.clone();
			async move {
				store
					.update_operation_status(&id, OperationStatus::Canceled, "canceled")
					.await
			}
		});

		let results = [completing.await.unwrap(), canceling.await.unwrap()];
		assert_eq!(
			results.iter().filter(|result| result.is_ok()).count(),
			1,
			"{results:?}"
		);

		let record = second.get_operation_by_id(&id).await.unwrap();
		let expected = if results[0].is_ok() {
			OperationStatus::Completed
		} else {
			OperationStatus::Canceled
		};
		assert_eq!(record.status, expected);
	}
}
