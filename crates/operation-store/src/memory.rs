use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
	error::StoreError,
	operation::{LogLevel, OperationId, OperationLogEntry, OperationRecord, OperationStatus},
	OperationStore,
};

#[derive(Debug, Default)]
struct Tables {
	operations: HashMap<OperationId, OperationRecord>,
	logs: HashMap<OperationId, Vec<OperationLogEntry>>,
	next_log_id: i64,
}

/// Process-local store, nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
	tables: RwLock<Tables>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl OperationStore for MemoryStore {
	async fn create_operation(
		&self,
		id: &OperationId,
		kind: &str,
		target: Option<&str>,
	) -> Result<OperationRecord, StoreError> {
		let mut tables = self.tables.write().await;
		if tables.operations.contains_key(id) {
			return Err(StoreError::AlreadyExists(id.clone()));
		}

		let record = OperationRecord::new(id.clone(), kind, target);
		tables.operations.insert(id.clone(), record.clone());

		Ok(record)
	}

	async fn update_operation_status(
		&self,
		id: &OperationId,
		status: OperationStatus,
		message: &str,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.write().await;
		let record = tables
			.operations
			.get_mut(id)
			.ok_or_else(|| StoreError::NotFound(id.clone()))?;

		StoreError::check_transition(id, record.status, status)?;
		record.apply_status(status, message);

		Ok(())
	}

	async fn update_operation_progress(
		&self,
		id: &OperationId,
		current: u64,
		total: u64,
		message: &str,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.write().await;
		let record = tables
			.operations
			.get_mut(id)
			.ok_or_else(|| StoreError::NotFound(id.clone()))?;

		StoreError::check_writable(id, record.status)?;
		record.current = current;
		record.total = total;
		message.clone_into(&mut record.message);
		record.updated_at = Utc::now();

		Ok(())
	}

	async fn add_operation_log(
		&self,
		id: &OperationId,
		level: LogLevel,
		message: &str,
		details: Option<&str>,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.write().await;
		let status = tables
			.operations
			.get(id)
			.map(|record| record.status)
			.ok_or_else(|| StoreError::NotFound(id.clone()))?;
		StoreError::check_writable(id, status)?;

		tables.next_log_id += 1;
		let entry = OperationLogEntry {
			id: tables.next_log_id,
			operation_id: id.clone(),
			level,
			message: message.to_owned(),
			details: details.map(ToOwned::to_owned),
			created_at: Utc::now(),
		};
		tables.logs.entry(id.clone()).or_default().push(entry);

		Ok(())
	}

	async fn get_operation_by_id(&self, id: &OperationId) -> Result<OperationRecord, StoreError> {
		self.tables
			.read()
			.await
			.operations
			.get(id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(id.clone()))
	}

	async fn get_recent_operations(
		&self,
		limit: usize,
	) -> Result<Vec<OperationRecord>, StoreError> {
		let tables = self.tables.read().await;
		let mut records = tables.operations.values().cloned().collect::<Vec<_>>();
		records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
		records.truncate(limit);

		Ok(records)
	}

	async fn get_operation_logs(
		&self,
		id: &OperationId,
		tail: Option<usize>,
	) -> Result<Vec<OperationLogEntry>, StoreError> {
		let tables = self.tables.read().await;
		if !tables.operations.contains_key(id) {
			return Err(StoreError::NotFound(id.clone()));
		}

		let logs = tables.logs.get(id).map_or(&[][..], Vec::as_slice);
		let skip = tail.map_or(0, |tail| logs.len().saturating_sub(tail));

		Ok(logs[skip..].to_vec())
	}

	async fn get_operations_by_status(
		&self,
		statuses: &[OperationStatus],
	) -> Result<Vec<OperationRecord>, StoreError> {
		let tables = self.tables.read().await;
		let mut records = tables
			.operations
			.values()
			.filter(|record| statuses.contains(&record.status))
			.cloned()
			.collect::<Vec<_>>();
		records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

		Ok(records)
	}
}
