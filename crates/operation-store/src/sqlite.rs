use std::{path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
	QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool,
};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use super::{
	error::StoreError,
	operation::{LogLevel, OperationId, OperationLogEntry, OperationRecord, OperationStatus},
	OperationStore,
};

const SCHEMA: [&str; 4] = [
	"CREATE TABLE IF NOT EXISTS operations (
		id            TEXT PRIMARY KEY NOT NULL,
		kind          TEXT NOT NULL,
		status        INTEGER NOT NULL,
		current       INTEGER NOT NULL DEFAULT 0,
		total         INTEGER NOT NULL DEFAULT 0,
		message       TEXT NOT NULL DEFAULT '',
		target        TEXT,
		error_message TEXT,
		created_at    TEXT NOT NULL,
		updated_at    TEXT NOT NULL,
		started_at    TEXT,
		completed_at  TEXT
	)",
	"CREATE INDEX IF NOT EXISTS idx_operations_status ON operations (status)",
	"CREATE TABLE IF NOT EXISTS operation_logs (
		id           INTEGER PRIMARY KEY AUTOINCREMENT,
		operation_id TEXT NOT NULL REFERENCES operations (id) ON DELETE CASCADE,
		level        TEXT NOT NULL,
		message      TEXT NOT NULL,
		details      TEXT,
		created_at   TEXT NOT NULL
	)",
	"CREATE INDEX IF NOT EXISTS idx_operation_logs_operation ON operation_logs (operation_id, id)",
];

const OPERATION_COLUMNS: &str = "id, kind, status, current, total, message, target, \
	error_message, created_at, updated_at, started_at, completed_at";

/// SQLite backed store.
///
/// Writes go through a single async lock, and each status check runs in the same
/// transaction as the write that follows it.
#[derive(Debug)]
pub struct SqliteStore {
	pool: SqlitePool,
	write_lock: Mutex<()>,
}

impl SqliteStore {
	/// Opens (or creates) the database file at `path`, creating the schema if needed.
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.foreign_keys(true)
			.busy_timeout(Duration::from_secs(30));

		let pool = SqlitePoolOptions::new()
			.max_connections(4)
			.connect_with(options)
			.await?;

		let store = Self::with_pool(pool).await?;
		info!(path = %path.display(), "Operation store opened");

		Ok(store)
	}

	/// A private in-memory database. The pool keeps exactly one connection alive for the
	/// whole lifetime of the store, as the data dies with its connection.
	pub async fn open_in_memory() -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.min_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await?;

		Self::with_pool(pool).await
	}

	async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&pool).await?;
		}

		Ok(Self {
			pool,
			write_lock: Mutex::new(()),
		})
	}

}

async fn fetch_status(
	conn: &mut SqliteConnection,
	id: &OperationId,
) -> Result<OperationStatus, StoreError> {
	let status = sqlx::query_scalar::<_, i32>("SELECT status FROM operations WHERE id = ?")
		.bind(id.as_str())
		.fetch_optional(&mut *conn)
		.await?
		.ok_or_else(|| StoreError::NotFound(id.clone()))?;

	OperationStatus::try_from(status).map_err(|raw| StoreError::Corrupted {
		id: id.to_string(),
		reason: format!("unknown status value {raw}"),
	})
}

async fn fetch_record(
	conn: &mut SqliteConnection,
	id: &OperationId,
) -> Result<OperationRecord, StoreError> {
	let query = format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE id = ?");

	sqlx::query(&query)
		.bind(id.as_str())
		.fetch_optional(&mut *conn)
		.await?
		.ok_or_else(|| StoreError::NotFound(id.clone()))
		.and_then(|row| record_from_row(&row))
}

#[async_trait]
impl OperationStore for SqliteStore {
	#[instrument(skip(self), err)]
	async fn create_operation(
		&self,
		id: &OperationId,
		kind: &str,
		target: Option<&str>,
	) -> Result<OperationRecord, StoreError> {
		let record = OperationRecord::new(id.clone(), kind, target);

		let _guard = self.write_lock.lock().await;
		let inserted = sqlx::query(
			"INSERT INTO operations (id, kind, status, current, total, message, target, created_at, updated_at)
			 VALUES (?, ?, ?, 0, 0, '', ?, ?, ?)
			 ON CONFLICT (id) DO NOTHING",
		)
		.bind(record.id.as_str())
		.bind(&record.kind)
		.bind(record.status as i32)
		.bind(record.target.as_deref())
		.bind(record.created_at)
		.bind(record.updated_at)
		.execute(&self.pool)
		.await?;

		if inserted.rows_affected() == 0 {
			return Err(StoreError::AlreadyExists(id.clone()));
		}

		Ok(record)
	}

	async fn update_operation_status(
		&self,
		id: &OperationId,
		status: OperationStatus,
		message: &str,
	) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let mut tx = self.pool.begin().await?;

		let mut record = fetch_record(&mut tx, id).await?;
		StoreError::check_transition(id, record.status, status)?;
		record.apply_status(status, message);

		sqlx::query(
			"UPDATE operations
			 SET status = ?, message = ?, error_message = ?, updated_at = ?, started_at = ?, completed_at = ?
			 WHERE id = ?",
		)
		.bind(record.status as i32)
		.bind(&record.message)
		.bind(record.error_message.as_deref())
		.bind(record.updated_at)
		.bind(record.started_at)
		.bind(record.completed_at)
		.bind(id.as_str())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(())
	}

	async fn update_operation_progress(
		&self,
		id: &OperationId,
		current: u64,
		total: u64,
		message: &str,
	) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let mut tx = self.pool.begin().await?;

		StoreError::check_writable(id, fetch_status(&mut tx, id).await?)?;

		sqlx::query(
			"UPDATE operations SET current = ?, total = ?, message = ?, updated_at = ? WHERE id = ?",
		)
		.bind(to_sql_count(current))
		.bind(to_sql_count(total))
		.bind(message)
		.bind(Utc::now())
		.bind(id.as_str())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(())
	}

	async fn add_operation_log(
		&self,
		id: &OperationId,
		level: LogLevel,
		message: &str,
		details: Option<&str>,
	) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let mut tx = self.pool.begin().await?;

		StoreError::check_writable(id, fetch_status(&mut tx, id).await?)?;

		sqlx::query(
			"INSERT INTO operation_logs (operation_id, level, message, details, created_at)
			 VALUES (?, ?, ?, ?, ?)",
		)
		.bind(id.as_str())
		.bind(level.as_str())
		.bind(message)
		.bind(details)
		.bind(Utc::now())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(())
	}

	async fn get_operation_by_id(&self, id: &OperationId) -> Result<OperationRecord, StoreError> {
		fetch_record(&mut *self.pool.acquire().await?, id).await
	}

	async fn get_recent_operations(
		&self,
		limit: usize,
	) -> Result<Vec<OperationRecord>, StoreError> {
		let query = format!(
			"SELECT {OPERATION_COLUMNS} FROM operations ORDER BY created_at DESC, rowid DESC LIMIT ?"
		);

		sqlx::query(&query)
			.bind(i64::try_from(limit).unwrap_or(i64::MAX))
			.fetch_all(&self.pool)
			.await?
			.iter()
			.map(record_from_row)
			.collect()
	}

	async fn get_operation_logs(
		&self,
		id: &OperationId,
		tail: Option<usize>,
	) -> Result<Vec<OperationLogEntry>, StoreError> {
		fetch_status(&mut *self.pool.acquire().await?, id).await?;

		// Newest first so the LIMIT picks the tail, then flipped back to append order.
		let mut rows = sqlx::query(
			"SELECT id, operation_id, level, message, details, created_at
			 FROM operation_logs WHERE operation_id = ? ORDER BY id DESC LIMIT ?",
		)
		.bind(id.as_str())
		.bind(tail.map_or(-1, |tail| i64::try_from(tail).unwrap_or(i64::MAX)))
		.fetch_all(&self.pool)
		.await?;
		rows.reverse();

		rows.iter().map(log_entry_from_row).collect()
	}

	async fn get_operations_by_status(
		&self,
		statuses: &[OperationStatus],
	) -> Result<Vec<OperationRecord>, StoreError> {
		if statuses.is_empty() {
			return Ok(vec![]);
		}

		let mut query = QueryBuilder::<Sqlite>::new(format!(
			"SELECT {OPERATION_COLUMNS} FROM operations WHERE status IN ("
		));
		let mut separated = query.separated(", ");
		for status in statuses {
			separated.push_bind(*status as i32);
		}
		separated.push_unseparated(") ORDER BY created_at ASC, rowid ASC");

		query
			.build()
			.fetch_all(&self.pool)
			.await?
			.iter()
			.map(record_from_row)
			.collect()
	}
}

fn to_sql_count(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
	u64::try_from(value).unwrap_or_default()
}

fn record_from_row(row: &SqliteRow) -> Result<OperationRecord, StoreError> {
	let id = row.try_get::<String, _>("id")?;
	let status = row.try_get::<i32, _>("status")?;
	let status = OperationStatus::try_from(status).map_err(|raw| StoreError::Corrupted {
		id: id.clone(),
		reason: format!("unknown status value {raw}"),
	})?;

	Ok(OperationRecord {
		id: id.into(),
		kind: row.try_get("kind")?,
		status,
		current: from_sql_count(row.try_get("current")?),
		total: from_sql_count(row.try_get("total")?),
		message: row.try_get("message")?,
		target: row.try_get("target")?,
		error_message: row.try_get("error_message")?,
		created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
		updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
		started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
		completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
	})
}

fn log_entry_from_row(row: &SqliteRow) -> Result<OperationLogEntry, StoreError> {
	let operation_id = row.try_get::<String, _>("operation_id")?;
	let level = row
		.try_get::<String, _>("level")?
		.parse::<LogLevel>()
		.map_err(|reason| StoreError::Corrupted {
			id: operation_id.clone(),
			reason,
		})?;

	Ok(OperationLogEntry {
		id: row.try_get("id")?,
		operation_id: operation_id.into(),
		level,
		message: row.try_get("message")?,
		details: row.try_get("details")?,
		created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
	})
}
