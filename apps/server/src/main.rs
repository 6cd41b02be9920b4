use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use shelf_operation_store::OperationId;
use shelf_task_system::Priority;

mod bootstrap;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "shelf", about = "Audiobook library operations")]
struct Cli {
	/// Path to the shelf data directory
	#[arg(long, global = true)]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Scan a directory for audiobook files and wait for it to finish
	Scan {
		path: PathBuf,
		/// low, normal, high or any integer
		#[arg(long, default_value_t = Priority::NORMAL)]
		priority: Priority,
		/// Print operation metrics in Prometheus text format once done
		#[arg(long)]
		metrics: bool,
	},
	/// Show one operation
	Status { id: OperationId },
	/// Show an operation's log trail
	Logs {
		id: OperationId,
		/// Only the last N entries
		#[arg(long)]
		tail: Option<usize>,
	},
	/// List the most recent operations
	Recent {
		#[arg(long, default_value_t = 20)]
		limit: usize,
	},
	/// Mark operations left running by a previous process as failed
	Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = bootstrap::load_config(cli.data_dir)?;
	let _log_guard = bootstrap::init_tracing(&config)?;
	let store = bootstrap::open_store(&config).await?;

	match cli.command {
		Commands::Scan {
			path,
			priority,
			metrics,
		} => {
			let metrics = metrics.then(bootstrap::init_metrics).transpose()?;
			commands::scan(&config, store, path, priority, metrics.as_ref()).await
		}
		Commands::Status { id } => commands::status(store.as_ref(), &id).await,
		Commands::Logs { id, tail } => commands::logs(store.as_ref(), &id, tail).await,
		Commands::Recent { limit } => commands::recent(store.as_ref(), limit).await,
		Commands::Recover => commands::recover(store.as_ref()).await,
	}
}
