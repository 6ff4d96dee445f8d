//! strata - command line front end for the storage kernel

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata::database::{Database, DatabaseConfig};
use strata::storage::{BlockId, StorageError};
use strata::transaction::{Transaction, TransactionError};

const WORKLOAD_FILE: &str = "workload";

/// strata - a transactional block storage kernel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./strata_data")]
    data_dir: PathBuf,

    /// Block size in bytes
    #[arg(long, default_value = "400")]
    block_size: usize,

    /// Number of buffers in the pool
    #[arg(long, default_value = "8")]
    buffers: usize,

    /// Pin and lock wait budget in milliseconds
    #[arg(long, default_value = "10000")]
    wait_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the database, undoing unfinished transactions
    Recover,
    /// Print every log record, newest first
    DumpLog,
    /// Run concurrent read-modify-write transactions
    Workload {
        #[arg(long, default_value = "4")]
        threads: usize,
        /// Transactions per thread
        #[arg(long, default_value = "100")]
        txns: usize,
        /// Number of blocks the transactions touch
        #[arg(long, default_value = "4")]
        blocks: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DatabaseConfig {
        block_size: args.block_size,
        buffer_count: args.buffers,
        wait_timeout: Duration::from_millis(args.wait_ms),
        ..DatabaseConfig::new(&args.data_dir)
    };

    let database = Database::open(config)
        .with_context(|| format!("failed to open database in {}", args.data_dir.display()))?;

    match args.command {
        Command::Recover => {
            println!("database in {} is consistent", args.data_dir.display());
        }
        Command::DumpLog => {
            for record in database.log_records().context("failed to read the log")? {
                println!("{}", record);
            }
        }
        Command::Workload {
            threads,
            txns,
            blocks,
        } => run_workload(Arc::new(database), threads, txns, blocks)?,
    }

    Ok(())
}

fn run_workload(database: Arc<Database>, threads: usize, txns: usize, blocks: u64) -> Result<()> {
    anyhow::ensure!(blocks > 0, "workload needs at least one block");

    let mut setup = database.begin()?;
    while setup.size(WORKLOAD_FILE)? < blocks {
        setup.append(WORKLOAD_FILE)?;
    }
    setup.commit()?;

    let committed = Arc::new(AtomicUsize::new(0));
    let aborted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let slots = database.config().block_size / 8;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let database = Arc::clone(&database);
            let committed = Arc::clone(&committed);
            let aborted = Arc::clone(&aborted);
            thread::spawn(move || -> Result<()> {
                let mut rng = rand::thread_rng();
                for _ in 0..txns {
                    let block = BlockId::new(WORKLOAD_FILE, rng.gen_range(0..blocks));
                    let offset = rng.gen_range(0..slots) * 8;

                    let mut tx = database.begin()?;
                    match increment(&mut tx, &block, offset) {
                        Ok(()) => {
                            tx.commit()?;
                            committed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if is_timeout(&e) => {
                            tx.rollback()?;
                            aborted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("workload thread panicked"))??;
    }

    println!(
        "{} committed, {} aborted on timeout in {:?}",
        committed.load(Ordering::Relaxed),
        aborted.load(Ordering::Relaxed),
        start.elapsed()
    );
    Ok(())
}

fn increment(tx: &mut Transaction, block: &BlockId, offset: usize) -> Result<(), TransactionError> {
    tx.pin(block)?;
    let value = tx.get_int(block, offset)?;
    tx.set_int(block, offset, value.wrapping_add(1), true)?;
    tx.unpin(block);
    Ok(())
}

fn is_timeout(error: &TransactionError) -> bool {
    matches!(
        error,
        TransactionError::Lock(_) | TransactionError::Storage(StorageError::BufferAbort { .. })
    )
}
