//! VersionKV CLI
//!
//! Runs single operations against a local data directory.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use versionkv::store::PrimaryStore;
use versionkv::wal::WalRecovery;
use versionkv::{Config, Engine, ObjectVersion, Result};

/// VersionKV CLI
#[derive(Parser, Debug)]
#[command(name = "versionkv-cli")]
#[command(about = "CLI for the VersionKV versioned store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./versionkv_data")]
    data_dir: String,

    /// Provisioned table read/write units per second
    #[arg(long, default_value = "15")]
    table_units: u64,

    /// Provisioned index read/write units per second
    #[arg(long, default_value = "15")]
    index_units: u64,

    /// Seconds to wait for index maintenance before exiting
    #[arg(long, default_value = "10")]
    drain_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a new version of an object
    Ingest {
        object_key: String,
        job_hash: String,
        job_range: String,
        /// Payload (stored as UTF-8 bytes)
        payload: String,
    },

    /// Read one version
    Get { object_key: String, version: u64 },

    /// List an object's versions
    Versions {
        object_key: String,
        #[arg(long, default_value = "0")]
        from: u64,
        #[arg(long, default_value_t = u64::MAX)]
        to: u64,
    },

    /// List the primary keys a job produced
    QueryJob {
        job_hash: String,
        from_range: String,
        to_range: String,
    },

    /// Delete one version
    Delete { object_key: String, version: u64 },

    /// Rewrite the WAL down to live state
    Checkpoint,

    /// Check the WAL without modifying it
    VerifyWal,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,versionkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            if let Some(wait) = e.retry_after() {
                eprintln!("throttled, retry after {:?}", wait);
            }
            ExitCode::FAILURE
        }
    }
}

/// Settings for commands that open the engine
struct EngineOptions {
    data_dir: String,
    table_units: u64,
    index_units: u64,
    drain: Duration,
}

fn run(args: Args) -> Result<()> {
    let Args {
        data_dir,
        table_units,
        index_units,
        drain_secs,
        command,
    } = args;
    let opts = EngineOptions {
        data_dir,
        table_units,
        index_units,
        drain: Duration::from_secs(drain_secs),
    };

    match command {
        Commands::Ingest {
            object_key,
            job_hash,
            job_range,
            payload,
        } => with_engine(&opts, |engine| {
            let record = engine.ingest(&object_key, &job_hash, &job_range, payload.into_bytes())?;
            print_record(&record);
            Ok(())
        }),
        Commands::Get {
            object_key,
            version,
        } => with_engine(&opts, |engine| {
            match engine.get(&object_key, version)? {
                Some(record) => print_record(&record),
                None => println!("(not found)"),
            }
            Ok(())
        }),
        Commands::Versions {
            object_key,
            from,
            to,
        } => with_engine(&opts, |engine| {
            for record in engine.list_versions(&object_key, from, to)? {
                print_record(&record?);
            }
            Ok(())
        }),
        Commands::QueryJob {
            job_hash,
            from_range,
            to_range,
        } => with_engine(&opts, |engine| {
            engine.wait_for_maintenance(opts.drain);
            for primary in engine.query_by_job(&job_hash, &from_range, &to_range)? {
                println!("{}", primary?);
            }
            Ok(())
        }),
        Commands::Delete {
            object_key,
            version,
        } => with_engine(&opts, |engine| {
            match engine.delete(&object_key, version)? {
                Some(record) => println!("deleted {}", record.primary_ref()),
                None => println!("(not found)"),
            }
            Ok(())
        }),
        Commands::Checkpoint => with_engine(&opts, |engine| {
            let written = engine.checkpoint()?;
            println!("checkpoint wrote {} entries", written);
            Ok(())
        }),
        Commands::VerifyWal => verify_wal(&opts.data_dir),
    }
}

/// Open the engine, run one command, then drain and close
fn with_engine(opts: &EngineOptions, command: impl FnOnce(&Engine) -> Result<()>) -> Result<()> {
    let config = Config::builder()
        .data_dir(&opts.data_dir)
        .table_throughput(opts.table_units, opts.table_units)
        .index_throughput(opts.index_units, opts.index_units)
        .build();

    let engine = Engine::open(config)?;
    command(&engine)?;

    if !engine.wait_for_maintenance(opts.drain) {
        tracing::warn!("Index maintenance still pending at exit");
    }
    for letter in engine.dead_letters().try_iter() {
        eprintln!("dead letter: {}", letter.into_error());
    }

    engine.close()
}

/// Check the WAL without opening the engine
fn verify_wal(data_dir: &str) -> Result<()> {
    let path = PrimaryStore::wal_path(data_dir.as_ref());
    let result = WalRecovery::verify(&path)?;
    println!(
        "{}: {} valid entries, {} corrupted, last_lsn={}, damaged_tail={}",
        path.display(),
        result.entries_recovered,
        result.entries_corrupted,
        result.last_lsn,
        result.was_truncated
    );
    Ok(())
}

fn print_record(record: &ObjectVersion) {
    println!(
        "{}\tjob=({}, {})\t{}",
        record.primary_ref(),
        record.ingest_job_hash,
        record.ingest_job_range,
        String::from_utf8_lossy(&record.payload)
    );
}
