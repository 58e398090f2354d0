//! xacoord Journal Inspector
//!
//! Dumps, verifies and lists dangling transactions of a journal file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use xacoord::journal::{collect_dangling_records, JournalCursor, JournalIterator};

/// xacoord journal inspector
#[derive(Parser, Debug)]
#[command(name = "xacoord-journal")]
#[command(about = "Inspect xacoord transaction journal files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every record of a journal file
    Dump {
        /// Journal file
        file: PathBuf,

        /// Do not verify record checksums
        #[arg(long)]
        skip_crc: bool,
    },

    /// List transactions whose commit has not been applied everywhere
    Dangling {
        /// Journal file
        file: PathBuf,
    },

    /// Check every record and report corruption
    Verify {
        /// Journal file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    // Logs go to stderr so they never mix with the report on stdout
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Dump { file, skip_crc } => dump(&file, skip_crc),
        Commands::Dangling { file } => dangling(&file),
        Commands::Verify { file } => verify(&file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn dump(file: &Path, skip_crc: bool) -> xacoord::Result<ExitCode> {
    let cursor = JournalCursor::open(file)?;
    let header = *cursor.header();
    println!(
        "journal {} (timestamp {}, {:?}, end of data at {})",
        file.display(),
        header.timestamp,
        header.state,
        header.position
    );

    let mut records = JournalIterator::new(cursor, skip_crc, true);
    let mut count = 0u64;
    for record in records.by_ref() {
        let record = record?;
        println!(
            "{:>8}  {:<12} seq={:<8} time={} gtrid={} names={:?}",
            count,
            record.status().name(),
            record.sequence_number(),
            record.time(),
            record.gtrid(),
            record.unique_names()
        );
        count += 1;
    }

    println!("{} record(s), {} corrupted", count, records.corrupted_count());
    Ok(ExitCode::SUCCESS)
}

fn dangling(file: &Path) -> xacoord::Result<ExitCode> {
    let index = collect_dangling_records(file, true)?;
    let mut records: Vec<_> = index.into_records().into_values().collect();
    records.sort_by_key(|r| (r.time(), r.sequence_number()));

    for record in &records {
        println!("{}  {:?}", record.gtrid(), record.unique_names());
    }
    println!("{} dangling transaction(s)", records.len());
    Ok(ExitCode::SUCCESS)
}

fn verify(file: &Path) -> xacoord::Result<ExitCode> {
    let cursor = JournalCursor::open(file)?;
    let mut records = JournalIterator::new(cursor, false, true);
    let valid = records.by_ref().filter(|r| r.is_ok()).count();
    let corrupted = records.corrupted_count();

    println!("{}: {} valid record(s), {} corrupted", file.display(), valid, corrupted);
    if corrupted > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
