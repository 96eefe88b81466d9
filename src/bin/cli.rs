//! DuoKV CLI
//!
//! Command-line access to a DuoKV data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use duokv::block::FileKind;
use duokv::{CapacityPolicy, Config, Engine, HashStrategy, Key2, Lookup, Record};
use tracing_subscriber::{fmt, EnvFilter};

/// DuoKV CLI
#[derive(Parser, Debug)]
#[command(name = "duokv-cli")]
#[command(about = "Dual-indexed record store on flat binary files")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./duokv_data")]
    data_dir: PathBuf,

    /// KS1 slot capacity for a new table
    #[arg(long, default_value = "512")]
    ks1_capacity: usize,

    /// KS2 bucket count for a new table
    #[arg(long, default_value = "512")]
    ks2_buckets: usize,

    /// Let both indexes grow and shrink with load
    #[arg(long)]
    growable: bool,

    /// Use the byte-sum hash for KS2 (compatible with legacy files)
    #[arg(long)]
    legacy_hash: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a record
    #[command(allow_negative_numbers = true)]
    Insert {
        /// Numeric key
        key1: u64,

        /// String key (1-8 bytes, unique across the table)
        key2: String,

        num1: f32,
        num2: f32,

        /// Free text (at most 128 bytes)
        #[arg(default_value = "")]
        note: String,
    },

    /// Find records by key1, key2, or both
    Find {
        #[arg(long)]
        key1: Option<u64>,

        #[arg(long)]
        key2: Option<String>,

        /// Only this release of key1
        #[arg(long, requires = "key1", conflicts_with = "key2")]
        release: Option<u64>,
    },

    /// Delete records by key1, key2, or both
    Delete {
        #[arg(long)]
        key1: Option<u64>,

        #[arg(long)]
        key2: Option<String>,

        /// Only this release of key1
        #[arg(long, requires = "key1", conflicts_with = "key2")]
        release: Option<u64>,
    },

    /// Print every record
    Dump,

    /// Print index counters, file sizes and free blocks
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> duokv::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .ks1_capacity(args.ks1_capacity)
        .ks2_buckets(args.ks2_buckets)
        .capacity_policy(if args.growable {
            CapacityPolicy::Threshold
        } else {
            CapacityPolicy::Fixed
        })
        .hash_strategy(if args.legacy_hash {
            HashStrategy::ByteSum
        } else {
            HashStrategy::Fnv1a
        })
        .build();

    let engine = Engine::open(config)?;

    match args.command {
        Commands::Insert {
            key1,
            key2,
            num1,
            num2,
            note,
        } => {
            let record = engine.insert(key1, &key2, num1, num2, &note)?;
            println!("inserted ({}, {}) release {}", record.key1, record.key2, record.release);
        }
        Commands::Find { key1, key2, release } => {
            let lookup = lookup(key1, key2, release)?;
            let records = engine.find_item(&lookup)?;
            if records.is_empty() {
                println!("(no records)");
            } else {
                print_records(&records);
            }
        }
        Commands::Delete { key1, key2, release } => {
            let lookup = lookup(key1, key2, release)?;
            let removed = engine.delete_item(&lookup)?;
            println!("deleted {} record(s)", removed);
        }
        Commands::Dump => print_records(&engine.scan()?),
        Commands::Stats => {
            let counters = engine.counters();
            println!("KS1 keys      {} / {}", counters.csize1, counters.msize1);
            println!(
                "KS2 buckets   {} / {} ({:.1}% loaded)",
                counters.csize2,
                counters.msize2,
                counters.ks2_load() * 100.0
            );
            println!("Max releases  {}", engine.max_releases()?);
            for kind in FileKind::ALL {
                println!(
                    "{:<14}{:>10} bytes  {:>6} free blocks",
                    kind.file_name(),
                    engine.file_len(kind)?,
                    engine.free_blocks(kind)
                );
            }
        }
    }

    engine.close()
}

fn lookup(key1: Option<u64>, key2: Option<String>, release: Option<u64>) -> duokv::Result<Lookup> {
    if let (Some(key1), Some(release)) = (key1, release) {
        return Ok(Lookup::Release(key1, release));
    }
    let key2 = key2.as_deref().map(Key2::new).transpose()?;
    Lookup::from_parts(key1, key2)
}

fn print_records(records: &[Record]) {
    println!(
        "{:>20}  {:<8}  {:>7}  {:>12}  {:>12}  note",
        "key1", "key2", "release", "num1", "num2"
    );
    for r in records {
        println!(
            "{:>20}  {:<8}  {:>7}  {:>12.4}  {:>12.4}  {}",
            r.key1, r.key2, r.release, r.num1, r.num2, r.note
        );
    }
}
