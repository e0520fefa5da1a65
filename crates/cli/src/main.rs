use anyhow::{Context, Result};
use blink_cli::{Bookshelf, run_script};
use clap::Parser;
use common::Config;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blink_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = Config::builder()
        .maybe_data_dir(args.data_dir)
        .maybe_degree(args.degree)
        .maybe_cache_capacity(args.cache)
        .maybe_node_capacity(args.node_capacity)
        .maybe_value_capacity(args.value_capacity)
        .build();

    let mut shelf = Bookshelf::open(&config, &args.name).with_context(|| {
        format!(
            "failed to open `{}` in {}",
            args.name,
            config.data_dir.display()
        )
    })?;
    tracing::info!(
        shelf = shelf.name(),
        degree = shelf.degree(),
        empty = shelf.is_empty(),
        "opened multimap"
    );

    let mut out = BufWriter::new(io::stdout().lock());
    let summary = match &args.script {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open script {}", path.display()))?;
            run_script(&mut shelf, BufReader::new(file), &mut out)?
        }
        None => run_script(&mut shelf, io::stdin().lock(), &mut out)?,
    };
    out.flush()?;

    shelf.close().context("failed to close multimap")?;
    tracing::info!(
        commands = summary.commands,
        invalid = summary.invalid,
        "script finished"
    );
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "blink-cli")]
#[command(about = "Run insert/delete/find scripts against a persistent multimap", long_about = None)]
struct Args {
    /// Script to run; reads stdin when omitted
    script: Option<PathBuf>,
    /// Directory holding the store files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// File name prefix of the session
    #[arg(long, default_value = "test")]
    name: String,
    /// Maximum entries per node before a split
    #[arg(long)]
    degree: Option<usize>,
    /// Head-cache entries, 0 to disable
    #[arg(long)]
    cache: Option<usize>,
    /// Slot count of the index-node store
    #[arg(long)]
    node_capacity: Option<u64>,
    /// Slot count of the value-list store
    #[arg(long)]
    value_capacity: Option<u64>,
}
