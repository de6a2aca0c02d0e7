use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use eyre::WrapErr;
use serde::Serialize;
use trafficlog::read_log;
use tracing_subscriber::EnvFilter;
use transport::Direction;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Only {
    Inbound,
    Outbound,
}

#[derive(Debug, Parser)]
struct Args {
    file: PathBuf,

    /// Show one direction only
    #[clap(short, long)]
    only: Option<Only>,
}

#[derive(Serialize)]
struct Shown {
    direction: String,
    timestamp_ms: u64,
    message: serde_json::Value,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let wanted = args.only.map(|only| match only {
        Only::Inbound => Direction::Inbound,
        Only::Outbound => Direction::Outbound,
    });
    let shown: Vec<Shown> = read_log(&args.file)
        .context("reading traffic log")?
        .into_iter()
        .filter(|entry| wanted.is_none_or(|d| entry.is(d)))
        .map(|entry| Shown {
            message: entry.message(),
            direction: entry.direction,
            timestamp_ms: entry.timestamp_ms,
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&shown).context("serializing messages")?
    );

    Ok(())
}
