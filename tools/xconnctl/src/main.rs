// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `xconnctl` - operational CLI for a persisted session store.
//!
//! ```bash
//! # Show every record of stream ARCA.CLIENT in order
//! xconnctl --path ./data replay ARCA.CLIENT
//!
//! # Only outbound records since sequence 100
//! xconnctl --path ./data replay ARCA.CLIENT --direction outbound --from-seq 100
//!
//! # Merge every stream under the store by timestamp
//! xconnctl --path ./data merge
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use xconn::persistence::{Direction, Reader, StartPosition, Store, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "xconnctl")]
#[command(about = "Inspect and replay a persisted xconn session store", long_about = None)]
struct Args {
    /// Root directory of the persistence store.
    #[arg(short, long, default_value = "./data")]
    path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DirectionArg {
    Inbound,
    Outbound,
}

impl From<DirectionArg> for Direction {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Inbound => Direction::Inbound,
            DirectionArg::Outbound => Direction::Outbound,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay one stream's records in write order.
    Replay {
        /// Stream name (usually a session id).
        stream: String,
        #[arg(long)]
        direction: Option<DirectionArg>,
        #[arg(long, default_value_t = 0)]
        from_seq: u32,
        #[arg(long, default_value_t = 0)]
        to_seq: u32,
    },
    /// Follow a stream, printing new records as they're appended.
    Tail {
        stream: String,
        /// Start from the end instead of replaying the existing backlog first.
        #[arg(long)]
        from_end: bool,
    },
    /// Merge several streams by timestamp.
    Merge {
        /// Stream names to merge; when omitted, every immediate subdirectory
        /// of the store root is treated as a stream.
        streams: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let store = Store::open(StoreConfig {
        root: args.path.clone(),
        ..StoreConfig::default()
    })
    .with_context(|| format!("opening store at {}", args.path.display()))?;

    match args.command {
        Commands::Replay {
            stream,
            direction,
            from_seq,
            to_seq,
        } => replay(&store, &stream, direction.map(Into::into), from_seq, to_seq),
        Commands::Tail { stream, from_end } => tail(&store, &stream, from_end),
        Commands::Merge { streams } => merge(&store, &streams),
    }
}

fn replay(
    store: &Store,
    stream: &str,
    direction: Option<Direction>,
    from_seq: u32,
    to_seq: u32,
) -> Result<()> {
    let mut count = 0usize;
    store.replay(stream, direction, from_seq, to_seq, |rec| {
        println!(
            "seq={:<10} ts={:<14} dir={:<8} meta={:<4} raw={}",
            rec.seqnum,
            rec.timestamp_ms,
            format!("{:?}", rec.direction),
            rec.metadata.len(),
            String::from_utf8_lossy(&rec.raw).escape_default()
        );
        count += 1;
        true
    })?;
    println!("--- {count} records ---");
    Ok(())
}

fn tail(store: &Store, stream: &str, from_end: bool) -> Result<()> {
    let start = if from_end { StartPosition::End } else { StartPosition::Start };
    let mut reader = Reader::open(store, stream, start)?;
    println!("tailing {stream}, ctrl-c to stop");
    loop {
        if let Some(rec) = reader.poll(std::time::Duration::from_secs(1))? {
            println!(
                "seq={:<10} ts={:<14} dir={:?}",
                rec.seqnum, rec.timestamp_ms, rec.direction
            );
        }
    }
}

fn merge(store: &Store, streams: &[String]) -> Result<()> {
    let names: Vec<String> = if streams.is_empty() {
        list_streams(store)?
    } else {
        streams.to_vec()
    };
    if names.is_empty() {
        println!("no streams found under {}", store.root().display());
        return Ok(());
    }

    let mut readers: Vec<Reader> = names
        .iter()
        .map(|s| Reader::open(store, s, StartPosition::Start))
        .collect::<Result<_, _>>()?;
    let mut merge = xconn::persistence::MergeReader::new(readers.iter_mut().collect());

    let mut count = 0usize;
    merge.drain_available(|idx, rec| {
        println!("[{}] seq={} ts={}", names[idx], rec.seqnum, rec.timestamp_ms);
        count += 1;
    })?;
    println!("--- {count} records merged across {} streams ---", names.len());
    Ok(())
}

fn list_streams(store: &Store) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(store.root()) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_at(dir: &std::path::Path) -> Store {
        Store::open(StoreConfig { root: dir.to_path_buf(), max_segment_bytes: 1024 * 1024 }).unwrap()
    }

    #[test]
    fn list_streams_on_missing_root_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir.path().join("does-not-exist-yet"));
        assert_eq!(list_streams(&store).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn list_streams_reports_every_appended_stream_sorted() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.append("ZETA.out", 1, Direction::Outbound, vec![], vec![]).unwrap();
        store.append("ALPHA.in", 2, Direction::Inbound, vec![], vec![]).unwrap();
        assert_eq!(list_streams(&store).unwrap(), vec!["ALPHA.in".to_string(), "ZETA.out".to_string()]);
    }

    #[test]
    fn replay_counts_every_record_in_range() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        for i in 0..5u64 {
            store.append("SESS.out", i, Direction::Outbound, vec![], format!("m{i}").into_bytes()).unwrap();
        }
        replay(&store, "SESS.out", None, 0, 0).unwrap();
        replay(&store, "SESS.out", Some(Direction::Inbound), 0, 0).unwrap();
    }

    #[test]
    fn merge_with_no_named_streams_discovers_and_merges_all() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.append("A", 10, Direction::Outbound, vec![], vec![]).unwrap();
        store.append("B", 20, Direction::Outbound, vec![], vec![]).unwrap();
        merge(&store, &[]).unwrap();
    }

    #[test]
    fn merge_on_empty_store_prints_no_streams_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        merge(&store, &[]).unwrap();
    }
}
