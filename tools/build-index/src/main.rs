// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use bookidx_store::builder::build_index;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opts {
    /// Input CSV whose first line is a header
    pub csv: PathBuf,
    /// Output index file, replaced if it exists
    pub index: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let summary = build_index(&opts.csv, &opts.index)?;
    info!(
        total_entries = summary.total_entries,
        skipped_lines = summary.skipped_lines,
        "done"
    );
    Ok(())
}
