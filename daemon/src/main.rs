// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

use bookidx_server::Server;
use bookidx_store::Catalog;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opts {
    /// IPv4 address to bind
    pub bind: Ipv4Addr,
    /// TCP port to listen on
    pub port: u16,
    /// Index file produced by build-index
    pub index: PathBuf,
    /// CSV record file the index was built over
    pub csv: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();

    let catalog = Arc::new(Catalog::open(&opts.index, &opts.csv)?);
    info!(entries = catalog.len(), "catalog opened");

    let server = Server::bind(SocketAddrV4::new(opts.bind, opts.port), catalog)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping accept loop");
                shutdown.cancel();
            }
        }
    });

    server.run(shutdown).await
}
