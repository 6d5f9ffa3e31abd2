// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! TCP front end of the catalog engine.
//!
//! One task per accepted connection; every task shares the same open
//! [`Catalog`]. Engine calls are blocking file I/O and are made directly
//! from the connection tasks; only socket I/O suspends.

mod connection;
pub mod protocol;

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bookidx_store::Catalog;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use connection::MAX_REQUEST_BYTES;

const LISTEN_BACKLOG: u32 = 64;

/// A bound listener, not yet serving. Binding is split from running so
/// callers can bind port 0 and learn the real address before any client
/// connects.
pub struct Server {
    listener: TcpListener,
    catalog: Arc<Catalog>,
}

impl Server {
    pub fn bind(addr: SocketAddrV4, catalog: Arc<Catalog>) -> anyhow::Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::V4(addr))?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        Ok(Self { listener, catalog })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves clients until `shutdown` fires, then drains the
    /// remaining client tasks.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            addr = %self.listener.local_addr()?,
            entries = self.catalog.len(),
            "listening"
        );

        let mut clients = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "client connected");
                        clients.spawn(connection::handle_client(
                            stream,
                            peer,
                            Arc::clone(&self.catalog),
                            shutdown.clone(),
                        ));
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },
            }
        }

        info!(clients = clients.len(), "accept loop stopped, draining");
        while clients.join_next().await.is_some() {}
        Ok(())
    }
}
