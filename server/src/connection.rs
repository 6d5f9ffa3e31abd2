// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bookidx_store::{AddError, AddOutcome, Catalog};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{
    format_record, parse_request, Request, ERR_BAD_CSV, ERR_DUPLICATE_ID, ERR_INDEX_INSERT,
    ERR_INDEX_READ, ERR_INTERNAL, ERR_READ_CSV, NOTFOUND, OK_ADDED,
};

/// Request cap in bytes, terminator included. Longer requests are truncated
/// at the cap and the rest of the stream parses as the next request.
pub const MAX_REQUEST_BYTES: usize = 256;

pub(crate) async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    catalog: Arc<Catalog>,
    shutdown: CancellationToken,
) {
    match serve_client(stream, &catalog, &shutdown).await {
        Ok(()) => debug!(%peer, "client disconnected"),
        Err(error) => warn!(%peer, %error, "client connection failed"),
    }
}

async fn serve_client(
    stream: TcpStream,
    catalog: &Catalog,
    shutdown: &CancellationToken,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        // Cancellation lands between requests; an in-flight request is
        // always answered before the loop exits.
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = read_request(&mut reader) => request?,
        };
        let Some(mut raw) = request else {
            break;
        };
        while raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = String::from_utf8_lossy(&raw);
        let reply = match parse_request(&line) {
            Ok(Request::Quit) => break,
            Ok(Request::Get(id)) => get_reply(catalog, id),
            Ok(Request::Add(record)) => add_reply(catalog, record),
            Err(reply) => reply.to_owned(),
        };
        write_half.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

fn get_reply(catalog: &Catalog, id: u64) -> String {
    match catalog.lookup(id) {
        Ok(None) => NOTFOUND.to_owned(),
        Ok(Some(offset)) => match catalog.record_at(offset) {
            Ok(record) => format_record(&record),
            Err(error) => {
                warn!(id, offset, %error, "record read failed");
                ERR_READ_CSV.to_owned()
            }
        },
        Err(error) => {
            warn!(id, %error, "lookup failed");
            ERR_INTERNAL.to_owned()
        }
    }
}

fn add_reply(catalog: &Catalog, record: &str) -> String {
    match catalog.add(record) {
        Ok(AddOutcome::Added { id }) => {
            debug!(id, "record added");
            OK_ADDED.to_owned()
        }
        Ok(AddOutcome::Duplicate(id)) => {
            debug!(id, "duplicate add refused");
            ERR_DUPLICATE_ID.to_owned()
        }
        Ok(AddOutcome::BadRecord) => ERR_BAD_CSV.to_owned(),
        Err(AddError::Check(error)) => {
            warn!(%error, "add: uniqueness check failed");
            ERR_INDEX_READ.to_owned()
        }
        Err(AddError::Append(error)) => {
            warn!(%error, "add: csv append failed");
            ERR_INTERNAL.to_owned()
        }
        Err(AddError::Insert(error)) => {
            warn!(%error, "add: index insert failed");
            ERR_INDEX_INSERT.to_owned()
        }
    }
}

/// Reads one `\n`-terminated request under [`MAX_REQUEST_BYTES`]. Returns
/// `None` on a clean EOF. The returned line excludes the terminator.
async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line: Vec<u8> = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }
        // Bytes this request may still consume, terminator included.
        let room = MAX_REQUEST_BYTES - line.len();
        if let Some(newline) = available.iter().take(room).position(|&b| b == b'\n') {
            line.extend_from_slice(&available[..newline]);
            reader.consume(newline + 1);
            return Ok(Some(line));
        }
        if room <= 1 {
            break;
        }
        let take = available.len().min(room - 1);
        line.extend_from_slice(&available[..take]);
        reader.consume(take);
    }
    Ok(Some(line))
}
