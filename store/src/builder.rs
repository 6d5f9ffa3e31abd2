// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Offline construction of an index file from an existing CSV.
//!
//! The CSV is streamed once and every `(id, offset)` pair is appended to one
//! of 1000 scratch files, one per bucket, in a temporary directory. Peak
//! memory is therefore bounded by the largest single bucket rather than the
//! whole dataset. A second pass loads each scratch file, sorts it by id and
//! emits the body, then the directory and header are rewritten in place with
//! the real values.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::TempDir;
use tracing::info;

use crate::csv::{first_field, parse_id_field};
use crate::format::{
    bucket_of, decode_pairs, encode_directory, encode_pairs, DirEntry, Header, Pair,
    DIR_ENTRY_LEN, HEADER_LEN, TABLE_SIZE,
};
use crate::Error;

/// What a build run did, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub total_entries: u64,
    pub skipped_lines: u64,
}

/// Builds a fresh index for `csv_path` at `idx_path`, replacing any existing
/// file there. The CSV's first line is a header and is never indexed; lines
/// whose first field is not a well-formed id are skipped.
pub fn build_index(csv_path: &Path, idx_path: &Path) -> Result<BuildSummary, Error> {
    let csv = File::open(csv_path)?;
    let mut reader = BufReader::new(csv);

    // One scratch file per bucket, created on first use so an untouched
    // bucket costs no file descriptor.
    let scratch_dir = TempDir::new()?;
    let mut scratch: Vec<Option<BufWriter<File>>> = (0..TABLE_SIZE).map(|_| None).collect();

    let mut line = Vec::new();
    let header_len = reader.read_until(b'\n', &mut line)?;
    if header_len == 0 {
        return Err(Error::EmptyCsv);
    }

    let mut offset = header_len as u64;
    let mut skipped = 0u64;
    loop {
        line.clear();
        let consumed = reader.read_until(b'\n', &mut line)?;
        if consumed == 0 {
            break;
        }
        let line_start = offset;
        offset += consumed as u64;

        let text = trim_line_end(&line);
        if text.is_empty() {
            continue;
        }
        let Some(id) = parse_id_field(first_field(text)) else {
            // The input is supposed to be pre-cleaned; anything odd is
            // dropped rather than aborting a long build.
            skipped += 1;
            continue;
        };

        let pair = Pair {
            id,
            offset: line_start,
        };
        let bucket = bucket_of(id);
        let writer = match &mut scratch[bucket] {
            Some(writer) => writer,
            slot @ None => slot.insert(BufWriter::new(
                File::options()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(scratch_dir.path().join(format!("bucket_{bucket:03}.tmp")))?,
            )),
        };
        writer.write_all(&pair.encode())?;
    }

    let mut out = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(idx_path)?;
    // Placeholders; both are rewritten once the bodies are laid out.
    out.write_all(&[0u8; HEADER_LEN])?;
    let dir_position = HEADER_LEN as u64;
    out.write_all(&vec![0u8; TABLE_SIZE * DIR_ENTRY_LEN])?;

    let mut directory = vec![DirEntry::default(); TABLE_SIZE];
    let mut total_entries = 0u64;
    for (bucket, writer) in scratch.into_iter().enumerate() {
        let Some(writer) = writer else {
            continue;
        };
        let mut file = writer.into_inner().map_err(io::Error::from)?;
        let len = file.metadata()?.len();
        if len == 0 {
            continue;
        }
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buf)?;

        let mut pairs = decode_pairs(&buf);
        pairs.sort_unstable_by_key(|pair| pair.id);

        directory[bucket] = DirEntry {
            bucket_offset: out.stream_position()?,
            bucket_count: pairs.len() as u64,
        };
        total_entries += pairs.len() as u64;
        out.write_all(&encode_pairs(&pairs))?;
    }

    out.seek(SeekFrom::Start(dir_position))?;
    out.write_all(&encode_directory(&directory))?;
    out.seek(SeekFrom::Start(0))?;
    out.write_all(&Header::new(total_entries).encode())?;
    out.flush()?;

    info!(
        index = %idx_path.display(),
        buckets = TABLE_SIZE,
        total_entries,
        skipped,
        "index built"
    );
    Ok(BuildSummary {
        total_entries,
        skipped_lines: skipped,
    })
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
