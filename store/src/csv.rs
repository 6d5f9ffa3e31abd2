// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fs::File;
use std::path::Path;

use parking_lot::Mutex;
use positioned_io::ReadAt;

use crate::Error;

const READ_CHUNK: usize = 4096;

/// The record file: CSV lines, appended to and never rewritten.
///
/// Reads are positional so concurrent readers never race over a shared file
/// cursor. Appends go through a tracked end-of-file position; the caller is
/// responsible for serializing them.
pub struct CsvStore {
    file: File,
    end: Mutex<u64>,
}

impl CsvStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::options().read(true).write(true).open(path)?;
        let end = file.metadata()?.len();
        Ok(Self {
            file,
            end: Mutex::new(end),
        })
    }

    /// Reads the line starting at `offset`, up to and including the first
    /// newline, or to EOF. A read yielding nothing at all is an error.
    pub fn read_line_at(&self, offset: u64) -> Result<String, Error> {
        let mut line = Vec::new();
        let mut pos = offset;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = self.file.read_at(pos, &mut chunk)?;
            if n == 0 {
                break;
            }
            if let Some(newline) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..=newline]);
                break;
            }
            line.extend_from_slice(&chunk[..n]);
            pos += n as u64;
        }
        if line.is_empty() {
            return Err(Error::NoRecordAt(offset));
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Appends `line` plus a terminating newline and returns the byte offset
    /// the record begins at. `line` must not contain embedded newlines; that
    /// is not checked here.
    pub fn append_line(&self, line: &str) -> Result<u64, Error> {
        let mut end = self.end.lock();
        let offset = *end;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        std::os::unix::fs::FileExt::write_all_at(&self.file, &buf, offset)?;
        *end = offset + buf.len() as u64;
        Ok(offset)
    }
}

/// First comma-separated field of a record line, or the whole line if it has
/// no comma. Fields are split on `,` alone; quoting is not interpreted.
pub fn first_field(line: &[u8]) -> &[u8] {
    match line.iter().position(|&b| b == b',') {
        Some(comma) => &line[..comma],
        None => line,
    }
}

/// Strict parse of a record's id field. Surrounding ASCII whitespace and
/// double-quotes are stripped; what remains must be 1 to 32 digits and fit
/// in a `u64`.
pub fn parse_id_field(field: &[u8]) -> Option<u64> {
    let junk = |b: &u8| b.is_ascii_whitespace() || *b == b'"';
    let start = field.iter().position(|b| !junk(b))?;
    let end = field.iter().rposition(|b| !junk(b))? + 1;
    let digits = &field[start..end];
    if digits.len() > 32 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
