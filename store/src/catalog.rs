// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;

use crate::csv::{first_field, parse_id_field, CsvStore};
use crate::{Error, Index};

/// An open catalog: the index file plus the CSV it indexes, packaged as one
/// engine value so request handlers can share it behind an `Arc` and tests
/// can run several catalogs over distinct files in one process.
pub struct Catalog {
    index: Index,
    csv: CsvStore,
    /// Serializes the whole add path: uniqueness check, CSV append, index
    /// insert. Lookups never take it.
    add_lock: Mutex<()>,
}

/// How a [`Catalog::add`] ended, short of an I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { id: u64 },
    Duplicate(u64),
    /// The line has no comma, or its first field is not a well-formed id.
    BadRecord,
}

/// An add that failed on I/O, tagged with the stage that failed so the
/// protocol layer can pick its reply.
#[derive(Debug, thiserror::Error)]
pub enum AddError {
    #[error("uniqueness check failed: {0}")]
    Check(#[source] Error),
    #[error("csv append failed: {0}")]
    Append(#[source] Error),
    #[error("index insert failed: {0}")]
    Insert(#[source] Error),
}

impl Catalog {
    pub fn open(idx_path: &Path, csv_path: &Path) -> Result<Self, Error> {
        let index = Index::open(idx_path)?;
        let csv = CsvStore::open(csv_path)?;
        Ok(Self {
            index,
            csv,
            add_lock: Mutex::new(()),
        })
    }

    /// Total indexed records.
    pub fn len(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Byte offset of `id`'s record line, if indexed.
    pub fn lookup(&self, id: u64) -> Result<Option<u64>, Error> {
        self.index.lookup(id)
    }

    /// The raw record line starting at `offset`.
    pub fn record_at(&self, offset: u64) -> Result<String, Error> {
        self.csv.read_line_at(offset)
    }

    /// Appends a record line to the CSV and indexes it, refusing ids already
    /// present. The whole path runs under the writer lock; if the index
    /// insert fails after the CSV append succeeded, the appended line stays
    /// behind unreferenced.
    pub fn add(&self, line: &str) -> Result<AddOutcome, AddError> {
        let line = line.trim_start();
        if !line.contains(',') {
            return Ok(AddOutcome::BadRecord);
        }
        let Some(id) = parse_id_field(first_field(line.as_bytes())) else {
            return Ok(AddOutcome::BadRecord);
        };

        let _writer = self.add_lock.lock();
        if self.index.lookup(id).map_err(AddError::Check)?.is_some() {
            return Ok(AddOutcome::Duplicate(id));
        }
        let offset = self.csv.append_line(line).map_err(AddError::Append)?;
        self.index.insert(id, offset).map_err(AddError::Insert)?;
        debug!(id, offset, "record added");
        Ok(AddOutcome::Added { id })
    }
}
