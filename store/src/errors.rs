// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

/// Storage engine error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not an index file (bad magic)")]
    BadMagic,
    #[error("unsupported bucket table size {0}")]
    BadTableSize(u64),
    #[error("index file truncated at {0} bytes, header and directory missing")]
    Truncated(u64),
    #[error("bucket {bucket} claims {bytes} bytes, over the 8 MiB cap; directory is corrupted")]
    OversizedBucket { bucket: usize, bytes: u64 },
    #[error("id {0} is already indexed")]
    DuplicateId(u64),
    #[error("no record starts at csv offset {0}")]
    NoRecordAt(u64),
    #[error("csv file has no header line")]
    EmptyCsv,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
