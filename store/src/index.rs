// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fs::File;
use std::path::Path;

use parking_lot::RwLock;
use positioned_io::ReadAt;
use tracing::{debug, trace, warn};

use crate::format::{
    bucket_of, decode_directory, decode_pairs, dir_entry_position, encode_pairs, DirEntry, Header,
    Pair, DATA_START, DIR_ENTRY_LEN, HEADER_LEN, MAX_BUCKET_BYTES, PAIR_LEN, TABLE_SIZE,
};
use crate::Error;

/// **Note that all operations on this engine are blocking.**
///
/// Online lookup/insert engine over one open index file. The 16 KiB bucket
/// directory is cached in memory behind a read-write lock and mutated in
/// lockstep with its on-disk copy.
///
/// Bucket bodies are immutable once a directory entry points at them:
/// growing a bucket writes a fresh body past EOF before the directory is
/// repointed. A reader therefore only needs the lock long enough to snapshot
/// a directory entry; the body read itself is positional and lock-free.
pub struct Index {
    file: File,
    state: RwLock<State>,
}

struct State {
    total_entries: u64,
    directory: Vec<DirEntry>,
    /// Append position for fresh bucket bodies.
    end: u64,
}

impl Index {
    /// Opens an existing index file, validating the magic and table size and
    /// loading the directory.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < DATA_START {
            return Err(Error::Truncated(len));
        }

        let mut header_buf = [0u8; HEADER_LEN];
        file.read_exact_at(0, &mut header_buf)?;
        let header = Header::decode(&header_buf)?;

        let mut dir_buf = vec![0u8; TABLE_SIZE * DIR_ENTRY_LEN];
        file.read_exact_at(HEADER_LEN as u64, &mut dir_buf)?;
        let directory = decode_directory(&dir_buf);

        // An interrupted insert can leave the header one behind the
        // directory; the directory is what lookups trust.
        let counted: u64 = directory.iter().map(|entry| entry.bucket_count).sum();
        if counted != header.total_entries {
            warn!(
                header = header.total_entries,
                directory = counted,
                "entry counts disagree"
            );
        }

        debug!(entries = header.total_entries, "opened index");
        Ok(Self {
            file,
            state: RwLock::new(State {
                total_entries: header.total_entries,
                directory,
                end: len,
            }),
        })
    }

    /// Total entries recorded in the header.
    pub fn len(&self) -> u64 {
        self.state.read().total_entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves `id` to the byte offset of its record line in the CSV.
    pub fn lookup(&self, id: u64) -> Result<Option<u64>, Error> {
        let bucket = bucket_of(id);
        let entry = self.state.read().directory[bucket];
        if entry.bucket_count == 0 {
            return Ok(None);
        }
        let pairs = self.read_bucket(bucket, entry)?;
        trace!(id, bucket, count = pairs.len(), "bucket searched");
        Ok(pairs
            .binary_search_by_key(&id, |pair| pair.id)
            .ok()
            .map(|found| pairs[found].offset))
    }

    /// Records `id` at `offset`. The caller has already established that
    /// `id` is absent and serialized against other writers; a duplicate is
    /// still refused here rather than corrupt the bucket's ordering.
    ///
    /// The enlarged body is written past EOF first, then the directory
    /// entry, then the header, so a concurrent or subsequent reader never
    /// follows the directory into unwritten bytes.
    pub fn insert(&self, id: u64, offset: u64) -> Result<(), Error> {
        let bucket = bucket_of(id);
        let mut state = self.state.write();

        let entry = state.directory[bucket];
        let mut pairs = if entry.bucket_count == 0 {
            Vec::new()
        } else {
            self.read_bucket(bucket, entry)?
        };
        let slot = match pairs.binary_search_by_key(&id, |pair| pair.id) {
            Ok(_) => return Err(Error::DuplicateId(id)),
            Err(slot) => slot,
        };
        pairs.insert(slot, Pair { id, offset });

        let body_offset = state.end;
        let body = encode_pairs(&pairs);
        self.write_all_at(body_offset, &body)?;
        state.end = body_offset + body.len() as u64;

        let entry = DirEntry {
            bucket_offset: body_offset,
            bucket_count: pairs.len() as u64,
        };
        self.write_all_at(dir_entry_position(bucket), &entry.encode())?;
        state.directory[bucket] = entry;

        let total_entries = state.total_entries + 1;
        self.write_all_at(0, &Header::new(total_entries).encode())?;
        state.total_entries = total_entries;

        debug!(id, bucket, count = pairs.len(), "bucket rewritten");
        Ok(())
    }

    fn read_bucket(&self, bucket: usize, entry: DirEntry) -> Result<Vec<Pair>, Error> {
        let bytes = entry
            .bucket_count
            .checked_mul(PAIR_LEN as u64)
            .filter(|&bytes| bytes <= MAX_BUCKET_BYTES)
            .ok_or(Error::OversizedBucket {
                bucket,
                bytes: entry.bucket_count.saturating_mul(PAIR_LEN as u64),
            })?;
        let mut buf = vec![0u8; bytes as usize];
        self.file.read_exact_at(entry.bucket_offset, &mut buf)?;
        Ok(decode_pairs(&buf))
    }

    fn write_all_at(&self, pos: u64, buf: &[u8]) -> Result<(), Error> {
        std::os::unix::fs::FileExt::write_all_at(&self.file, buf, pos)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_index;
    use std::io::Write;
    use std::os::unix::fs::FileExt;

    fn build_fixture(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let csv_path = dir.path().join("books.csv");
        let mut csv = File::create(&csv_path).unwrap();
        writeln!(csv, "id,title").unwrap();
        for line in lines {
            writeln!(csv, "{line}").unwrap();
        }
        let idx_path = dir.path().join("books.idx");
        build_index(&csv_path, &idx_path).unwrap();
        (dir, idx_path)
    }

    #[test]
    fn open_rejects_not_an_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bogus.idx");
        std::fs::write(&path, vec![0u8; DATA_START as usize]).unwrap();
        assert!(matches!(Index::open(&path), Err(Error::BadMagic)));
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("short.idx");
        std::fs::write(&path, b"BKIDXv01").unwrap();
        assert!(matches!(Index::open(&path), Err(Error::Truncated(8))));
    }

    #[test]
    fn lookup_hits_and_misses() {
        let (_dir, idx_path) = build_fixture(&["1,a", "1001,b", "2001,c"]);
        let index = Index::open(&idx_path).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(1).unwrap(), Some(9));
        assert_eq!(index.lookup(1001).unwrap(), Some(13));
        assert_eq!(index.lookup(2001).unwrap(), Some(20));
        assert_eq!(index.lookup(99_999_999).unwrap(), None);
    }

    #[test]
    fn insert_then_lookup() {
        let (_dir, idx_path) = build_fixture(&["1,a"]);
        let index = Index::open(&idx_path).unwrap();
        index.insert(5107, 777).unwrap();
        assert_eq!(index.lookup(5107).unwrap(), Some(777));
        assert_eq!(index.lookup(1).unwrap(), Some(9));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn insert_refuses_duplicate() {
        let (_dir, idx_path) = build_fixture(&["1,a"]);
        let index = Index::open(&idx_path).unwrap();
        assert!(matches!(
            index.insert(1, 123),
            Err(Error::DuplicateId(1))
        ));
        assert_eq!(index.lookup(1).unwrap(), Some(9));
    }

    #[test]
    fn grown_bucket_appends_and_keeps_order() {
        let (_dir, idx_path) = build_fixture(&["2001,c"]);
        let before = std::fs::metadata(&idx_path).unwrap().len();
        {
            let index = Index::open(&idx_path).unwrap();
            // Same bucket as 2001: the body is rewritten at EOF with the
            // old copy left behind.
            index.insert(1, 100).unwrap();
            index.insert(1001, 200).unwrap();
        }
        let after = std::fs::metadata(&idx_path).unwrap().len();
        assert_eq!(after, before + 2 * PAIR_LEN as u64 + 3 * PAIR_LEN as u64);

        let index = Index::open(&idx_path).unwrap();
        let entry = index.state.read().directory[bucket_of(1)];
        assert_eq!(entry.bucket_count, 3);
        let pairs = index.read_bucket(bucket_of(1), entry).unwrap();
        let ids: Vec<u64> = pairs.iter().map(|pair| pair.id).collect();
        assert_eq!(ids, vec![1, 1001, 2001]);
    }

    #[test]
    fn stray_body_without_directory_swap_is_harmless() {
        let (_dir, idx_path) = build_fixture(&["1,a", "42,b"]);
        // An insert that died after writing its body but before the
        // directory swap leaves trailing garbage nothing points at.
        {
            let mut file = File::options().append(true).open(&idx_path).unwrap();
            file.write_all(&encode_pairs(&[Pair {
                id: 7,
                offset: 999,
            }]))
            .unwrap();
        }
        let index = Index::open(&idx_path).unwrap();
        assert_eq!(index.lookup(1).unwrap(), Some(9));
        assert_eq!(index.lookup(42).unwrap(), Some(13));
        assert_eq!(index.lookup(7).unwrap(), None);
        // And the next insert claims EOF without clobbering live bodies.
        index.insert(7, 555).unwrap();
        assert_eq!(index.lookup(7).unwrap(), Some(555));
        assert_eq!(index.lookup(1).unwrap(), Some(9));
    }

    #[test]
    fn round_trips_a_generated_id_set() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0xb00c);
        let mut ids = std::collections::BTreeSet::new();
        while ids.len() < 500 {
            ids.insert(rng.gen::<u64>() >> 1);
        }

        let lines: Vec<String> = ids.iter().map(|id| format!("{id},book {id}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (_dir, idx_path) = build_fixture(&refs);

        let index = Index::open(&idx_path).unwrap();
        assert_eq!(index.len(), ids.len() as u64);
        for &id in &ids {
            assert!(index.lookup(id).unwrap().is_some(), "id {id} missing");
        }
        for _ in 0..200 {
            let absent = rng.gen::<u64>() | (1 << 63);
            if !ids.contains(&absent) {
                assert_eq!(index.lookup(absent).unwrap(), None);
            }
        }
    }

    #[test]
    fn corrupted_directory_count_is_rejected() {
        let (_dir, idx_path) = build_fixture(&["1,a"]);
        {
            let file = File::options().write(true).open(&idx_path).unwrap();
            let entry = DirEntry {
                bucket_offset: DATA_START,
                bucket_count: u64::MAX / 2,
            };
            file.write_all_at(&entry.encode(), dir_entry_position(bucket_of(1)))
                .unwrap();
        }
        let index = Index::open(&idx_path).unwrap();
        assert!(matches!(
            index.lookup(1),
            Err(Error::OversizedBucket { .. })
        ));
    }
}
