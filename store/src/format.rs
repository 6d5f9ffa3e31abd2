// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! # Index file layout
//!
//! The index is one binary file, all integers little-endian:
//!
//! ```text
//! offset 0     ►├─────────────────────────┤
//!               │magic     "BKIDXv01"     │ 8 bytes, no terminator
//!               │table_size         1000  │ u64
//!               │total_entries      N     │ u64
//! offset 24    ►├─────────────────────────┤
//!               │directory: 1000 entries  │ per bucket b:
//!               │  (bucket_offset_b,      │ u64 byte position of the body
//!               │   bucket_count_b)       │ u64 number of pairs in it
//! offset 16024 ►├─────────────────────────┤
//!               │bucket bodies            │ bucket_count × (id, offset)
//!               │                         │ pairs, ascending by id
//!               └─────────────────────────┘
//! ```
//!
//! Bodies are reachable only through the directory and need not sit in
//! bucket order. Growing a bucket appends a fresh body at EOF and repoints
//! the directory entry; the old body stays behind as unreferenced garbage
//! and must never be read.
//!
//! The bucket hash is part of the ABI: readers and writers must agree
//! bit-exactly, see [`bucket_of`].

use byteorder::{ByteOrder, LittleEndian};

use crate::Error;

pub const MAGIC: &[u8; 8] = b"BKIDXv01";
/// Fixed bucket cardinality of the format.
pub const TABLE_SIZE: usize = 1000;

pub const HEADER_LEN: usize = 24;
pub const DIR_ENTRY_LEN: usize = 16;
pub const PAIR_LEN: usize = 16;
/// Byte position of the first bucket body.
pub const DATA_START: u64 = (HEADER_LEN + TABLE_SIZE * DIR_ENTRY_LEN) as u64;
/// Guard against a corrupted directory entry: no well-formed bucket body
/// comes anywhere near this size.
pub const MAX_BUCKET_BYTES: u64 = 8 * 1024 * 1024;

/// Knuth multiplicative hash folded onto the bucket table.
pub fn bucket_of(id: u64) -> usize {
    (id.wrapping_mul(2654435761) % TABLE_SIZE as u64) as usize
}

/// Fixed byte position of bucket `b`'s directory entry.
pub fn dir_entry_position(bucket: usize) -> u64 {
    (HEADER_LEN + bucket * DIR_ENTRY_LEN) as u64
}

/// One indexed record: its id and the byte offset of its line in the CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub id: u64,
    pub offset: u64,
}

impl Pair {
    pub fn encode(self) -> [u8; PAIR_LEN] {
        let mut buf = [0; PAIR_LEN];
        LittleEndian::write_u64(&mut buf[..8], self.id);
        LittleEndian::write_u64(&mut buf[8..], self.offset);
        buf
    }

    pub fn decode(buf: &[u8; PAIR_LEN]) -> Self {
        Self {
            id: LittleEndian::read_u64(&buf[..8]),
            offset: LittleEndian::read_u64(&buf[8..]),
        }
    }
}

/// Where a bucket's body lives and how many pairs it holds. An empty bucket
/// is all zeroes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub bucket_offset: u64,
    pub bucket_count: u64,
}

impl DirEntry {
    pub fn encode(self) -> [u8; DIR_ENTRY_LEN] {
        let mut buf = [0; DIR_ENTRY_LEN];
        LittleEndian::write_u64(&mut buf[..8], self.bucket_offset);
        LittleEndian::write_u64(&mut buf[8..], self.bucket_count);
        buf
    }

    pub fn decode(buf: &[u8; DIR_ENTRY_LEN]) -> Self {
        Self {
            bucket_offset: LittleEndian::read_u64(&buf[..8]),
            bucket_count: LittleEndian::read_u64(&buf[8..]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub table_size: u64,
    pub total_entries: u64,
}

impl Header {
    pub fn new(total_entries: u64) -> Self {
        Self {
            table_size: TABLE_SIZE as u64,
            total_entries,
        }
    }

    pub fn encode(self) -> [u8; HEADER_LEN] {
        let mut buf = [0; HEADER_LEN];
        buf[..8].copy_from_slice(MAGIC);
        LittleEndian::write_u64(&mut buf[8..16], self.table_size);
        LittleEndian::write_u64(&mut buf[16..], self.total_entries);
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, Error> {
        if &buf[..8] != MAGIC {
            return Err(Error::BadMagic);
        }
        let table_size = LittleEndian::read_u64(&buf[8..16]);
        if table_size != TABLE_SIZE as u64 {
            return Err(Error::BadTableSize(table_size));
        }
        Ok(Self {
            table_size,
            total_entries: LittleEndian::read_u64(&buf[16..]),
        })
    }
}

/// Encodes a bucket body. Callers keep `pairs` sorted ascending by id.
pub fn encode_pairs(pairs: &[Pair]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(pairs.len() * PAIR_LEN);
    for pair in pairs {
        buf.extend_from_slice(&pair.encode());
    }
    buf
}

/// Decodes a bucket body. Trailing bytes short of a whole pair are ignored.
pub fn decode_pairs(buf: &[u8]) -> Vec<Pair> {
    buf.chunks_exact(PAIR_LEN)
        .map(|chunk| Pair::decode(chunk.try_into().expect("chunk is PAIR_LEN")))
        .collect()
}

pub fn encode_directory(directory: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(directory.len() * DIR_ENTRY_LEN);
    for entry in directory {
        buf.extend_from_slice(&entry.encode());
    }
    buf
}

pub fn decode_directory(buf: &[u8]) -> Vec<DirEntry> {
    buf.chunks_exact(DIR_ENTRY_LEN)
        .map(|chunk| DirEntry::decode(chunk.try_into().expect("chunk is DIR_ENTRY_LEN")))
        .collect()
}
