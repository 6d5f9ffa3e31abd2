// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Storage engine for a catalog of CSV records keyed by a unique numeric
//! identifier.
//!
//! The engine is split in two artifacts: the append-only CSV file holding the
//! records themselves, and a single binary index file that maps an id to the
//! byte offset of its record line. The index distributes ids over a fixed
//! table of 1000 buckets (see [`format`] for the exact layout) so a lookup
//! touches the in-memory directory plus one bucket body, never the whole
//! file.
//!
//! [`builder`] constructs an index offline from an existing CSV.
//! [`Index`] serves lookups and inserts over an open index file, and
//! [`Catalog`] packages it with the [`CsvStore`] it indexes so request
//! handlers can be handed a single engine value.

pub mod builder;
mod catalog;
mod csv;
mod errors;
pub mod format;
mod index;

pub use catalog::{AddError, AddOutcome, Catalog};
pub use csv::{first_field, parse_id_field, CsvStore};
pub use errors::Error;
pub use index::Index;
