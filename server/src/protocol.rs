// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Request grammar and reply formatting for the wire protocol.
//!
//! Requests are single ASCII lines, dispatched on a case-insensitive first
//! token. Replies are newline-terminated; a successful `GET` introduces a
//! multi-line record terminated by a line of forty dashes. The Spanish
//! reply strings are part of the protocol and kept verbatim.

pub const OK_ADDED: &str = "OK Registro agregado correctamente\n";
pub const NOTFOUND: &str = "NOTFOUND\n";
pub const ERR_MISSING_ID: &str = "ERR missing id\n";
pub const ERR_BAD_ID: &str = "ERR bad id\n";
pub const ERR_INTERNAL: &str = "ERR internal\n";
pub const ERR_READ_CSV: &str = "ERR readcsv\n";
pub const ERR_BAD_CSV: &str = "ERR formato CSV inválido\n";
pub const ERR_DUPLICATE_ID: &str = "ERR ID duplicado\n";
pub const ERR_INDEX_READ: &str = "ERR index read error\n";
pub const ERR_INDEX_INSERT: &str = "ERR inserción en índice\n";
pub const ERR_USAGE: &str = "ERR expected: GET <id> or ADD <csv>\n";

/// End marker of a formatted record reply.
pub const RECORD_TERMINATOR: &str = "----------------------------------------";

/// Columns of the record projected into a `GET` reply, by zero-based
/// position in the comma-split line, with their labels.
const RESPONSE_COLUMNS: [(usize, &str); 10] = [
    (0, "ID"),
    (4, "Title"),
    (10, "Author"),
    (14, "Publisher"),
    (15, "Language"),
    (12, "Year"),
    (18, "Rating"),
    (19, "Pages"),
    (13, "Source-file"),
    (17, "Description"),
];

#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    Get(u64),
    /// The raw record line following the verb.
    Add(&'a str),
    Quit,
}

/// Parses one request line (terminator already stripped). On failure the
/// returned string is the reply to send.
pub fn parse_request(line: &str) -> Result<Request<'_>, &'static str> {
    let (verb, rest) = match line.find(|c: char| c.is_ascii_whitespace()) {
        Some(space) => (&line[..space], &line[space + 1..]),
        None => (line, ""),
    };
    if verb.eq_ignore_ascii_case("QUIT") {
        Ok(Request::Quit)
    } else if verb.eq_ignore_ascii_case("GET") {
        let id = rest.trim();
        if id.is_empty() {
            return Err(ERR_MISSING_ID);
        }
        id.parse().map(Request::Get).map_err(|_| ERR_BAD_ID)
    } else if verb.eq_ignore_ascii_case("ADD") {
        Ok(Request::Add(rest))
    } else {
        Err(ERR_USAGE)
    }
}

/// Formats a raw record line into the labelled multi-line `GET` reply.
/// Fields are split on `,` alone; quoting is not interpreted, so records
/// with embedded commas come out shifted. Missing columns render empty.
pub fn format_record(line: &str) -> String {
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    let fields: Vec<&str> = line.split(',').collect();
    let mut reply = String::from("OK\n");
    for (column, label) in RESPONSE_COLUMNS {
        reply.push_str(label);
        reply.push_str(": ");
        reply.push_str(fields.get(column).copied().unwrap_or(""));
        reply.push('\n');
    }
    reply.push_str(RECORD_TERMINATOR);
    reply.push('\n');
    reply
}
