//! Frontmatter merging for geonote notes.
//!
//! Inserts or updates the `location` entry in a note's leading metadata block,
//! creating the block when the note has none. Merging is a pure string
//! transformation: the body of the note is never touched, and header lines
//! other than the first `location:` line keep their bytes and order.

mod block;

use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use tracing::trace;

pub use block::{MARKER, MetadataBlock};

/// Header key written by [`merge`].
pub const LOCATION_KEY: &str = "location";

/// Merge `location` into the metadata block of `document`.
///
/// - No block: a new block holding only the location line is prepended.
/// - Block with a `location:` line: the first such line is replaced.
/// - Block without one: the line is appended to the end of the header.
///
/// The value is written verbatim between double quotes, without escaping.
pub fn merge(document: &str, location: &str) -> String {
    let block = MetadataBlock::split(document);
    let line = location_line(location);

    if !block.present {
        trace!("no metadata block, prepending one");
        return block.render_with_header(&line);
    }

    let header = upsert_location(block.raw_header, &line);
    block.render_with_header(&header)
}

/// Read the value of the first `key:` line in the metadata block.
///
/// Surrounding whitespace and one pair of enclosing double quotes are removed.
/// Returns `None` when the document has no block or no such line.
pub fn read_field<'a>(document: &'a str, key: &str) -> Option<&'a str> {
    let block = MetadataBlock::split(document);
    if !block.present {
        return None;
    }

    block.raw_header.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix(':')?.trim();
        Some(
            value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value),
        )
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn location_line(location: &str) -> String {
    format!("{LOCATION_KEY}: \"{location}\"\n")
}

/// Replace the first `location:` line of `header`, or append `line`.
fn upsert_location(header: &str, line: &str) -> String {
    // A line starting with `location:`, through its terminator (or end of header).
    static LOCATION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^location:[^\r\n]*(?:\r\n|\r|\n|$)").expect("valid regex")
    });

    if LOCATION_LINE_RE.is_match(header) {
        trace!("replacing existing location line");
        LOCATION_LINE_RE
            .replacen(header, 1, NoExpand(line))
            .into_owned()
    } else {
        trace!("appending location line");
        format!("{header}{line}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
