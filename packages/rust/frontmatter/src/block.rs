//! Splitting a document into its leading metadata block and body.
//!
//! The split is a plain string-delimiter algorithm: the block opens with the
//! marker line at the very start of the document and closes at the next
//! occurrence of the marker line delimiter, wherever it appears.

/// The fixed marker line opening and closing a metadata block.
pub const MARKER: &str = "---";

/// Marker line plus its newline, the delimiter used for splitting.
pub(crate) const DELIMITER: &str = "---\n";

/// A document viewed as an optional metadata block plus body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataBlock<'a> {
    /// Whether the document starts with the marker line.
    pub present: bool,
    /// Text between the opening and closing marker lines. Empty when absent.
    pub raw_header: &'a str,
    /// Text after the closing marker line, or the whole document when no block
    /// is present. `None` when the block is never closed.
    pub body: Option<&'a str>,
}

impl<'a> MetadataBlock<'a> {
    /// Split `text` into header and body.
    pub fn split(text: &'a str) -> Self {
        let Some(rest) = text.strip_prefix(DELIMITER) else {
            return Self {
                present: false,
                raw_header: "",
                body: Some(text),
            };
        };

        match rest.split_once(DELIMITER) {
            Some((raw_header, body)) => Self {
                present: true,
                raw_header,
                body: Some(body),
            },
            None => Self {
                present: true,
                raw_header: rest,
                body: None,
            },
        }
    }

    /// Reassemble a document from this block with `header` in place of the
    /// original header text.
    pub fn render_with_header(&self, header: &str) -> String {
        let body_len = self.body.map_or(0, str::len);
        let mut out = String::with_capacity(DELIMITER.len() * 2 + header.len() + body_len);
        out.push_str(DELIMITER);
        out.push_str(header);
        // A block without a closing marker stays unclosed.
        if let Some(body) = self.body {
            out.push_str(DELIMITER);
            out.push_str(body);
        }
        out
    }
}
