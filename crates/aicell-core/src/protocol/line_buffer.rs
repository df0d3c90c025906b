//! Line framing
//!
//! Accumulates raw serial bytes into trimmed, non-empty text lines.

use bytes::{Buf, BytesMut};
use std::fmt;
use tokio_util::codec::Decoder;

use super::MAX_LINE_LEN;

/// A single decoded line from the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine(String);

impl RawLine {
    /// Build a line from text (trimmed)
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(text.as_ref().trim().to_string())
    }

    /// Line text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned text
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partial-line accumulator.
///
/// Lines end at CR or LF. The send prompt (`>`) is never followed by a
/// terminator, so a partial line holding only `>` is released immediately.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and collect every line they complete, in arrival order
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<RawLine> {
        let mut src = std::mem::take(&mut self.pending);
        src.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Ok(Some(line)) = self.decode(&mut src) {
            lines.push(line);
        }
        self.pending = src;
        lines
    }

    /// Bytes held in the partial line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}

impl Decoder for LineBuffer {
    type Item = RawLine;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawLine>, Self::Error> {
        loop {
            match src.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    let text = decode_text(&src[..pos]);
                    src.advance(pos + 1);
                    if !text.is_empty() {
                        return Ok(Some(RawLine(text)));
                    }
                }
                None => {
                    if src.len() > MAX_LINE_LEN {
                        let chunk = src.split_to(MAX_LINE_LEN);
                        let text = decode_text(&chunk);
                        if !text.is_empty() {
                            return Ok(Some(RawLine(text)));
                        }
                        continue;
                    }
                    // The prompt arrives as "> " with no line ending
                    if src.ends_with(b"> ") && decode_text(src) == ">" {
                        src.clear();
                        return Ok(Some(RawLine(">".to_string())));
                    }
                    return Ok(None);
                }
            }
        }
    }
}
