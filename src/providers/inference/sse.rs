//! Line framing for server-sent event bodies.

use bytes::{Buf, BytesMut};

/// Splits a byte stream into lines, buffering partial lines across chunks.
///
/// Lines are only decoded once complete, so a multi-byte character split
/// between two network chunks comes out intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buf: BytesMut,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Flush whatever trails the last newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// What a single SSE line amounts to.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Blank lines, comments and non-data fields.
    Skip,
    /// The `[DONE]` sentinel.
    Done,
    Data(&'a str),
}

pub fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let data = match line.strip_prefix("data:") {
        Some(data) => data.strip_prefix(' ').unwrap_or(data),
        // a bare field name carries an empty value
        None if matches!(line, "data" | "event" | "id" | "retry") || is_non_data_field(line) => {
            return SseLine::Skip;
        }
        None => line,
    };
    match data {
        "" => SseLine::Skip,
        "[DONE]" => SseLine::Done,
        data => SseLine::Data(data),
    }
}

fn is_non_data_field(line: &str) -> bool {
    ["event:", "id:", "retry:"].iter().any(|field| line.starts_with(field))
}
