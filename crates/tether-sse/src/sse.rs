//! Server-Sent Events (SSE) frame decoder.
//!
//! Turns raw bytes from the push channel into [`EventFrame`]s. Works on bytes
//! rather than text so payloads are reconstructed exactly, even when a
//! multi-byte character is split across network chunks.

use bytes::{BufMut, Bytes, BytesMut};
use tether_types::EventFrame;
use tether_types::frame::DEFAULT_EVENT_NAME;

/// Longest line the decoder buffers; longer lines are dropped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental decoder that processes bytes into frames.
#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    /// Frame under construction, if any.
    pending: Option<PendingFrame>,
    max_line: usize,
    /// Set while skipping the rest of an oversized line.
    overflowed: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

#[derive(Debug, Default)]
struct PendingFrame {
    name: Option<String>,
    data: BytesMut,
    data_lines: usize,
}

impl PendingFrame {
    fn into_frame(self) -> EventFrame {
        let name = match self.name {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_EVENT_NAME.to_string(),
        };
        EventFrame {
            name: Some(name),
            payload: self.data.freeze(),
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that drops lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            line: Vec::new(),
            pending: None,
            max_line,
            overflowed: false,
        }
    }

    /// Feed a chunk of bytes and return any frames it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EventFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.buffer(&rest[..pos]);
            rest = &rest[pos + 1..];

            let mut line = std::mem::take(&mut self.line);
            if std::mem::take(&mut self.overflowed) {
                continue;
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line, &mut frames);
        }
        self.buffer(rest);

        frames
    }

    fn buffer(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.line.len() + bytes.len() > self.max_line {
            tracing::warn!("Dropping SSE line longer than {} bytes", self.max_line);
            self.line = Vec::new();
            self.overflowed = true;
            return;
        }
        self.line.extend_from_slice(bytes);
    }

    /// Whether a frame or partial line is buffered awaiting more input.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some() || !self.line.is_empty() || self.overflowed
    }

    fn process_line(&mut self, line: &[u8], frames: &mut Vec<EventFrame>) {
        if line.is_empty() {
            if let Some(pending) = self.pending.take() {
                frames.push(pending.into_frame());
            }
            return;
        }

        if let Some(comment) = line.strip_prefix(b":") {
            let text = comment.strip_prefix(b" ").unwrap_or(comment);
            frames.push(EventFrame::keep_alive(Bytes::copy_from_slice(text)));
            return;
        }

        let (field, value) = match line.iter().position(|b| *b == b':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                // Trim one leading space from the value
                (&line[..idx], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &b""[..]),
        };

        match field {
            b"event" => {
                if let Some(pending) = self.pending.take() {
                    frames.push(pending.into_frame());
                }
                self.pending = Some(PendingFrame {
                    name: Some(String::from_utf8_lossy(value).into_owned()),
                    ..PendingFrame::default()
                });
            }
            b"data" => {
                let pending = self.pending.get_or_insert_with(PendingFrame::default);
                if pending.data_lines > 0 {
                    pending.data.put_u8(b'\n');
                }
                pending.data.extend_from_slice(value);
                pending.data_lines += 1;
            }
            b"id" | b"retry" => {}
            _ => {
                tracing::trace!(
                    "Dropping unrecognized SSE line: {}",
                    tether_types::util::preview(line, 80)
                );
            }
        }
    }
}
