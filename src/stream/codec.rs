//! Server-Sent Events frame codec.
//!
//! Splits the byte stream on `\n` with
//! [`tokio_util::codec::AnyDelimiterCodec`] and assembles `field: value`
//! lines into [`SseFrame`]s, dispatching on each blank line. A per-line and
//! per-frame byte bound protects the consumer from unbounded allocation
//! when a misbehaving server never terminates a line or a frame. Lines are
//! decoded as UTF-8 one at a time, so a single corrupt line only costs the
//! frame it belongs to.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use docgen_stream::stream::codec::SseCodec;
//!
//! let frames = FramedRead::new(body, SseCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Default maximum size of one line or one frame's accumulated data: 1 MiB.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event` field, if the frame carried one.
    pub event: Option<String>,
    /// All `data` lines joined with `\n`.
    pub data: String,
    /// Value of the `id` field, if the frame carried one.
    pub id: Option<String>,
}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
    /// Set when the frame must be dropped at dispatch.
    discarding: bool,
}

impl PendingFrame {
    fn is_open(&self) -> bool {
        self.event.is_some() || self.has_data || self.id.is_some()
    }
}

/// SSE decoder producing one [`SseFrame`] per blank-line-terminated block.
///
/// # Decoder
///
/// - Lines beginning with `:` are comments (keep-alives) and are ignored.
/// - A line or accumulated frame larger than the configured bound, or a
///   line that is not valid UTF-8, is logged at `WARN` and the whole frame
///   is dropped; decoding resumes with the next frame. Neither is surfaced
///   as a decoder error because `FramedRead` ends the stream after one.
/// - A frame still open when the stream ends is discarded.
/// - I/O errors map to [`AppError::Io`].
#[derive(Debug)]
pub struct SseCodec {
    lines: AnyDelimiterCodec,
    max_frame_bytes: usize,
    pending: PendingFrame,
    last_event_id: Option<String>,
}

impl SseCodec {
    /// Create a codec with the default [`MAX_FRAME_BYTES`] bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(MAX_FRAME_BYTES)
    }

    /// Create a codec with a custom line/frame bound.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            lines: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                Vec::new(),
                max_frame_bytes,
            ),
            max_frame_bytes,
            pending: PendingFrame::default(),
            last_event_id: None,
        }
    }

    /// The most recent `id` field seen on the stream.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed one line into the pending frame, returning a frame on dispatch.
    fn accept_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_owned()),
            "data" => {
                if self.pending.discarding {
                    return None;
                }
                let grown =
                    self.pending.data.len() + value.len() + usize::from(self.pending.has_data);
                if grown > self.max_frame_bytes {
                    warn!(
                        max_frame_bytes = self.max_frame_bytes,
                        "sse codec: frame data too large, dropping frame"
                    );
                    self.pending.discarding = true;
                    self.pending.data.clear();
                    return None;
                }
                if self.pending.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.pending.has_data = true;
            }
            "id" if !value.contains('\0') => {
                self.pending.id = Some(value.to_owned());
                self.last_event_id = Some(value.to_owned());
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let pending = std::mem::take(&mut self.pending);
        if pending.discarding || (!pending.has_data && pending.event.is_none()) {
            return None;
        }
        Some(SseFrame {
            event: pending.event,
            data: pending.data,
            id: pending.id,
        })
    }

    /// Pull the next line, absorbing over-long or non-UTF-8 lines into a
    /// dropped frame.
    fn next_line(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<String>> {
        loop {
            let decoded = if eof {
                self.lines.decode_eof(src)
            } else {
                self.lines.decode(src)
            };
            let raw = match decoded {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    warn!(
                        max_frame_bytes = self.max_frame_bytes,
                        "sse codec: line too long, dropping frame"
                    );
                    self.pending.discarding = true;
                    continue;
                }
                Err(AnyDelimiterCodecError::Io(io_err)) => {
                    return Err(AppError::Io(io_err.to_string()));
                }
            };

            let line = raw.strip_suffix(b"\r").unwrap_or(&raw[..]);
            match std::str::from_utf8(line) {
                Ok(line) => return Ok(Some(line.to_owned())),
                Err(err) => {
                    warn!(error = %err, "sse codec: line is not valid UTF-8, dropping frame");
                    self.pending.discarding = true;
                }
            }
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = AppError;

    /// Decode the next complete frame from `src`.
    ///
    /// Returns `Ok(None)` while the buffered bytes hold no blank-line
    /// terminated frame yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(line) = self.next_line(src, false)? {
            if let Some(frame) = self.accept_line(&line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Drain the remaining lines at EOF; an unterminated frame is dropped.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(line) = self.next_line(src, true)? {
            if let Some(frame) = self.accept_line(&line) {
                return Ok(Some(frame));
            }
        }
        if self.pending.is_open() {
            debug!("sse codec: discarding unterminated frame at eof");
        }
        self.pending = PendingFrame::default();
        Ok(None)
    }
}
