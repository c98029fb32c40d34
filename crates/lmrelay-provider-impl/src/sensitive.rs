use bytes::Bytes;

use lmrelay_provider_core::{EventSink, RelayError};

/// Marker string some upstreams inject into an otherwise 200 response
/// when the input trips their content filter.
pub const SENSITIVE_MARKER: &str = "系统检测到您当前输入的信息存在敏感内容";

/// Whole-request re-issues after a marker hit, on top of the first
/// attempt.
pub const MAX_SENSITIVE_RETRIES: u32 = 3;

/// Unary bodies are only inspected up to this many bytes; the marker
/// always leads the refusal payload.
pub const PEEK_BYTES: usize = 4096;

/// Streamed text is inspected until this many characters have been seen,
/// then the held-back frames are released and inspection stops.
pub const STREAM_CHECK_CHARS: usize = 200;

pub fn body_has_marker(body: &str) -> bool {
    let mut end = body.len().min(PEEK_BYTES);
    while end < body.len() && !body.is_char_boundary(end) {
        end += 1;
    }
    body[..end].contains(SENSITIVE_MARKER)
}

/// Holds outbound frames back until enough text has been inspected to
/// rule the marker out. Frames for a flagged stream are never released,
/// so the caller is free to retry on a fresh key.
#[derive(Debug, Default)]
pub struct DetectionWindow {
    seen: String,
    held: Vec<Bytes>,
    released: bool,
}

impl DetectionWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds decoded delta text; returns true once the marker shows up.
    pub fn observe(&mut self, text: &str) -> bool {
        if self.released || text.is_empty() {
            return false;
        }
        self.seen.push_str(text);
        self.seen.contains(SENSITIVE_MARKER)
    }

    pub async fn forward(
        &mut self,
        frame: Bytes,
        sink: &mut dyn EventSink,
    ) -> Result<(), RelayError> {
        if self.released {
            return sink.send(frame).await;
        }
        self.held.push(frame);
        if self.seen.chars().count() >= STREAM_CHECK_CHARS {
            self.release(sink).await?;
        }
        Ok(())
    }

    pub async fn release(&mut self, sink: &mut dyn EventSink) -> Result<(), RelayError> {
        self.released = true;
        for frame in self.held.drain(..) {
            sink.send(frame).await?;
        }
        Ok(())
    }
}
