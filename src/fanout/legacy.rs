//! Chunked text replay for viewers that predate structured log messages.
//!
//! Wire contract: one handshake frame, then the raw backlog split into
//! windows of `LEGACY_CHUNK_SIZE` bytes. A window whose tail is a truncated
//! UTF-8 sequence is held back and prefixed onto the next one, so no frame
//! ever ends mid-character.

use std::time::Duration;
use tracing::debug;

use super::bounded;
use crate::sink::Sink;

/// First frame of the legacy protocol, identifying version 0.0.
pub const LEGACY_HANDSHAKE: &[u8] = br#"{"version":"0.0"}"#;

/// Window size the raw backlog is split on.
pub const LEGACY_CHUNK_SIZE: usize = 1024;

/// Send the legacy handshake and the chunked backlog. Best effort: the first
/// failed send ends the replay and nothing is reported back.
pub async fn emit_backwards_compatible(
    sink: &mut dyn Sink,
    log: &[u8],
    send_timeout: Option<Duration>,
) {
    if let Err(e) = bounded(send_timeout, sink.send_text(LEGACY_HANDSHAKE)).await {
        debug!(error = %e, "legacy handshake failed");
        return;
    }

    let mut frames = 0usize;
    for frame in LegacyFrames::new(log) {
        if let Err(e) = bounded(send_timeout, sink.send_text(&frame)).await {
            debug!(error = %e, frames, "legacy replay aborted");
            return;
        }
        frames += 1;
    }
    debug!(frames, bytes = log.len(), "legacy replay complete");
}

/// Splits a raw log into boundary-safe text frames.
pub struct LegacyFrames<'a> {
    log: &'a [u8],
    pos: usize,
    dangling: Vec<u8>,
}

impl<'a> LegacyFrames<'a> {
    pub fn new(log: &'a [u8]) -> Self {
        Self {
            log,
            pos: 0,
            dangling: Vec::new(),
        }
    }
}

impl Iterator for LegacyFrames<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        while self.pos < self.log.len() {
            let end = (self.pos + LEGACY_CHUNK_SIZE).min(self.log.len());
            let mut text = std::mem::take(&mut self.dangling);
            text.extend_from_slice(&self.log[self.pos..end]);
            self.pos = end;

            if ends_mid_char(&text) {
                self.dangling = text;
                continue;
            }
            return Some(text);
        }

        // A log that itself ends mid-character still goes out whole.
        if self.dangling.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.dangling))
        }
    }
}

/// True when `buf` ends with a UTF-8 lead byte whose sequence is cut short.
fn ends_mid_char(buf: &[u8]) -> bool {
    for back in 1..=buf.len().min(4) {
        let byte = buf[buf.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return false,
        };
        return width > back;
    }
    false
}
