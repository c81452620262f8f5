use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::CommandError;

pub const TERMINATOR: u8 = b'\n';

/// Joins wireless write fragments into newline-terminated messages.
///
/// A train of fragments must keep arriving within `timeout` of each other;
/// a train that goes quiet is abandoned rather than glued onto the next one.
#[derive(Debug)]
pub struct FragmentReassembler {
    chunks: Vec<Vec<u8>>,
    buffered_bytes: usize,
    last_chunk_at: Option<Instant>,
    timeout: Duration,
    max_message_bytes: usize,
}

impl FragmentReassembler {
    pub fn new(timeout: Duration, max_message_bytes: usize) -> Self {
        Self {
            chunks: Vec::new(),
            buffered_bytes: 0,
            last_chunk_at: None,
            timeout,
            max_message_bytes,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Feeds one fragment received at `now`.
    ///
    /// Returns the decoded message once a fragment carries the terminator,
    /// `Ok(None)` while the message is still incomplete.
    pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) -> Result<Option<String>, CommandError> {
        if let Some(last) = self.last_chunk_at {
            if !self.chunks.is_empty() && now.saturating_duration_since(last) > self.timeout {
                warn!(
                    "previous fragment train timed out, discarding {} buffered bytes",
                    self.buffered_bytes
                );
                self.reset();
            }
        }

        self.last_chunk_at = Some(now);
        self.buffered_bytes += chunk.len();
        if self.buffered_bytes > self.max_message_bytes {
            let size = self.buffered_bytes;
            self.reset();
            return Err(CommandError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            });
        }

        if !chunk.contains(&TERMINATOR) {
            self.chunks.push(chunk.to_vec());
            debug!("buffered fragment {} ({} bytes so far)", self.chunks.len(), self.buffered_bytes);
            return Ok(None);
        }

        let mut message = std::mem::take(&mut self.chunks).concat();
        message.extend(chunk.iter().copied().filter(|&byte| byte != TERMINATOR));
        self.reset();

        String::from_utf8(message)
            .map(Some)
            .map_err(|_| CommandError::InvalidEncoding)
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
        self.buffered_bytes = 0;
        self.last_chunk_at = None;
    }
}
