//! Output coalescing for terminal clients on slow links.

use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

use crate::common::config::TerminalSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every shell chunk is forwarded as it arrives
    Immediate,
    /// Chunks are buffered until `interval` passes or the buffer fills
    Batched { interval: Duration },
}

impl DeliveryMode {
    /// Resolve client preferences. Low bandwidth implies batching unless the
    /// client explicitly turned batching off.
    pub fn from_preferences(
        batch_updates: Option<bool>,
        low_bandwidth: bool,
        settings: &TerminalSettings,
    ) -> Self {
        if !batch_updates.unwrap_or(low_bandwidth) {
            return DeliveryMode::Immediate;
        }
        let ms = if low_bandwidth {
            settings.low_bandwidth_interval_ms
        } else {
            settings.batch_interval_ms
        };
        DeliveryMode::Batched {
            interval: Duration::from_millis(ms),
        }
    }
}

/// Byte buffer with a size threshold and an age clock.
#[derive(Debug)]
pub struct OutputBatcher {
    buffer: BytesMut,
    threshold: usize,
    since: Option<Instant>,
}

impl OutputBatcher {
    pub fn new(threshold: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            threshold: threshold.max(1),
            since: None,
        }
    }

    /// Append output. Returns the whole buffer once it reaches the threshold.
    pub fn push(&mut self, data: &[u8], now: Instant) -> Option<Bytes> {
        if self.buffer.is_empty() {
            self.since = Some(now);
        }
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.threshold {
            self.take()
        } else {
            None
        }
    }

    /// When the buffered output must be flushed under `interval`.
    pub fn deadline(&self, interval: Duration) -> Option<Instant> {
        self.since.map(|since| since + interval)
    }

    pub fn take(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        self.since = None;
        Some(self.buffer.split().freeze())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decodes a byte stream to text without splitting multi-byte characters
/// that straddle chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to marks a checked boundary
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: hold it for the next chunk
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        text
    }

    /// Whatever is left, with invalid bytes replaced.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_at_threshold() {
        let now = Instant::now();
        let mut batcher = OutputBatcher::new(4);

        assert_eq!(batcher.push(b"ab", now), None);
        assert_eq!(batcher.push(b"cd", now), Some(Bytes::from_static(b"abcd")));
        assert!(batcher.is_empty());
        assert_eq!(batcher.deadline(Duration::from_millis(16)), None);
    }

    #[test]
    fn deadline_tracks_oldest_buffered_byte() {
        let start = Instant::now();
        let mut batcher = OutputBatcher::new(1024);
        batcher.push(b"a", start);
        batcher.push(b"b", start + Duration::from_millis(10));

        assert_eq!(
            batcher.deadline(Duration::from_millis(16)),
            Some(start + Duration::from_millis(16))
        );
        assert_eq!(batcher.take(), Some(Bytes::from_static(b"ab")));
        assert_eq!(batcher.take(), None);
    }

    #[test]
    fn preferences_pick_interval() {
        let settings = TerminalSettings::default();
        assert_eq!(
            DeliveryMode::from_preferences(None, false, &settings),
            DeliveryMode::Immediate
        );
        assert_eq!(
            DeliveryMode::from_preferences(Some(true), false, &settings),
            DeliveryMode::Batched {
                interval: Duration::from_millis(16)
            }
        );
        assert_eq!(
            DeliveryMode::from_preferences(None, true, &settings),
            DeliveryMode::Batched {
                interval: Duration::from_millis(50)
            }
        );
        assert_eq!(
            DeliveryMode::from_preferences(Some(false), true, &settings),
            DeliveryMode::Immediate
        );
    }

    #[test]
    fn decoder_holds_split_characters() {
        let mut decoder = Utf8Decoder::default();
        let snowman = "☃".as_bytes();

        assert_eq!(decoder.decode(&[b'a', snowman[0]]), "a");
        assert_eq!(decoder.decode(&snowman[1..]), "☃");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xff, b'y']), "x\u{fffd}y");
    }

    #[test]
    fn decoder_keeps_split_character_after_invalid_byte() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[0xff, 0xe2]), "\u{fffd}");
        assert_eq!(decoder.decode(&[0x98, 0x83]), "☃");
        assert_eq!(decoder.decode(&[0xe2, 0x98, 0xff, b'z']), "\u{fffd}\u{fffd}z");
        assert_eq!(decoder.finish(), "");
    }
}
