//! Streaming log scanner: locates `8=FIX...10=NNN<delim>` message spans
//! embedded in noisy, multi-delimiter log files and yields them as
//! [`RawMessage`]s in file order.

use crate::canon::{canonicalize_all, strip_brackets, Delimiter};
use crate::error::ScanError;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const ANCHOR: &[u8] = b"8=FIX";

lazy_static! {
    static ref TIMESTAMP_RE: Regex =
        Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(\.\d{1,3})?").expect("valid regex");
    static ref DIRECTION_RE: Regex = Regex::new(r"(?i)\b(IN|OUT)\b").expect("valid regex");
}

/// Message direction as lifted from a log line prefix.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Sent by us.
    In,
    /// Received / expected.
    Out,
}

/// One FIX message as recovered from a log, before field-level parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Source log file.
    pub source: PathBuf,
    /// Byte offset of the `8=FIX` anchor within the file.
    pub offset: u64,
    /// Canonical, SOH-delimited payload, brackets stripped.
    pub payload: Vec<u8>,
    /// Timestamp lifted from the log prefix, if recognized.
    pub timestamp: Option<String>,
    /// Direction token lifted from the log prefix, if recognized.
    pub direction: Option<Direction>,
}

/// Scanner configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Bytes read per underlying file read. Must be >= 16.
    pub chunk_size: usize,
    /// Longest span, in bytes, an anchor-to-closer message may occupy.
    /// Must be >= max(64, chunk_size).
    pub max_message_length: usize,
    /// Which delimiter variants to recognize as field separators.
    pub supported_delimiters: Vec<Delimiter>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_message_length: 64 * 1024,
            supported_delimiters: Delimiter::ALL.to_vec(),
        }
    }
}

impl ScanConfig {
    fn validate(&self) -> Result<(), ScanError> {
        if self.chunk_size < 16 {
            return Err(ScanError::InvalidConfig(format!(
                "chunk_size must be >= 16, got {}",
                self.chunk_size
            )));
        }
        if self.max_message_length < self.chunk_size.max(64) {
            return Err(ScanError::InvalidConfig(format!(
                "max_message_length must be >= max(64, chunk_size), got {}",
                self.max_message_length
            )));
        }
        Ok(())
    }
}

/// A single-pass, file-ordered iterator over the `RawMessage`s in a log
/// file. Created by [`scan`].
pub struct Scanner {
    file: File,
    config: ScanConfig,
    source: PathBuf,
    buf: Vec<u8>,
    /// Absolute file offset of `buf[0]`.
    buf_base: u64,
    eof: bool,
    done: bool,
}

/// Opens `path` and returns a lazy [`Scanner`] over its `RawMessage`s.
pub fn scan(path: impl AsRef<Path>, config: ScanConfig) -> Result<Scanner, ScanError> {
    config.validate()?;
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ScanError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Scanner {
        file,
        config,
        source: path.to_path_buf(),
        buf: Vec::new(),
        buf_base: 0,
        eof: false,
        done: false,
    })
}

impl Scanner {
    fn fill(&mut self) -> Result<bool, ScanError> {
        if self.eof {
            return Ok(false);
        }
        let mut chunk = vec![0u8; self.config.chunk_size];
        let n = self.file.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        chunk.truncate(n);
        self.buf.extend_from_slice(&chunk);
        Ok(true)
    }

    /// Drops the first `n` bytes of `buf`, advancing `buf_base` to match.
    fn trim_front(&mut self, n: usize) {
        self.buf.drain(0..n);
        self.buf_base += n as u64;
    }

    /// Finds the closing `10=DDD<delim>` starting the search at `from`
    /// (relative to `buf`), within `max_message_length` of `anchor_rel`.
    /// Returns the relative end offset (exclusive, past the delimiter) if
    /// found within the window and the buffer currently holds enough data
    /// to decide; `None` if not found in the currently available window
    /// but more data might still resolve it (the caller distinguishes
    /// "need more bytes" from "not present" via the window bound check).
    fn find_closer(&self, anchor_rel: usize) -> Option<usize> {
        let window_end = (anchor_rel + self.config.max_message_length).min(self.buf.len());
        let mut i = anchor_rel;
        while i + 3 <= window_end {
            if &self.buf[i..i + 3] == b"10=" {
                let digits_start = i + 3;
                if digits_start + 3 > self.buf.len() {
                    // Not enough bytes yet to know the 3 digits.
                    return None;
                }
                let digits = &self.buf[digits_start..digits_start + 3];
                if digits.iter().all(u8::is_ascii_digit) {
                    let delim_pos = digits_start + 3;
                    if delim_pos >= self.buf.len() {
                        return None;
                    }
                    if is_delimiter_byte(self.buf[delim_pos], &self.config.supported_delimiters)
                        || is_caret_a(&self.buf, delim_pos, &self.config.supported_delimiters)
                    {
                        let end = delim_pos
                            + if is_caret_a(&self.buf, delim_pos, &self.config.supported_delimiters)
                            {
                                2
                            } else {
                                1
                            };
                        return Some(end);
                    }
                }
            }
            i += 1;
        }
        None
    }

    /// Advances one logical step. Returns `Ok(Some(msg))` for an emitted
    /// message, `Ok(None)` once the scan is exhausted.
    fn advance(&mut self) -> Result<Option<RawMessage>, ScanError> {
        loop {
            if self.done {
                return Ok(None);
            }

            let anchor_rel = find_anchor(&self.buf);

            let Some(anchor_rel) = anchor_rel else {
                // No anchor in the current buffer. Keep at most
                // `ANCHOR.len() - 1` trailing bytes (a partial anchor might
                // be forming at the tail) and try to read more.
                let keep_from = self.buf.len().saturating_sub(ANCHOR.len() - 1);
                self.trim_front(keep_from);
                if !self.fill()? {
                    self.done = true;
                    return Ok(None);
                }
                continue;
            };

            match self.find_closer(anchor_rel) {
                Some(end_rel) => {
                    let prefix = &self.buf[0..anchor_rel];
                    let prefix_str = String::from_utf8_lossy(prefix);
                    let line_prefix = prefix_str.rsplit(['\n', '\r']).next().unwrap_or("");
                    let timestamp = TIMESTAMP_RE
                        .find(line_prefix)
                        .map(|m| m.as_str().to_string());
                    let direction = DIRECTION_RE.find(line_prefix).map(|m| {
                        if m.as_str().eq_ignore_ascii_case("IN") {
                            Direction::In
                        } else {
                            Direction::Out
                        }
                    });

                    let raw_span = &self.buf[anchor_rel..end_rel];
                    let stripped = strip_brackets(raw_span);
                    let payload = canonicalize_all(stripped);

                    let offset = self.buf_base + anchor_rel as u64;
                    let source = self.source.clone();

                    self.trim_front(end_rel);

                    return Ok(Some(RawMessage {
                        source,
                        offset,
                        payload,
                        timestamp,
                        direction,
                    }));
                }
                None => {
                    // Either need more data, or the window is already
                    // exhausted (anchor unresolvable) — decide which.
                    let window_end =
                        (anchor_rel + self.config.max_message_length).min(self.buf.len());
                    let window_is_full = window_end - anchor_rel >= self.config.max_message_length
                        || self.eof;
                    if !window_is_full {
                        if !self.fill()? {
                            // EOF reached with an unresolved anchor: drop it.
                            log::warn!(
                                "{}: dropping unresolved '8=FIX' anchor at offset {} (truncated at EOF)",
                                self.source.display(),
                                self.buf_base + anchor_rel as u64
                            );
                            self.trim_front(anchor_rel + 1);
                            continue;
                        }
                        continue;
                    }
                    // Anchor exceeded max_message_length without a closer: drop it.
                    log::warn!(
                        "{}: dropping '8=FIX' anchor at offset {} (no closer within {} bytes)",
                        self.source.display(),
                        self.buf_base + anchor_rel as u64,
                        self.config.max_message_length
                    );
                    self.trim_front(anchor_rel + 1);
                    continue;
                }
            }
        }
    }
}

impl Iterator for Scanner {
    type Item = Result<RawMessage, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn find_anchor(buf: &[u8]) -> Option<usize> {
    if buf.len() < ANCHOR.len() {
        return None;
    }
    buf.windows(ANCHOR.len()).position(|w| w == ANCHOR)
}

fn is_delimiter_byte(b: u8, supported: &[Delimiter]) -> bool {
    (b == 0x01 && supported.contains(&Delimiter::Soh)) || (b == b'|' && supported.contains(&Delimiter::Pipe))
}

fn is_caret_a(buf: &[u8], pos: usize, supported: &[Delimiter]) -> bool {
    supported.contains(&Delimiter::CaretA)
        && buf.get(pos) == Some(&b'^')
        && buf.get(pos + 1) == Some(&b'A')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scan_bytes(bytes: &[u8], config: ScanConfig) -> Vec<RawMessage> {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(bytes).expect("write");
        let results: Vec<_> = scan(f.path(), config)
            .expect("scan open")
            .collect::<Result<_, _>>()
            .expect("scan ok");
        results
    }

    #[test]
    fn finds_two_bracketed_messages_with_noise() {
        let log = b"INFO startup\n\
2026-02-28 10:00:00.123 IN  [8=FIX.4.4|9=112|35=D|11=ORD-1|10=128|]\n\
noise\n\
2026-02-28 10:00:01.456 OUT [8=FIX.4.4|9=095|35=8|37=EX-1|10=042|]\n";
        let msgs = scan_bytes(log, ScanConfig::default());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].direction, Some(Direction::In));
        assert_eq!(msgs[0].timestamp.as_deref(), Some("2026-02-28 10:00:00.123"));
        assert!(!msgs[0].payload.contains(&b'['));
        assert!(!msgs[0].payload.contains(&b']'));
        assert_eq!(msgs[1].direction, Some(Direction::Out));
    }

    #[test]
    fn determinism_across_chunk_sizes() {
        let log = b"2026-02-28 10:00:00 IN 8=FIX.4.4\x0135=D\x0111=ORD-1\x0110=128\x01\n\
noise noise noise noise\n\
2026-02-28 10:00:01 OUT 8=FIX.4.4\x0135=8\x0137=EX-1\x0110=042\x01\n";
        let small = scan_bytes(
            log,
            ScanConfig {
                chunk_size: 16,
                max_message_length: 4096,
                ..ScanConfig::default()
            },
        );
        let large = scan_bytes(
            log,
            ScanConfig {
                chunk_size: 4096,
                max_message_length: 4096,
                ..ScanConfig::default()
            },
        );
        let small_payloads: Vec<_> = small.iter().map(|m| m.payload.clone()).collect();
        let large_payloads: Vec<_> = large.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(small_payloads, large_payloads);
    }

    #[test]
    fn drops_anchor_with_no_closer_within_budget() {
        let log = b"8=FIX.4.4 no closer here at all, just junk trailing on and on";
        let config = ScanConfig {
            chunk_size: 16,
            max_message_length: 64,
            ..ScanConfig::default()
        };
        let msgs = scan_bytes(log, config);
        assert!(msgs.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ScanConfig {
            chunk_size: 4,
            ..ScanConfig::default()
        };
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(b"irrelevant").expect("write");
        assert!(scan(f.path(), config).is_err());
    }

    #[test]
    fn open_failure_is_fatal() {
        let config = ScanConfig::default();
        let result = scan("/nonexistent/path/does/not/exist.log", config);
        assert!(result.is_err());
    }
}
