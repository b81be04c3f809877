//! Best-effort text decoding for message bodies and process output.
//!
//! Decoding never fails: bytes that are not valid in the target encoding are
//! replaced with U+FFFD. The strategy is a trait so a charset-sniffing decoder
//! can be swapped in without touching the worker or the boss.

use std::borrow::Cow;

/// Turns raw bytes into text without ever failing.
pub trait BodyDecoder: Send + Sync {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;
}

/// Strict UTF-8, falling back to replacement characters on invalid sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Lossy;

impl BodyDecoder for Utf8Lossy {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        // A UTF-8 BOM is stripped, matching what charset detection yields for
        // "UTF-8-SIG" input.
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        String::from_utf8_lossy(bytes)
    }
}

/// Decodes with the default strategy.
pub fn decode(bytes: &[u8]) -> Cow<'_, str> {
    Utf8Lossy.decode(bytes)
}
