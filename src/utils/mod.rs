//! Shared utilities.

pub mod decode;

pub use decode::{decode, BodyDecoder, Utf8Lossy};
