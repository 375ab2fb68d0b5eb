//! # Configuration Module
//!
//! Layout constants live in [`constants`] with their interdependencies
//! enforced at compile time. Runtime tunables are never global: the one
//! tunable this crate has, the compression level used when a compressed page
//! is reorganized, is the explicit [`CompressionLevel`] value that callers
//! pass to `insert_rec_zip` and `reorganize_zip`.

pub mod constants;
pub use constants::*;

use eyre::{ensure, Result};

/// Compression effort used when a compressed page image is rebuilt.
///
/// 0 stores without compression, 9 is the slowest and tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Result<Self> {
        ensure!(
            level <= MAX_COMPRESSION_LEVEL,
            "compression level {} out of range 0..={}",
            level,
            MAX_COMPRESSION_LEVEL
        );
        Ok(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(DEFAULT_COMPRESSION_LEVEL)
    }
}
