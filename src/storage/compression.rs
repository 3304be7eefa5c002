use std::io::{self, BufReader, Read, Write};

use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder;

use crate::core::{Error, Result};

pub const MAX_LEVEL: i32 = 22;
/// 128 MiB history; also the largest window the reader accepts.
pub const MAX_WINDOW_LOG: u32 = 27;
pub const MIN_WINDOW_LOG: u32 = 10;

/// zstd parameters for the container body. One profile applies to the
/// whole solid stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionProfile {
    pub level: i32,
    pub window_log: u32,
    pub long_distance_matching: bool,
}

impl Default for CompressionProfile {
    fn default() -> Self {
        Self {
            level: MAX_LEVEL,
            window_log: MAX_WINDOW_LOG,
            long_distance_matching: true,
        }
    }
}

impl CompressionProfile {
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_window_log(mut self, window_log: u32) -> Self {
        self.window_log = window_log;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.level) {
            return Err(Error::InvalidConfig(format!(
                "compression level {} outside {}..={}",
                self.level,
                levels.start(),
                levels.end()
            )));
        }
        if !(MIN_WINDOW_LOG..=MAX_WINDOW_LOG).contains(&self.window_log) {
            return Err(Error::InvalidConfig(format!(
                "window log {} outside {MIN_WINDOW_LOG}..={MAX_WINDOW_LOG}",
                self.window_log
            )));
        }
        Ok(())
    }
}

/// Opens the single zstd frame that carries the record stream.
///
/// `body_len` must be the exact number of decompressed bytes that will be
/// written; zstd records it in the frame header and sizes its tables from it.
pub(crate) fn body_encoder<W: Write>(
    out: W,
    profile: &CompressionProfile,
    body_len: u64,
) -> io::Result<Encoder<'static, W>> {
    let mut encoder = Encoder::new(out, profile.level)?;
    encoder.window_log(profile.window_log)?;
    encoder.long_distance_matching(profile.long_distance_matching)?;
    encoder.include_checksum(true)?;
    encoder.include_contentsize(true)?;
    encoder.set_pledged_src_size(Some(body_len))?;
    Ok(encoder)
}

pub(crate) fn body_decoder<R: Read>(input: R) -> io::Result<Decoder<'static, BufReader<R>>> {
    let mut decoder = Decoder::new(input)?;
    decoder.window_log_max(MAX_WINDOW_LOG)?;
    Ok(decoder)
}
