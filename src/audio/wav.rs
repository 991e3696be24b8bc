//! WAV container header
//!
//! Fixed 44-byte little-endian RIFF/WAVE header prefixed to every persisted
//! recording. A placeholder is written when the file is opened; the real
//! header is patched in at finalize time, once the payload size is known.

use crate::config::Encoding;
use crate::{FastrecError, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Total header size on disk
pub const HEADER_LEN: usize = 44;

/// WAVE format code for uncompressed PCM
const FORMAT_PCM: u16 = 1;
/// WAVE format code for IMA ADPCM
const FORMAT_IMA_ADPCM: u16 = 17;

/// Fixed-layout WAV header metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavHeader {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub payload_len: u32,
}

impl WavHeader {
    /// Build a mono header for the given encoding and payload size
    ///
    /// The ADPCM payload is a raw packed nibble stream (two samples per
    /// byte, no per-block predictor preamble), not the block-structured
    /// layout format 17 usually implies. `block_align` is therefore 1, the
    /// byte granularity of the stream, and `byte_rate` carries the physical
    /// packed rate (`sample_rate / 2` bytes per second) rather than
    /// `sample_rate * block_align`.
    pub fn mono(encoding: Encoding, sample_rate: u32, payload_len: u32) -> Self {
        let (format, bits_per_sample, block_align) = match encoding {
            Encoding::Pcm16 => (FORMAT_PCM, 16u16, 2u16),
            Encoding::ImaAdpcm => (FORMAT_IMA_ADPCM, 4u16, 1u16),
        };
        Self {
            format,
            channels: 1,
            sample_rate,
            byte_rate: sample_rate * bits_per_sample as u32 / 8,
            block_align,
            bits_per_sample,
            payload_len,
        }
    }

    /// Serialize into the 44-byte on-disk layout
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(b"RIFF");
        buf[4..8].copy_from_slice(&(self.payload_len + 36).to_le_bytes());
        buf[8..12].copy_from_slice(b"WAVE");
        buf[12..16].copy_from_slice(b"fmt ");
        buf[16..20].copy_from_slice(&16u32.to_le_bytes());
        buf[20..22].copy_from_slice(&self.format.to_le_bytes());
        buf[22..24].copy_from_slice(&self.channels.to_le_bytes());
        buf[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        buf[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        buf[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        buf[36..40].copy_from_slice(b"data");
        buf[40..44].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Parse a header from the start of a byte slice
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(FastrecError::StorageWriteError(format!(
                "header truncated: {} bytes",
                buf.len()
            )));
        }
        if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" || &buf[12..16] != b"fmt " {
            return Err(FastrecError::StorageWriteError("bad RIFF/WAVE tags".into()));
        }
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            payload_len: u32_at(40),
        })
    }

    /// Write a zeroed placeholder at the current position
    pub fn write_placeholder<W: Write>(w: &mut W) -> Result<()> {
        w.write_all(&[0u8; HEADER_LEN])?;
        Ok(())
    }

    /// Seek back to the start of the file and write the final header
    pub fn patch<W: Write + Seek>(&self, w: &mut W) -> Result<()> {
        w.seek(SeekFrom::Start(0))?;
        w.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read and parse the header from the start of a seekable stream
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; HEADER_LEN];
        r.read_exact(&mut buf)?;
        Self::parse(&buf)
    }
}
