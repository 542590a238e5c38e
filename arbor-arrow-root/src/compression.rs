//! Compressed payload frames.
//!
//! A compressed object is a sequence of frames. Each frame starts with a 9-byte header:
//! a 2-byte codec tag, one method byte, then the compressed and uncompressed frame sizes
//! as 24-bit little-endian integers. LZ4 frames additionally carry an 8-byte checksum in
//! front of the block.

use std::fmt;

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::DecodeError;

pub const FRAME_HEADER_LEN: usize = 9;
pub const LZ4_CHECKSUM_LEN: usize = 8;
/// Largest payload a single frame can describe.
pub const MAX_FRAME_LEN: usize = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Zlib,
    Lzma,
    Legacy,
    Lz4,
    Zstd,
}

impl Codec {
    pub fn from_tag(tag: [u8; 2]) -> Option<Codec> {
        match &tag {
            b"ZL" => Some(Codec::Zlib),
            b"XZ" => Some(Codec::Lzma),
            b"CS" => Some(Codec::Legacy),
            b"L4" => Some(Codec::Lz4),
            b"ZS" => Some(Codec::Zstd),
            _ => None,
        }
    }

    pub fn tag(self) -> [u8; 2] {
        match self {
            Codec::Zlib => *b"ZL",
            Codec::Lzma => *b"XZ",
            Codec::Legacy => *b"CS",
            Codec::Lz4 => *b"L4",
            Codec::Zstd => *b"ZS",
        }
    }

    /// Maps a file compression setting (`algorithm * 100 + level`) to its codec.
    /// A level of zero means the file is stored uncompressed.
    pub fn from_setting(setting: i32) -> Option<Codec> {
        if setting <= 0 || setting % 100 == 0 {
            return None;
        }
        match setting / 100 {
            0 | 1 => Some(Codec::Zlib),
            2 => Some(Codec::Lzma),
            3 => Some(Codec::Legacy),
            4 => Some(Codec::Lz4),
            5 => Some(Codec::Zstd),
            _ => None,
        }
    }

    pub fn algorithm_id(self) -> i32 {
        match self {
            Codec::Zlib => 1,
            Codec::Lzma => 2,
            Codec::Legacy => 3,
            Codec::Lz4 => 4,
            Codec::Zstd => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Zlib => "zlib",
            Codec::Lzma => "lzma",
            Codec::Legacy => "legacy",
            Codec::Lz4 => "lz4",
            Codec::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inflates one frame body into `out`, returning the number of bytes written.
type FrameDecoder = fn(&[u8], &mut [u8]) -> Result<usize, DecodeError>;

const FRAME_DECODERS: [(Codec, Option<FrameDecoder>); 5] = [
    (Codec::Zlib, Some(inflate_zlib)),
    (Codec::Lzma, None),
    (Codec::Legacy, None),
    (Codec::Lz4, Some(inflate_lz4)),
    (Codec::Zstd, Some(inflate_zstd)),
];

fn frame_decoder(codec: Codec) -> Result<FrameDecoder, DecodeError> {
    FRAME_DECODERS
        .iter()
        .find(|(candidate, _)| *candidate == codec)
        .and_then(|(_, decoder)| *decoder)
        .ok_or(DecodeError::UnsupportedCodec(codec.name()))
}

fn inflate_zlib(body: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
    let mut inflater = Decompress::new(true);
    let status = inflater
        .decompress(body, out, FlushDecompress::Finish)
        .map_err(|e| DecodeError::Decompression {
            codec: Codec::Zlib.name(),
            reason: e.to_string(),
        })?;
    if status != Status::StreamEnd {
        return Err(DecodeError::Decompression {
            codec: Codec::Zlib.name(),
            reason: format!(
                "stream did not end after {} output bytes",
                inflater.total_out()
            ),
        });
    }
    Ok(inflater.total_out() as usize)
}

fn inflate_lz4(body: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
    let block = body
        .get(LZ4_CHECKSUM_LEN..)
        .ok_or_else(|| DecodeError::MalformedFrame("lz4 frame shorter than its checksum".into()))?;
    lz4_flex::block::decompress_into(block, out).map_err(|e| DecodeError::Decompression {
        codec: Codec::Lz4.name(),
        reason: e.to_string(),
    })
}

fn inflate_zstd(body: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
    zstd::bulk::decompress_to_buffer(body, out).map_err(|e| DecodeError::Decompression {
        codec: Codec::Zstd.name(),
        reason: e.to_string(),
    })
}

fn u24_le(bytes: &[u8]) -> usize {
    bytes[0] as usize | (bytes[1] as usize) << 8 | (bytes[2] as usize) << 16
}

/// Decompresses a framed payload into exactly `expected_len` bytes.
///
/// Frames tagged with two zero bytes are decoded with `fallback`, the codec declared by the
/// file header. Any frame size that disagrees with the declared total is an error.
pub fn decompress(
    payload: &[u8],
    expected_len: usize,
    fallback: Option<Codec>,
) -> Result<Vec<u8>, DecodeError> {
    let mut out = vec![0u8; expected_len];
    let mut written = 0;
    let mut input = payload;

    while written < expected_len {
        if input.len() < FRAME_HEADER_LEN {
            return Err(DecodeError::MalformedFrame(format!(
                "{} bytes left, too short for a frame header ({} of {} bytes inflated)",
                input.len(),
                written,
                expected_len
            )));
        }
        let tag = [input[0], input[1]];
        let compressed_len = u24_le(&input[3..6]);
        let frame_len = u24_le(&input[6..9]);

        let codec = if tag == [0, 0] {
            fallback.ok_or(DecodeError::UnknownCodec(tag))?
        } else {
            Codec::from_tag(tag).ok_or(DecodeError::UnknownCodec(tag))?
        };
        if frame_len == 0 {
            return Err(DecodeError::MalformedFrame(
                "frame declares an empty output".into(),
            ));
        }
        let body = input
            .get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + compressed_len)
            .ok_or_else(|| {
                DecodeError::MalformedFrame(format!(
                    "frame declares {} compressed bytes, {} available",
                    compressed_len,
                    input.len() - FRAME_HEADER_LEN
                ))
            })?;
        if written + frame_len > expected_len {
            return Err(DecodeError::LengthMismatch {
                expected: expected_len,
                actual: written + frame_len,
            });
        }

        let decoder = frame_decoder(codec)?;
        let inflated = decoder(body, &mut out[written..written + frame_len])?;
        if inflated != frame_len {
            return Err(DecodeError::LengthMismatch {
                expected: frame_len,
                actual: inflated,
            });
        }

        written += frame_len;
        input = &input[FRAME_HEADER_LEN + compressed_len..];
    }

    if !input.is_empty() {
        return Err(DecodeError::MalformedFrame(format!(
            "{} trailing bytes after the last frame",
            input.len()
        )));
    }
    Ok(out)
}
