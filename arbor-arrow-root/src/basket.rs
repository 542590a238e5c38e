//! Reading and decoding single baskets.

use std::ops::Range;

use arrow::array::Array;
use bytes::Bytes;
use tracing::debug;

use crate::{
    compression,
    cursor::Cursor,
    decoders::{decoder_for, BasketPayload},
    error::DecodeError,
    file::SourceFile,
    key::KeyHeader,
    types::DecodePlan,
};

/// Where one basket of a column is stored and which entries it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasketRef {
    pub index: usize,
    pub seek: u64,
    /// Key plus compressed payload size.
    pub nbytes: u32,
    pub first_entry: u64,
    pub entry_count: u64,
}

impl BasketRef {
    pub fn entries(&self) -> Range<u64> {
        self.first_entry..self.first_entry + self.entry_count
    }
}

#[derive(Debug, Clone)]
pub struct DecodedBasket {
    pub first_entry: u64,
    pub entry_count: u64,
    pub payload: BasketPayload,
}

/// The TBasket fields that follow the key header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasketHeader {
    pub version: i16,
    pub buffer_size: i32,
    /// Size of the entry-offset table, zero for fixed-size entries.
    pub nev_buf_size: i32,
    pub nev_buf: i32,
    /// End of the data region, measured from the start of the key.
    pub last: i32,
}

impl BasketHeader {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        let version = cursor.i16()?;
        let buffer_size = cursor.i32()?;
        let nev_buf_size = cursor.i32()?;
        let nev_buf = cursor.i32()?;
        let last = cursor.i32()?;
        let _flag = cursor.u8()?;
        Ok(Self {
            version,
            buffer_size,
            nev_buf_size,
            nev_buf,
            last,
        })
    }
}

/// Reads, decompresses and decodes one basket.
pub fn decode_basket(
    file: &SourceFile,
    basket: &BasketRef,
    plan: &DecodePlan,
) -> Result<DecodedBasket, DecodeError> {
    let header = file.header();
    header
        .check_range("basket", basket.seek, basket.nbytes as u64)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
    let raw = file.source().read_at(basket.seek, basket.nbytes as usize)?;

    let mut cursor = Cursor::new(&raw);
    let key = KeyHeader::read(&mut cursor)?;
    if key.nbytes != basket.nbytes {
        return Err(DecodeError::SizeMismatch {
            declared: basket.nbytes as u64,
            actual: key.nbytes as u64,
        });
    }
    let basket_header = BasketHeader::read(&mut cursor)?;
    if basket_header.nev_buf as i64 != basket.entry_count as i64 {
        return Err(DecodeError::EntryCount {
            expected: basket.entry_count,
            actual: basket_header.nev_buf.max(0) as u64,
        });
    }

    let keylen = key.keylen as usize;
    if keylen > raw.len() {
        return Err(DecodeError::MalformedPayload(format!(
            "key length {} exceeds basket size {}",
            keylen,
            raw.len()
        )));
    }
    let stored = raw.slice(keylen..);
    let buffer = if key.is_compressed() {
        Bytes::from(compression::decompress(
            &stored,
            key.objlen as usize,
            header.codec(),
        )?)
    } else {
        stored
    };

    let (data, offsets) =
        split_buffer(&buffer, &basket_header, keylen, basket.entry_count as usize)?;
    debug!(
        seek = basket.seek,
        entries = basket.entry_count,
        bytes = buffer.len(),
        compressed = key.is_compressed(),
        "Decoding basket"
    );

    let decoder = decoder_for(plan)?;
    let payload = decoder.decode(data, offsets.as_deref(), basket.entry_count as usize)?;
    if let BasketPayload::Entries(array) = &payload {
        if array.len() as u64 != basket.entry_count {
            return Err(DecodeError::EntryCount {
                expected: basket.entry_count,
                actual: array.len() as u64,
            });
        }
    }
    Ok(DecodedBasket {
        first_entry: basket.first_entry,
        entry_count: basket.entry_count,
        payload,
    })
}

/// Splits an uncompressed basket into its data region and its entry offsets.
///
/// Offsets are rebased to the data region and closed with its length, giving
/// `entries + 1` positions.
fn split_buffer<'a>(
    buffer: &'a [u8],
    header: &BasketHeader,
    keylen: usize,
    entries: usize,
) -> Result<(&'a [u8], Option<Vec<usize>>), DecodeError> {
    let border = usize::try_from(header.last)
        .ok()
        .and_then(|last| last.checked_sub(keylen))
        .filter(|border| *border <= buffer.len())
        .ok_or_else(|| {
            DecodeError::MalformedPayload(format!(
                "data region end {} outside a {} byte buffer after a {} byte key",
                header.last,
                buffer.len(),
                keylen
            ))
        })?;
    let (data, table) = buffer.split_at(border);
    if table.is_empty() {
        return Ok((data, None));
    }

    let mut cursor = Cursor::new(table);
    let stored = cursor.count("entry offset count")?;
    if stored < entries {
        return Err(DecodeError::MalformedPayload(format!(
            "{} entry offsets for {} entries",
            stored, entries
        )));
    }
    let mut offsets = Vec::with_capacity(entries + 1);
    for i in 0..entries {
        let raw = cursor.i32()?;
        let offset = usize::try_from(raw)
            .ok()
            .and_then(|raw| raw.checked_sub(keylen))
            .ok_or_else(|| {
                DecodeError::MalformedPayload(format!(
                    "entry {} offset {} precedes the data",
                    i, raw
                ))
            })?;
        offsets.push(offset);
    }
    offsets.push(border);

    if let Some(i) = offsets.windows(2).position(|w| w[0] > w[1]) {
        return Err(DecodeError::MalformedPayload(format!(
            "entry offsets are not monotonic at entry {}",
            i
        )));
    }
    Ok((data, Some(offsets)))
}
