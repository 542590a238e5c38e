use std::sync::Arc;

use arrow::array::BinaryArray;

use crate::{cursor::Cursor, error::DecodeError};

use super::{entry_slices, BasketPayload, EntryDecoder};

/// Length-prefixed strings, optionally behind an object header.
#[derive(Debug)]
pub struct StringDecoder {
    pub header_bytes: usize,
}

impl StringDecoder {
    fn read_entry<'a>(&self, index: usize, entry: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        let mut cursor = Cursor::new(entry);
        cursor.skip(self.header_bytes)?;
        let value = cursor.string_bytes()?;
        if !cursor.is_exhausted() {
            return Err(DecodeError::MalformedPayload(format!(
                "string entry {} has {} trailing bytes",
                index,
                cursor.remaining()
            )));
        }
        Ok(value)
    }
}

impl EntryDecoder for StringDecoder {
    fn decode(
        &self,
        data: &[u8],
        offsets: Option<&[usize]>,
        entries: usize,
    ) -> Result<BasketPayload, DecodeError> {
        let mut values = Vec::with_capacity(entries);
        match offsets {
            Some(offsets) => {
                for (i, entry) in entry_slices(data, offsets).enumerate() {
                    values.push(self.read_entry(i, entry)?);
                }
            }
            None if self.header_bytes > 0 && entries > 0 => {
                return Err(DecodeError::MissingEntryOffsets)
            }
            None => {
                let mut cursor = Cursor::new(data);
                for _ in 0..entries {
                    values.push(cursor.string_bytes()?);
                }
                if !cursor.is_exhausted() {
                    return Err(DecodeError::MalformedPayload(format!(
                        "{} bytes left after {} strings",
                        cursor.remaining(),
                        entries
                    )));
                }
            }
        }
        Ok(BasketPayload::Entries(Arc::new(
            BinaryArray::from_iter_values(values),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray};

    fn short_string(value: &str) -> Vec<u8> {
        let mut bytes = vec![value.len() as u8];
        bytes.extend_from_slice(value.as_bytes());
        bytes
    }

    #[test]
    fn strings_without_offsets_are_read_in_sequence() {
        let data = [short_string("alpha"), short_string(""), short_string("z")].concat();
        let decoder = StringDecoder { header_bytes: 0 };
        let payload = decoder.decode(&data, None, 3).unwrap();
        let strings = payload.array().as_binary::<i32>();
        assert_eq!(strings.len(), 3);
        assert_eq!(strings.value(0), b"alpha");
        assert_eq!(strings.value(1), b"");
        assert_eq!(strings.value(2), b"z");
    }

    #[test]
    fn long_strings_use_the_wide_length() {
        let value = "x".repeat(300);
        let mut data = vec![255];
        data.extend_from_slice(&300u32.to_be_bytes());
        data.extend_from_slice(value.as_bytes());
        let decoder = StringDecoder { header_bytes: 0 };
        let payload = decoder.decode(&data, Some(&[0, data.len()]), 1).unwrap();
        assert_eq!(payload.array().as_binary::<i32>().value(0), value.as_bytes());
    }

    #[test]
    fn object_strings_need_entry_offsets() {
        let mut data = vec![0x40, 0, 0, 8, 0, 1];
        data.extend(short_string("hi"));
        let decoder = StringDecoder { header_bytes: 6 };
        assert!(matches!(
            decoder.decode(&data, None, 1),
            Err(DecodeError::MissingEntryOffsets)
        ));
        let payload = decoder.decode(&data, Some(&[0, data.len()]), 1).unwrap();
        assert_eq!(payload.array().as_binary::<i32>().value(0), b"hi");
    }

    #[test]
    fn leftover_bytes_are_rejected() {
        let mut data = short_string("ab");
        data.push(7);
        let decoder = StringDecoder { header_bytes: 0 };
        assert!(decoder.decode(&data, None, 1).is_err());
        assert!(decoder.decode(&data, Some(&[0, data.len()]), 1).is_err());
    }
}
