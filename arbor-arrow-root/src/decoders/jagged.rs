//! Variable-length array columns.

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, AsArray, ListArray},
    buffer::OffsetBuffer,
    compute::cast,
    datatypes::{DataType, Int64Type},
};

use crate::{
    cursor::Cursor,
    error::DecodeError,
    types::{list_item_field, Primitive},
};

use super::{decode_primitives, entry_slices, BasketPayload, EntryDecoder};

/// Values of a leaf whose per-entry lengths are stored in a separate count leaf.
#[derive(Debug)]
pub struct CountedDecoder {
    pub primitive: Primitive,
    /// Bytes in front of every non-empty entry.
    pub header_bytes: usize,
}

impl EntryDecoder for CountedDecoder {
    fn decode(
        &self,
        data: &[u8],
        offsets: Option<&[usize]>,
        entries: usize,
    ) -> Result<BasketPayload, DecodeError> {
        if self.header_bytes == 0 {
            return Ok(BasketPayload::Values(decode_primitives(self.primitive, data)?));
        }
        let offsets = match offsets {
            Some(offsets) => offsets,
            None if entries == 0 => NO_ENTRIES,
            None => return Err(DecodeError::MissingEntryOffsets),
        };
        let mut values = Vec::with_capacity(data.len());
        for (i, entry) in entry_slices(data, offsets).enumerate() {
            if entry.is_empty() {
                continue;
            }
            if entry.len() < self.header_bytes {
                return Err(DecodeError::MalformedPayload(format!(
                    "entry {} is shorter than its {} byte header",
                    i, self.header_bytes
                )));
            }
            values.extend_from_slice(&entry[self.header_bytes..]);
        }
        Ok(BasketPayload::Values(decode_primitives(self.primitive, &values)?))
    }
}

const NO_ENTRIES: &[usize] = &[0];

/// `std::vector<T>` entries: an object header, an element count, then the elements.
#[derive(Debug)]
pub struct PrefixedDecoder {
    pub primitive: Primitive,
    pub header_bytes: usize,
}

impl EntryDecoder for PrefixedDecoder {
    fn decode(
        &self,
        data: &[u8],
        offsets: Option<&[usize]>,
        entries: usize,
    ) -> Result<BasketPayload, DecodeError> {
        let offsets = match offsets {
            Some(offsets) => offsets,
            None if entries == 0 => NO_ENTRIES,
            None => return Err(DecodeError::MissingEntryOffsets),
        };
        let width = self.primitive.size();
        let mut list_offsets = Vec::with_capacity(entries + 1);
        list_offsets.push(0i32);
        let mut values = Vec::with_capacity(data.len());
        for (i, entry) in entry_slices(data, offsets).enumerate() {
            let mut cursor = Cursor::new(entry);
            cursor.skip(self.header_bytes)?;
            let len = cursor.count("vector length")?;
            values.extend_from_slice(cursor.bytes(len * width)?);
            if !cursor.is_exhausted() {
                return Err(DecodeError::MalformedPayload(format!(
                    "entry {} has {} trailing bytes after {} elements",
                    i,
                    cursor.remaining(),
                    len
                )));
            }
            let end = values.len() / width;
            list_offsets.push(i32::try_from(end).map_err(|_| {
                DecodeError::MalformedPayload(format!("{} values overflow list offsets", end))
            })?);
        }
        let list = ListArray::try_new(
            list_item_field(self.primitive),
            OffsetBuffer::new(list_offsets.into()),
            decode_primitives(self.primitive, &values)?,
            None,
        )?;
        Ok(BasketPayload::Entries(Arc::new(list)))
    }
}

/// Reads per-entry lengths out of a materialized count column.
pub fn counts_from_array(array: &ArrayRef) -> Result<Vec<usize>, DecodeError> {
    let counts = cast(array, &DataType::Int64)?;
    counts
        .as_primitive::<Int64Type>()
        .values()
        .iter()
        .enumerate()
        .map(|(i, count)| {
            usize::try_from(*count).map_err(|_| {
                DecodeError::MalformedPayload(format!(
                    "negative element count {} at entry {}",
                    count, i
                ))
            })
        })
        .collect()
}

/// Pairs flattened values with per-entry counts.
pub fn assemble_counted(
    primitive: Primitive,
    counts: &[usize],
    values: ArrayRef,
) -> Result<ListArray, DecodeError> {
    let counted: usize = counts.iter().sum();
    if counted != values.len() {
        return Err(DecodeError::CountMismatch {
            counted: counted as u64,
            decoded: values.len() as u64,
        });
    }
    let offsets = OffsetBuffer::<i32>::from_lengths(counts.iter().copied());
    Ok(ListArray::try_new(
        list_item_field(primitive),
        offsets,
        values,
        None,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{Int32Array, UInt8Array},
        datatypes::{Float64Type, Int32Type},
    };

    fn vector_entry(header: usize, values: &[i32]) -> Vec<u8> {
        let mut entry = vec![0u8; header];
        entry.extend_from_slice(&(values.len() as i32).to_be_bytes());
        for value in values {
            entry.extend_from_slice(&value.to_be_bytes());
        }
        entry
    }

    // ── Prefixed entries ───────────────────────────────────────────────────

    #[test]
    fn vectors_become_list_entries() {
        let mut data = Vec::new();
        let mut offsets = vec![0];
        for entry in [&[1, 2][..], &[], &[3]] {
            data.extend(vector_entry(6, entry));
            offsets.push(data.len());
        }
        let decoder = PrefixedDecoder {
            primitive: Primitive::Int32,
            header_bytes: 6,
        };
        let BasketPayload::Entries(array) = decoder.decode(&data, Some(&offsets), 3).unwrap() else {
            panic!("vectors decode one list per entry");
        };
        let list = array.as_list::<i32>();
        assert_eq!(list.value_offsets(), &[0, 2, 2, 3]);
        assert_eq!(
            list.values().as_primitive::<Int32Type>().values(),
            &[1, 2, 3]
        );
    }

    #[test]
    fn vectors_need_entry_offsets() {
        let decoder = PrefixedDecoder {
            primitive: Primitive::Int32,
            header_bytes: 6,
        };
        let data = vector_entry(6, &[1]);
        assert!(matches!(
            decoder.decode(&data, None, 1),
            Err(DecodeError::MissingEntryOffsets)
        ));
    }

    #[test]
    fn trailing_bytes_in_an_entry_are_rejected() {
        let decoder = PrefixedDecoder {
            primitive: Primitive::Int32,
            header_bytes: 6,
        };
        let mut data = vector_entry(6, &[1]);
        data.push(0);
        let offsets = [0, data.len()];
        assert!(matches!(
            decoder.decode(&data, Some(&offsets), 1),
            Err(DecodeError::MalformedPayload(_))
        ));
    }

    // ── Counted values ─────────────────────────────────────────────────────

    #[test]
    fn counted_values_are_unsized() {
        let decoder = CountedDecoder {
            primitive: Primitive::Float64,
            header_bytes: 0,
        };
        let data: Vec<u8> = [1.5f64, 2.5, 3.5].iter().flat_map(|v| v.to_be_bytes()).collect();
        let BasketPayload::Values(values) = decoder.decode(&data, None, 2).unwrap() else {
            panic!("counted columns decode flat values");
        };
        assert_eq!(
            values.as_primitive::<Float64Type>().values(),
            &[1.5, 2.5, 3.5]
        );
    }

    #[test]
    fn counted_members_skip_their_presence_byte() {
        let decoder = CountedDecoder {
            primitive: Primitive::UInt8,
            header_bytes: 1,
        };
        // entries: [7, 8], [], [9]
        let data = [1, 7, 8, 1, 9];
        let BasketPayload::Values(values) = decoder.decode(&data, Some(&[0, 3, 3, 5]), 3).unwrap()
        else {
            panic!("counted columns decode flat values");
        };
        assert_eq!(values.as_primitive::<arrow::datatypes::UInt8Type>().values(), &[7, 8, 9]);
        assert!(decoder.decode(&data, None, 3).is_err());
    }

    #[test]
    fn counts_and_values_are_paired() {
        let values: ArrayRef = Arc::new(UInt8Array::from(vec![1, 2, 3]));
        let counts = counts_from_array(&(Arc::new(Int32Array::from(vec![2, 0, 1])) as ArrayRef))
            .unwrap();
        let list = assemble_counted(Primitive::UInt8, &counts, values.clone()).unwrap();
        assert_eq!(list.value_offsets(), &[0, 2, 2, 3]);

        assert!(matches!(
            assemble_counted(Primitive::UInt8, &[2, 2], values),
            Err(DecodeError::CountMismatch {
                counted: 4,
                decoded: 3
            })
        ));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let counts: ArrayRef = Arc::new(Int32Array::from(vec![1, -1]));
        assert!(counts_from_array(&counts).is_err());
    }
}
