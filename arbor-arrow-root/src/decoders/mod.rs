use std::{fmt::Debug, sync::Arc};

use arrow::array::{
    ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};

use crate::{
    error::DecodeError,
    types::{list_item_field, DecodePlan, Encoding, Primitive, TypeDescriptor},
};

pub mod jagged;
pub mod strings;

/// Values decoded from one basket.
#[derive(Debug, Clone)]
pub enum BasketPayload {
    /// One array element per entry.
    Entries(ArrayRef),
    /// Flattened values of a counted column; per-entry counts come from its count leaf.
    Values(ArrayRef),
}

impl BasketPayload {
    pub fn array(&self) -> &ArrayRef {
        match self {
            BasketPayload::Entries(array) | BasketPayload::Values(array) => array,
        }
    }
}

/// Turns the data region of a basket into arrays.
pub trait EntryDecoder: Debug + Send + Sync {
    /// `offsets` holds `entries + 1` positions into `data` when the basket carries an
    /// entry-offset table.
    fn decode(
        &self,
        data: &[u8],
        offsets: Option<&[usize]>,
        entries: usize,
    ) -> Result<BasketPayload, DecodeError>;
}

pub fn decoder_for(plan: &DecodePlan) -> Result<Box<dyn EntryDecoder>, DecodeError> {
    let decoder: Box<dyn EntryDecoder> = match (&plan.descriptor, &plan.encoding) {
        (TypeDescriptor::FixedArray(primitive, len), Encoding::Packed { header_bytes }) => {
            Box::new(PackedDecoder {
                primitive: *primitive,
                width: *len,
                header_bytes: *header_bytes,
            })
        }
        (descriptor, Encoding::Packed { header_bytes }) if descriptor.is_scalar() => {
            Box::new(PackedDecoder {
                primitive: descriptor.primitive().ok_or_else(|| no_decoder(plan))?,
                width: 1,
                header_bytes: *header_bytes,
            })
        }
        (TypeDescriptor::VarArray(primitive), Encoding::Counted { header_bytes, .. }) => {
            Box::new(jagged::CountedDecoder {
                primitive: *primitive,
                header_bytes: *header_bytes,
            })
        }
        (TypeDescriptor::VarArray(primitive), Encoding::Prefixed { header_bytes }) => {
            Box::new(jagged::PrefixedDecoder {
                primitive: *primitive,
                header_bytes: *header_bytes,
            })
        }
        (TypeDescriptor::String, Encoding::Strings { header_bytes }) => {
            Box::new(strings::StringDecoder {
                header_bytes: *header_bytes,
            })
        }
        _ => return Err(no_decoder(plan)),
    };
    Ok(decoder)
}

fn no_decoder(plan: &DecodePlan) -> DecodeError {
    DecodeError::MalformedPayload(format!(
        "no decoder for {} stored as {:?}",
        plan.descriptor, plan.encoding
    ))
}

/// Splits `data` into entries using an entry-offset table.
pub(crate) fn entry_slices<'a>(
    data: &'a [u8],
    offsets: &'a [usize],
) -> impl Iterator<Item = &'a [u8]> + 'a {
    offsets.windows(2).map(move |w| &data[w[0]..w[1]])
}

/// Fixed-size entries: scalars or fixed arrays, each optionally behind an object header.
#[derive(Debug)]
pub struct PackedDecoder {
    pub primitive: Primitive,
    pub width: usize,
    pub header_bytes: usize,
}

impl PackedDecoder {
    fn entry_size(&self) -> usize {
        self.primitive.size() * self.width
    }

    fn strip_headers(
        &self,
        data: &[u8],
        offsets: Option<&[usize]>,
        entries: usize,
    ) -> Result<Vec<u8>, DecodeError> {
        let entry_size = self.entry_size();
        let mut values = Vec::with_capacity(entries * entry_size);
        match offsets {
            Some(offsets) => {
                for (i, entry) in entry_slices(data, offsets).enumerate() {
                    if entry.len() != self.header_bytes + entry_size {
                        return Err(DecodeError::MalformedPayload(format!(
                            "entry {} holds {} bytes, expected {}",
                            i,
                            entry.len(),
                            self.header_bytes + entry_size
                        )));
                    }
                    values.extend_from_slice(&entry[self.header_bytes..]);
                }
            }
            None => {
                let stride = self.header_bytes + entry_size;
                check_len(data.len(), entries, stride)?;
                for entry in data.chunks_exact(stride) {
                    values.extend_from_slice(&entry[self.header_bytes..]);
                }
            }
        }
        Ok(values)
    }
}

impl EntryDecoder for PackedDecoder {
    fn decode(
        &self,
        data: &[u8],
        offsets: Option<&[usize]>,
        entries: usize,
    ) -> Result<BasketPayload, DecodeError> {
        let values = if self.header_bytes == 0 {
            check_len(data.len(), entries, self.entry_size())?;
            decode_primitives(self.primitive, data)?
        } else {
            decode_primitives(self.primitive, &self.strip_headers(data, offsets, entries)?)?
        };
        if self.width == 1 {
            return Ok(BasketPayload::Entries(values));
        }
        let list = FixedSizeListArray::try_new(
            list_item_field(self.primitive),
            self.width as i32,
            values,
            None,
        )?;
        Ok(BasketPayload::Entries(Arc::new(list)))
    }
}

fn check_len(actual: usize, entries: usize, entry_size: usize) -> Result<(), DecodeError> {
    if actual != entries * entry_size {
        return Err(DecodeError::MalformedPayload(format!(
            "{} bytes cannot hold {} entries of {} bytes",
            actual, entries, entry_size
        )));
    }
    Ok(())
}

macro_rules! be_array {
    ($bytes:expr, $native:ty, $array:ty) => {{
        const WIDTH: usize = std::mem::size_of::<$native>();
        let values = $bytes.chunks_exact(WIDTH).map(|chunk| {
            let mut raw = [0u8; WIDTH];
            raw.copy_from_slice(chunk);
            <$native>::from_be_bytes(raw)
        });
        Arc::new(<$array>::from_iter_values(values)) as ArrayRef
    }};
}

/// Decodes packed big-endian values.
pub fn decode_primitives(primitive: Primitive, bytes: &[u8]) -> Result<ArrayRef, DecodeError> {
    if bytes.len() % primitive.size() != 0 {
        return Err(DecodeError::MalformedPayload(format!(
            "{} bytes is not a whole number of {} values",
            bytes.len(),
            primitive.cpp_name()
        )));
    }
    let array = match primitive {
        Primitive::Bool => Arc::new(BooleanArray::from(
            bytes.iter().map(|b| *b != 0).collect::<Vec<_>>(),
        )) as ArrayRef,
        Primitive::Int8 => be_array!(bytes, i8, Int8Array),
        Primitive::Int16 => be_array!(bytes, i16, Int16Array),
        Primitive::Int32 => be_array!(bytes, i32, Int32Array),
        Primitive::Int64 => be_array!(bytes, i64, Int64Array),
        Primitive::UInt8 => be_array!(bytes, u8, UInt8Array),
        Primitive::UInt16 => be_array!(bytes, u16, UInt16Array),
        Primitive::UInt32 => be_array!(bytes, u32, UInt32Array),
        Primitive::UInt64 => be_array!(bytes, u64, UInt64Array),
        Primitive::Float32 => be_array!(bytes, f32, Float32Array),
        Primitive::Float64 => be_array!(bytes, f64, Float64Array),
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{Array, AsArray},
        datatypes::{
            Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
            UInt32Type, UInt64Type, UInt8Type,
        },
    };

    fn entries(payload: BasketPayload) -> ArrayRef {
        match payload {
            BasketPayload::Entries(array) => array,
            BasketPayload::Values(_) => panic!("expected one element per entry"),
        }
    }

    // ── Primitive values ───────────────────────────────────────────────────

    macro_rules! test_primitive_decoding {
        ($test_name:ident, $native:ty, $primitive:expr, $arrow_type:ty, $values:expr) => {
            #[test]
            fn $test_name() {
                let values: Vec<$native> = $values;
                let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
                let array = decode_primitives($primitive, &bytes).unwrap();
                assert_eq!(array.len(), values.len(), "Array length mismatch");
                let typed = array.as_primitive::<$arrow_type>();
                for (i, expected) in values.iter().enumerate() {
                    assert_eq!(typed.value(i), *expected, "Value mismatch at index {i}");
                }
            }
        };
    }

    test_primitive_decoding!(decodes_i8, i8, Primitive::Int8, Int8Type, vec![-128, -1, 0, 127]);
    test_primitive_decoding!(decodes_u8, u8, Primitive::UInt8, UInt8Type, vec![0, 1, 255]);
    test_primitive_decoding!(
        decodes_i16,
        i16,
        Primitive::Int16,
        Int16Type,
        vec![i16::MIN, -1, 0, i16::MAX]
    );
    test_primitive_decoding!(decodes_u16, u16, Primitive::UInt16, UInt16Type, vec![0, 65535]);
    test_primitive_decoding!(
        decodes_i32,
        i32,
        Primitive::Int32,
        Int32Type,
        vec![i32::MIN, -1, 0, 1, i32::MAX]
    );
    test_primitive_decoding!(
        decodes_u32,
        u32,
        Primitive::UInt32,
        UInt32Type,
        vec![0, 100_000, u32::MAX]
    );
    test_primitive_decoding!(
        decodes_i64,
        i64,
        Primitive::Int64,
        Int64Type,
        vec![i64::MIN, -1, 0, i64::MAX]
    );
    test_primitive_decoding!(
        decodes_u64,
        u64,
        Primitive::UInt64,
        UInt64Type,
        vec![0, 1, u64::MAX]
    );
    test_primitive_decoding!(
        decodes_f32,
        f32,
        Primitive::Float32,
        Float32Type,
        vec![-1.5, 0.0, f32::MAX]
    );
    test_primitive_decoding!(
        decodes_f64,
        f64,
        Primitive::Float64,
        Float64Type,
        vec![4.1, 5.2, 6.3]
    );

    #[test]
    fn decodes_bools() {
        let array = decode_primitives(Primitive::Bool, &[1, 0, 2]).unwrap();
        let bools = array.as_boolean();
        assert!(bools.value(0));
        assert!(!bools.value(1));
        assert!(bools.value(2));
    }

    #[test]
    fn partial_values_are_rejected() {
        assert!(matches!(
            decode_primitives(Primitive::Int32, &[0, 0, 1]),
            Err(DecodeError::MalformedPayload(_))
        ));
    }

    // ── Packed entries ─────────────────────────────────────────────────────

    #[test]
    fn packed_scalars_must_fill_the_basket() {
        let decoder = PackedDecoder {
            primitive: Primitive::Int16,
            width: 1,
            header_bytes: 0,
        };
        let data = [0, 1, 0, 2, 0, 3];
        let array = entries(decoder.decode(&data, None, 3).unwrap());
        assert_eq!(array.as_primitive::<Int16Type>().values(), &[1, 2, 3]);
        assert!(decoder.decode(&data, None, 2).is_err());
    }

    #[test]
    fn packed_fixed_arrays() {
        let decoder = PackedDecoder {
            primitive: Primitive::UInt8,
            width: 3,
            header_bytes: 0,
        };
        let array = entries(decoder.decode(&[1, 2, 3, 4, 5, 6], None, 2).unwrap());
        let list = array.as_fixed_size_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list.value_length(), 3);
        assert_eq!(
            list.value(1).as_primitive::<UInt8Type>().values(),
            &[4, 5, 6]
        );
    }

    #[test]
    fn packed_objects_skip_their_headers() {
        let decoder = PackedDecoder {
            primitive: Primitive::Float32,
            width: 1,
            header_bytes: 6,
        };
        let mut data = Vec::new();
        for value in [1.0f32, 2.0] {
            data.extend_from_slice(&[0x40, 0, 0, 6, 0, 1]);
            data.extend_from_slice(&value.to_be_bytes());
        }
        let with_offsets = entries(decoder.decode(&data, Some(&[0, 10, 20]), 2).unwrap());
        assert_eq!(with_offsets.as_primitive::<Float32Type>().values(), &[1.0, 2.0]);
        let by_stride = entries(decoder.decode(&data, None, 2).unwrap());
        assert_eq!(by_stride.as_primitive::<Float32Type>().values(), &[1.0, 2.0]);
        assert!(decoder.decode(&data, Some(&[0, 9, 20]), 2).is_err());
    }

    #[test]
    fn mismatched_plans_have_no_decoder() {
        let plan = DecodePlan::new(TypeDescriptor::String, Encoding::Packed { header_bytes: 0 });
        assert!(decoder_for(&plan).is_err());
        let plan = DecodePlan::new(
            TypeDescriptor::Float64,
            Encoding::Prefixed { header_bytes: 6 },
        );
        assert!(decoder_for(&plan).is_err());
    }
}
