use std::sync::Arc;

use arbor_arrow_root::{DecodedColumn, TypeDescriptor};
use arrow::{
    array::{ArrayRef, AsArray, StringArray},
    datatypes::{DataType, Field},
};

/// The Parquet-facing field of a column with the given descriptor.
pub fn export_field(name: &str, descriptor: &TypeDescriptor) -> Field {
    Field::new(name, descriptor.arrow_type(), false)
}

/// Turns a decoded column into the field and array handed to the writer.
///
/// String columns are stored as binary; they are written as UTF-8 when every value is valid
/// UTF-8 and left as binary otherwise.
pub fn prepare_column(column: DecodedColumn) -> (Field, ArrayRef) {
    let field = export_field(column.name(), column.descriptor());
    let array = column.into_array();
    if field.data_type() != &DataType::Binary {
        return (field, array);
    }
    match StringArray::try_from_binary(array.as_binary::<i32>().clone()) {
        Ok(strings) => (field.with_data_type(DataType::Utf8), Arc::new(strings)),
        Err(_) => (field, array),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_arrow_root::Primitive;
    use arrow::array::{Array, BinaryArray};

    #[test]
    fn descriptors_map_to_arrow_fields() {
        let field = export_field("px", &TypeDescriptor::VarArray(Primitive::Float32));
        match field.data_type() {
            DataType::List(item) => assert_eq!(item.data_type(), &DataType::Float32),
            other => panic!("unexpected type {}", other),
        }
        assert!(!field.is_nullable());

        let fixed = export_field("pos", &TypeDescriptor::FixedArray(Primitive::Int16, 3));
        assert!(matches!(fixed.data_type(), DataType::FixedSizeList(_, 3)));
        assert_eq!(
            export_field("n", &TypeDescriptor::UInt64).data_type(),
            &DataType::UInt64
        );
    }

    #[test]
    fn binary_is_upgraded_to_utf8_only_when_valid() {
        let valid = BinaryArray::from_iter_values([&b"alpha"[..], &b"beta"[..]]);
        let (field, array) = prepare_column(decoded("label", valid));
        assert_eq!(field.data_type(), &DataType::Utf8);
        assert_eq!(array.as_string::<i32>().value(1), "beta");

        let invalid = BinaryArray::from_iter_values([&b"ok"[..], &[0xffu8, 0xfe][..]]);
        let (field, array) = prepare_column(decoded("raw", invalid));
        assert_eq!(field.data_type(), &DataType::Binary);
        assert_eq!(array.len(), 2);
    }

    fn decoded(name: &str, values: BinaryArray) -> DecodedColumn {
        let rows = values.len() as u64;
        DecodedColumn::new(name, TypeDescriptor::String, 0..rows, Arc::new(values))
    }
}
