//! Column types and the rules mapping stored type metadata onto them.

use std::{fmt, sync::Arc};

use arrow_schema::{DataType, Field};

use crate::{
    error::UnsupportedType,
    objects::{
        streamers::{codes, stl, ElementKind, StreamerInfo, StreamerLookup},
        tree::{ElementInfo, LeafRecord},
    },
};

/// Size of the byte count and version written in front of a streamed object.
pub const OBJECT_HEADER_LEN: usize = 6;
/// Presence byte written in front of each counter-sized array of a split member.
const COUNTED_MEMBER_HEADER_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl Primitive {
    pub fn size(self) -> usize {
        match self {
            Primitive::Bool | Primitive::Int8 | Primitive::UInt8 => 1,
            Primitive::Int16 | Primitive::UInt16 => 2,
            Primitive::Int32 | Primitive::UInt32 | Primitive::Float32 => 4,
            Primitive::Int64 | Primitive::UInt64 | Primitive::Float64 => 8,
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            Primitive::Bool => DataType::Boolean,
            Primitive::Int8 => DataType::Int8,
            Primitive::Int16 => DataType::Int16,
            Primitive::Int32 => DataType::Int32,
            Primitive::Int64 => DataType::Int64,
            Primitive::UInt8 => DataType::UInt8,
            Primitive::UInt16 => DataType::UInt16,
            Primitive::UInt32 => DataType::UInt32,
            Primitive::UInt64 => DataType::UInt64,
            Primitive::Float32 => DataType::Float32,
            Primitive::Float64 => DataType::Float64,
        }
    }

    pub fn cpp_name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int8 => "int8_t",
            Primitive::Int16 => "int16_t",
            Primitive::Int32 => "int32_t",
            Primitive::Int64 => "int64_t",
            Primitive::UInt8 => "uint8_t",
            Primitive::UInt16 => "uint16_t",
            Primitive::UInt32 => "uint32_t",
            Primitive::UInt64 => "uint64_t",
            Primitive::Float32 => "float",
            Primitive::Float64 => "double",
        }
    }

    /// Maps a basic streamer type code (1-19).
    pub fn from_type_code(code: i32) -> Option<Primitive> {
        match code {
            codes::CHAR => Some(Primitive::Int8),
            codes::SHORT => Some(Primitive::Int16),
            codes::INT | codes::COUNTER => Some(Primitive::Int32),
            codes::LONG | codes::LONG64 => Some(Primitive::Int64),
            codes::FLOAT => Some(Primitive::Float32),
            codes::DOUBLE => Some(Primitive::Float64),
            codes::UCHAR => Some(Primitive::UInt8),
            codes::USHORT => Some(Primitive::UInt16),
            codes::UINT | codes::BITS => Some(Primitive::UInt32),
            codes::ULONG | codes::ULONG64 => Some(Primitive::UInt64),
            codes::BOOL => Some(Primitive::Bool),
            _ => None,
        }
    }

    /// Maps C++ and ROOT typedef spellings of the primitive types.
    pub fn from_cpp_name(name: &str) -> Option<Primitive> {
        match name.trim() {
            "bool" | "Bool_t" => Some(Primitive::Bool),
            "char" | "Char_t" | "int8_t" | "signed char" => Some(Primitive::Int8),
            "unsigned char" | "UChar_t" | "uint8_t" => Some(Primitive::UInt8),
            "short" | "Short_t" | "int16_t" => Some(Primitive::Int16),
            "unsigned short" | "UShort_t" | "uint16_t" => Some(Primitive::UInt16),
            "int" | "Int_t" | "int32_t" => Some(Primitive::Int32),
            "unsigned int" | "unsigned" | "UInt_t" | "uint32_t" => Some(Primitive::UInt32),
            "long" | "Long_t" | "long long" | "Long64_t" | "int64_t" => Some(Primitive::Int64),
            "unsigned long" | "ULong_t" | "unsigned long long" | "ULong64_t" | "uint64_t" => {
                Some(Primitive::UInt64)
            }
            "float" | "Float_t" => Some(Primitive::Float32),
            "double" | "Double_t" => Some(Primitive::Float64),
            _ => None,
        }
    }
}

/// The decoded type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    FixedArray(Primitive, usize),
    VarArray(Primitive),
    String,
}

impl From<Primitive> for TypeDescriptor {
    fn from(primitive: Primitive) -> Self {
        match primitive {
            Primitive::Bool => TypeDescriptor::Bool,
            Primitive::Int8 => TypeDescriptor::Int8,
            Primitive::Int16 => TypeDescriptor::Int16,
            Primitive::Int32 => TypeDescriptor::Int32,
            Primitive::Int64 => TypeDescriptor::Int64,
            Primitive::UInt8 => TypeDescriptor::UInt8,
            Primitive::UInt16 => TypeDescriptor::UInt16,
            Primitive::UInt32 => TypeDescriptor::UInt32,
            Primitive::UInt64 => TypeDescriptor::UInt64,
            Primitive::Float32 => TypeDescriptor::Float32,
            Primitive::Float64 => TypeDescriptor::Float64,
        }
    }
}

impl TypeDescriptor {
    /// The primitive of a scalar, or the element primitive of an array.
    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            TypeDescriptor::Bool => Some(Primitive::Bool),
            TypeDescriptor::Int8 => Some(Primitive::Int8),
            TypeDescriptor::Int16 => Some(Primitive::Int16),
            TypeDescriptor::Int32 => Some(Primitive::Int32),
            TypeDescriptor::Int64 => Some(Primitive::Int64),
            TypeDescriptor::UInt8 => Some(Primitive::UInt8),
            TypeDescriptor::UInt16 => Some(Primitive::UInt16),
            TypeDescriptor::UInt32 => Some(Primitive::UInt32),
            TypeDescriptor::UInt64 => Some(Primitive::UInt64),
            TypeDescriptor::Float32 => Some(Primitive::Float32),
            TypeDescriptor::Float64 => Some(Primitive::Float64),
            TypeDescriptor::FixedArray(primitive, _) | TypeDescriptor::VarArray(primitive) => {
                Some(*primitive)
            }
            TypeDescriptor::String => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            TypeDescriptor::FixedArray(..) | TypeDescriptor::VarArray(_) | TypeDescriptor::String
        )
    }

    /// Bytes per entry for fixed-size types.
    pub fn entry_size(&self) -> Option<usize> {
        match self {
            TypeDescriptor::FixedArray(primitive, len) => Some(primitive.size() * len),
            TypeDescriptor::VarArray(_) | TypeDescriptor::String => None,
            scalar => scalar.primitive().map(Primitive::size),
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match self {
            TypeDescriptor::FixedArray(primitive, len) => {
                DataType::FixedSizeList(list_item_field(*primitive), *len as i32)
            }
            TypeDescriptor::VarArray(primitive) => DataType::List(list_item_field(*primitive)),
            TypeDescriptor::String => DataType::Binary,
            scalar => scalar
                .primitive()
                .map(Primitive::data_type)
                .unwrap_or(DataType::Null),
        }
    }

    /// C++ spelling of the stored type, e.g. `std::vector<float>`.
    pub fn item_type_name(&self) -> String {
        match self {
            TypeDescriptor::FixedArray(primitive, len) => {
                format!("{}[{}]", primitive.cpp_name(), len)
            }
            TypeDescriptor::VarArray(primitive) => {
                format!("std::vector<{}>", primitive.cpp_name())
            }
            TypeDescriptor::String => "std::string".to_string(),
            scalar => scalar
                .primitive()
                .map(Primitive::cpp_name)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::FixedArray(primitive, len) => {
                write!(f, "FixedArray({:?}, {})", primitive, len)
            }
            TypeDescriptor::VarArray(primitive) => write!(f, "VarArray({:?})", primitive),
            other => write!(f, "{:?}", other),
        }
    }
}

pub fn list_item_field(primitive: Primitive) -> Arc<Field> {
    Arc::new(Field::new("item", primitive.data_type(), false))
}

/// How the entries of a column are laid out inside a basket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Fixed-size entries, each optionally preceded by an object header.
    Packed { header_bytes: usize },
    /// Values whose per-entry counts live in the sibling leaf `count_leaf`.
    Counted {
        count_leaf: String,
        header_bytes: usize,
    },
    /// Entries carrying their own 32-bit element count after the header.
    Prefixed { header_bytes: usize },
    /// Length-prefixed byte strings.
    Strings { header_bytes: usize },
}

impl Encoding {
    pub fn header_bytes(&self) -> usize {
        match self {
            Encoding::Packed { header_bytes }
            | Encoding::Counted { header_bytes, .. }
            | Encoding::Prefixed { header_bytes }
            | Encoding::Strings { header_bytes } => *header_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodePlan {
    pub descriptor: TypeDescriptor,
    pub encoding: Encoding,
}

impl DecodePlan {
    pub fn new(descriptor: TypeDescriptor, encoding: Encoding) -> Self {
        Self {
            descriptor,
            encoding,
        }
    }

    fn packed(descriptor: impl Into<TypeDescriptor>, header_bytes: usize) -> Self {
        Self::new(descriptor.into(), Encoding::Packed { header_bytes })
    }

    fn strings(header_bytes: usize) -> Self {
        Self::new(TypeDescriptor::String, Encoding::Strings { header_bytes })
    }
}

/// The stored type metadata of one branch.
#[derive(Debug, Clone, Copy)]
pub enum RawTypeInfo<'a> {
    /// A plain branch, described by its leaves.
    Leaves(&'a [LeafRecord]),
    /// A branch holding an object or an object member.
    Element {
        element: &'a ElementInfo,
        leaves: &'a [LeafRecord],
        has_subbranches: bool,
    },
}

/// Resolves the decode plan of one column.
pub struct TypeResolver<'a> {
    column: &'a str,
    streamers: &'a dyn StreamerLookup,
}

impl<'a> TypeResolver<'a> {
    pub fn new(column: &'a str, streamers: &'a dyn StreamerLookup) -> Self {
        Self { column, streamers }
    }

    pub fn resolve(
        &self,
        class_name: &str,
        raw: &RawTypeInfo<'_>,
    ) -> Result<DecodePlan, UnsupportedType> {
        match raw {
            RawTypeInfo::Leaves(leaves) => self.resolve_leaf(class_name, single_leaf(leaves)),
            RawTypeInfo::Element {
                element,
                leaves,
                has_subbranches,
            } => {
                if *has_subbranches {
                    return Err(self.unsupported(
                        class_name,
                        "split object branch; its members are stored as separate columns",
                    ));
                }
                let leaf = single_leaf(leaves)
                    .map_err(|reason| self.unsupported(class_name, reason))?;
                if element.id < 0 {
                    self.resolve_object(&element.class_name)
                } else {
                    self.resolve_member(element, leaf)
                }
            }
        }
    }

    fn unsupported(&self, class_name: &str, reason: impl Into<String>) -> UnsupportedType {
        UnsupportedType::new(self.column, class_name, reason)
    }

    fn resolve_leaf(
        &self,
        class_name: &str,
        leaf: Result<&LeafRecord, String>,
    ) -> Result<DecodePlan, UnsupportedType> {
        let leaf = leaf.map_err(|reason| self.unsupported(class_name, reason))?;
        let primitive = match leaf.class_name.as_str() {
            "TLeafC" => return Ok(DecodePlan::strings(0)),
            "TLeafO" => Primitive::Bool,
            "TLeafB" if leaf.is_unsigned => Primitive::UInt8,
            "TLeafB" => Primitive::Int8,
            "TLeafS" if leaf.is_unsigned => Primitive::UInt16,
            "TLeafS" => Primitive::Int16,
            "TLeafI" if leaf.is_unsigned => Primitive::UInt32,
            "TLeafI" => Primitive::Int32,
            "TLeafL" | "TLeafG" if leaf.is_unsigned => Primitive::UInt64,
            "TLeafL" | "TLeafG" => Primitive::Int64,
            "TLeafF" => Primitive::Float32,
            "TLeafD" => Primitive::Float64,
            other => {
                return Err(self.unsupported(other, "leaf class without a fixed primitive layout"))
            }
        };
        self.shape(&leaf.class_name, primitive, leaf, 0)
    }

    /// Applies the leaf's dimensions to a primitive.
    fn shape(
        &self,
        class_name: &str,
        primitive: Primitive,
        leaf: &LeafRecord,
        counted_header: usize,
    ) -> Result<DecodePlan, UnsupportedType> {
        match (&leaf.count_leaf, leaf.len) {
            (Some(count_leaf), 1) => Ok(DecodePlan::new(
                TypeDescriptor::VarArray(primitive),
                Encoding::Counted {
                    count_leaf: count_leaf.clone(),
                    header_bytes: counted_header,
                },
            )),
            (Some(count_leaf), len) => Err(self.unsupported(
                class_name,
                format!(
                    "variable array counted by {} with inner dimension {}",
                    count_leaf, len
                ),
            )),
            (None, len) if len > 1 => Ok(DecodePlan::packed(
                TypeDescriptor::FixedArray(primitive, len as usize),
                0,
            )),
            (None, _) => Ok(DecodePlan::packed(primitive, 0)),
        }
    }

    /// A whole object stored in one branch.
    fn resolve_object(&self, class_name: &str) -> Result<DecodePlan, UnsupportedType> {
        let class_name = class_name.trim();
        if is_string_class(class_name) {
            return Ok(DecodePlan::strings(OBJECT_HEADER_LEN));
        }
        if let Some(item) = vector_item(class_name) {
            let primitive = self.vector_primitive(class_name, item)?;
            return Ok(DecodePlan::new(
                TypeDescriptor::VarArray(primitive),
                Encoding::Prefixed {
                    header_bytes: OBJECT_HEADER_LEN,
                },
            ));
        }
        let info = self.layout(class_name)?;
        self.resolve_single_member(info)
    }

    /// Accepts a class layout only if it is a single member of a supported kind.
    fn resolve_single_member(&self, info: &StreamerInfo) -> Result<DecodePlan, UnsupportedType> {
        let class_name = info.class_name.as_str();
        if let Some(base) = info.elements.iter().find(|e| e.is_base()) {
            return Err(self.unsupported(class_name, format!("inherits from {}", base.name)));
        }
        let member = match info.elements.as_slice() {
            [member] => member,
            members => {
                return Err(self.unsupported(
                    class_name,
                    format!("{} members; only single-member classes are decoded", members.len()),
                ))
            }
        };
        let header = OBJECT_HEADER_LEN;
        match &member.kind {
            ElementKind::BasicType => {
                let code = member.type_code;
                if let Some(primitive) = Primitive::from_type_code(code) {
                    Ok(DecodePlan::packed(primitive, header))
                } else if let Some(primitive) = code
                    .checked_sub(codes::OFFSET_L)
                    .and_then(Primitive::from_type_code)
                    .filter(|_| member.array_length > 0 && member.array_dim == 1)
                {
                    Ok(DecodePlan::packed(
                        TypeDescriptor::FixedArray(primitive, member.array_length as usize),
                        header,
                    ))
                } else {
                    Err(self.unsupported(
                        class_name,
                        format!("member {}: {}", member.name, code_reason(code)),
                    ))
                }
            }
            ElementKind::String | ElementKind::StlString => Ok(DecodePlan::strings(header)),
            ElementKind::Stl {
                stl_type: stl::STRING,
                ..
            } => Ok(DecodePlan::strings(header)),
            ElementKind::Stl {
                stl_type: stl::VECTOR,
                ..
            } => {
                let item = vector_item(&member.type_name).ok_or_else(|| {
                    self.unsupported(
                        class_name,
                        format!("member {} has container type {}", member.name, member.type_name),
                    )
                })?;
                let primitive = self.vector_primitive(class_name, item)?;
                Ok(DecodePlan::new(
                    TypeDescriptor::VarArray(primitive),
                    Encoding::Prefixed {
                        header_bytes: 2 * OBJECT_HEADER_LEN,
                    },
                ))
            }
            other => Err(self.unsupported(
                class_name,
                format!("member {} is {}", member.name, kind_reason(other)),
            )),
        }
    }

    /// One member of a split object, described by its leaf.
    fn resolve_member(
        &self,
        element: &ElementInfo,
        leaf: &LeafRecord,
    ) -> Result<DecodePlan, UnsupportedType> {
        let class_name = element.class_name.as_str();
        let code = leaf
            .element
            .map(|(_, code)| code)
            .unwrap_or(element.streamer_type);
        if let Some(primitive) = Primitive::from_type_code(code) {
            return Ok(DecodePlan::packed(primitive, 0));
        }
        match code {
            codes::TSTRING => Ok(DecodePlan::strings(0)),
            codes::STL_STRING => Ok(DecodePlan::strings(OBJECT_HEADER_LEN)),
            codes::STL => self.resolve_stl_member(element),
            _ if (codes::OFFSET_L + 1..codes::OFFSET_P).contains(&code) => {
                let primitive = Primitive::from_type_code(code - codes::OFFSET_L)
                    .ok_or_else(|| {
                        self.unsupported(class_name, code_reason(code - codes::OFFSET_L))
                    })?;
                if leaf.len > 1 {
                    Ok(DecodePlan::packed(
                        TypeDescriptor::FixedArray(primitive, leaf.len as usize),
                        0,
                    ))
                } else {
                    Err(self.unsupported(class_name, "fixed array member without a length"))
                }
            }
            _ if (codes::OFFSET_P + 1..codes::OFFSET_P + codes::OFFSET_L).contains(&code) => {
                let primitive = Primitive::from_type_code(code - codes::OFFSET_P)
                    .ok_or_else(|| {
                        self.unsupported(class_name, code_reason(code - codes::OFFSET_P))
                    })?;
                let mut leaf = leaf.clone();
                if leaf.count_leaf.is_none() {
                    leaf.count_leaf = element.count_branch.clone();
                }
                if leaf.count_leaf.is_none() {
                    return Err(
                        self.unsupported(class_name, "variable array member without a counter")
                    );
                }
                self.shape(class_name, primitive, &leaf, COUNTED_MEMBER_HEADER_LEN)
            }
            _ => Err(self.unsupported(class_name, code_reason(code))),
        }
    }

    /// An STL member of a split object, typed by its layout entry.
    fn resolve_stl_member(&self, element: &ElementInfo) -> Result<DecodePlan, UnsupportedType> {
        let class_name = element.class_name.as_str();
        let info = self.layout(class_name)?;
        let member = usize::try_from(element.id)
            .ok()
            .and_then(|id| info.elements.get(id))
            .ok_or_else(|| {
                self.unsupported(
                    class_name,
                    format!("member index {} outside the class layout", element.id),
                )
            })?;
        let type_name = member.type_name.trim();
        if is_string_class(type_name) {
            return Ok(DecodePlan::strings(OBJECT_HEADER_LEN));
        }
        match vector_item(type_name) {
            Some(item) => Ok(DecodePlan::new(
                TypeDescriptor::VarArray(self.vector_primitive(class_name, item)?),
                Encoding::Prefixed {
                    header_bytes: OBJECT_HEADER_LEN,
                },
            )),
            None => Err(self.unsupported(
                class_name,
                format!("member {} has container type {}", member.name, type_name),
            )),
        }
    }

    fn layout(&self, class_name: &str) -> Result<&'a StreamerInfo, UnsupportedType> {
        self.streamers.streamer(class_name).ok_or_else(|| {
            let reason = match self.streamers.unavailable_reason() {
                Some(why) => format!("no class layout stored ({})", why),
                None => "no class layout stored".to_string(),
            };
            self.unsupported(class_name, reason)
        })
    }

    fn vector_primitive(&self, class_name: &str, item: &str) -> Result<Primitive, UnsupportedType> {
        Primitive::from_cpp_name(item).ok_or_else(|| {
            let reason = if vector_item(item).is_some() {
                format!("nested container {}", item)
            } else if matches!(item, "Double32_t" | "Float16_t") {
                format!("{} elements are stored in a packed format", item)
            } else {
                format!("element type {} is not a primitive", item)
            };
            self.unsupported(class_name, reason)
        })
    }
}

fn single_leaf(leaves: &[LeafRecord]) -> Result<&LeafRecord, String> {
    match leaves {
        [leaf] => Ok(leaf),
        [] => Err("branch has no leaves".to_string()),
        many => Err(format!(
            "leaf list with {} leaves; only single-leaf branches are decoded",
            many.len()
        )),
    }
}

fn is_string_class(name: &str) -> bool {
    matches!(name, "string" | "std::string")
}

/// The element type of `vector<T>` or `std::vector<T>`.
fn vector_item(name: &str) -> Option<&str> {
    let name = name.trim();
    let inner = name
        .strip_prefix("std::vector<")
        .or_else(|| name.strip_prefix("vector<"))?
        .strip_suffix('>')?;
    Some(inner.trim())
}

fn code_reason(code: i32) -> String {
    match code {
        codes::CHAR_STAR => "char* members are not decoded".to_string(),
        codes::DOUBLE32 => "Double32_t values are stored in a packed format".to_string(),
        codes::FLOAT16 => "Float16_t values are stored in a packed format".to_string(),
        codes::LEGACY_CHAR => "legacy type code 10".to_string(),
        codes::OBJECT | codes::ANY | codes::TOBJECT | codes::TNAMED => {
            "nested object".to_string()
        }
        codes::OBJECT_P | codes::OBJECT_PP => "pointer to object".to_string(),
        other => format!("type code {}", other),
    }
}

fn kind_reason(kind: &ElementKind) -> &'static str {
    match kind {
        ElementKind::Base { .. } => "a base class",
        ElementKind::BasicPointer { .. } | ElementKind::Loop { .. } => "a counted pointer",
        ElementKind::Object | ElementKind::ObjectAny => "a nested object",
        ElementKind::ObjectPointer | ElementKind::ObjectAnyPointer => "a pointer to an object",
        ElementKind::Stl { .. } => "an unsupported container",
        ElementKind::Artificial => "an artificial member",
        ElementKind::BasicType | ElementKind::String | ElementKind::StlString => "unsupported",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::objects::streamers::StreamerElement;

    #[derive(Default)]
    struct Layouts(HashMap<String, StreamerInfo>);

    impl StreamerLookup for Layouts {
        fn streamer(&self, class_name: &str) -> Option<&StreamerInfo> {
            self.0.get(class_name)
        }
    }

    impl Layouts {
        fn with(mut self, class_name: &str, elements: Vec<StreamerElement>) -> Self {
            self.0.insert(
                class_name.to_string(),
                StreamerInfo {
                    class_name: class_name.to_string(),
                    checksum: 0,
                    class_version: 1,
                    elements,
                },
            );
            self
        }
    }

    fn member(name: &str, type_code: i32, type_name: &str, kind: ElementKind) -> StreamerElement {
        StreamerElement {
            name: name.to_string(),
            title: String::new(),
            type_code,
            size: 0,
            array_length: 0,
            array_dim: 0,
            type_name: type_name.to_string(),
            kind,
        }
    }

    fn leaf(class_name: &str) -> LeafRecord {
        LeafRecord {
            class_name: class_name.to_string(),
            name: "x".to_string(),
            title: "x".to_string(),
            len: 1,
            len_type: 0,
            offset: 0,
            is_range: false,
            is_unsigned: false,
            count_leaf: None,
            element: None,
        }
    }

    fn element(class_name: &str, id: i32) -> ElementInfo {
        ElementInfo {
            class_name: class_name.to_string(),
            parent_name: String::new(),
            clones_name: String::new(),
            checksum: 0,
            class_version: 1,
            id,
            kind: 0,
            streamer_type: -1,
            maximum: 0,
            count_branch: None,
        }
    }

    fn resolve_leaves(leaves: &[LeafRecord]) -> Result<DecodePlan, UnsupportedType> {
        let layouts = Layouts::default();
        TypeResolver::new("x", &layouts).resolve("TBranch", &RawTypeInfo::Leaves(leaves))
    }

    fn resolve_object(
        layouts: &Layouts,
        class_name: &str,
        leaf: LeafRecord,
        id: i32,
    ) -> Result<DecodePlan, UnsupportedType> {
        let element = element(class_name, id);
        let leaves = [leaf];
        TypeResolver::new("obj", layouts).resolve(
            class_name,
            &RawTypeInfo::Element {
                element: &element,
                leaves: &leaves,
                has_subbranches: false,
            },
        )
    }

    // ── Built-in leaves ────────────────────────────────────────────────────

    #[test]
    fn leaf_classes_map_to_primitives() {
        let cases = [
            ("TLeafO", false, TypeDescriptor::Bool),
            ("TLeafB", false, TypeDescriptor::Int8),
            ("TLeafB", true, TypeDescriptor::UInt8),
            ("TLeafS", true, TypeDescriptor::UInt16),
            ("TLeafI", false, TypeDescriptor::Int32),
            ("TLeafL", false, TypeDescriptor::Int64),
            ("TLeafG", true, TypeDescriptor::UInt64),
            ("TLeafF", false, TypeDescriptor::Float32),
            ("TLeafD", false, TypeDescriptor::Float64),
        ];
        for (class, unsigned, expected) in cases {
            let mut record = leaf(class);
            record.is_unsigned = unsigned;
            let plan = resolve_leaves(&[record]).unwrap();
            assert_eq!(plan.descriptor, expected, "{class}");
            assert_eq!(plan.encoding, Encoding::Packed { header_bytes: 0 });
        }
    }

    #[test]
    fn leaf_dimensions() {
        let mut fixed = leaf("TLeafF");
        fixed.len = 3;
        assert_eq!(
            resolve_leaves(&[fixed]).unwrap().descriptor,
            TypeDescriptor::FixedArray(Primitive::Float32, 3)
        );

        let mut counted = leaf("TLeafD");
        counted.count_leaf = Some("n".into());
        assert_eq!(
            resolve_leaves(&[counted]).unwrap(),
            DecodePlan::new(
                TypeDescriptor::VarArray(Primitive::Float64),
                Encoding::Counted {
                    count_leaf: "n".into(),
                    header_bytes: 0
                }
            )
        );

        let mut nested = leaf("TLeafD");
        nested.count_leaf = Some("n".into());
        nested.len = 4;
        assert!(resolve_leaves(&[nested]).is_err());
    }

    #[test]
    fn char_leaves_are_strings() {
        assert_eq!(
            resolve_leaves(&[leaf("TLeafC")]).unwrap(),
            DecodePlan::new(TypeDescriptor::String, Encoding::Strings { header_bytes: 0 })
        );
    }

    #[test]
    fn leaf_lists_are_unsupported() {
        let err = resolve_leaves(&[leaf("TLeafI"), leaf("TLeafF")]).unwrap_err();
        assert_eq!(err.column, "x");
        assert!(err.reason.contains("2 leaves"), "{}", err.reason);
        assert!(resolve_leaves(&[]).is_err());
    }

    // ── Objects ────────────────────────────────────────────────────────────

    #[test]
    fn top_level_strings_and_vectors() {
        let layouts = Layouts::default();
        assert_eq!(
            resolve_object(&layouts, "string", leaf("TLeafElement"), -1).unwrap(),
            DecodePlan::new(TypeDescriptor::String, Encoding::Strings { header_bytes: 6 })
        );
        assert_eq!(
            resolve_object(&layouts, "vector<float>", leaf("TLeafElement"), -1).unwrap(),
            DecodePlan::new(
                TypeDescriptor::VarArray(Primitive::Float32),
                Encoding::Prefixed { header_bytes: 6 }
            )
        );
        let nested = resolve_object(&layouts, "vector<vector<int> >", leaf("TLeafElement"), -1)
            .unwrap_err();
        assert!(nested.reason.contains("nested container"), "{}", nested.reason);
        assert!(resolve_object(&layouts, "vector<Double32_t>", leaf("TLeafElement"), -1).is_err());
    }

    #[test]
    fn single_member_classes() {
        let layouts = Layouts::default()
            .with(
                "Energy",
                vec![member("value", codes::DOUBLE, "double", ElementKind::BasicType)],
            )
            .with(
                "Label",
                vec![member("text", codes::TSTRING, "TString", ElementKind::String)],
            )
            .with(
                "Samples",
                vec![member(
                    "values",
                    codes::STL,
                    "vector<short>",
                    ElementKind::Stl {
                        stl_type: stl::VECTOR,
                        ctype: codes::SHORT,
                    },
                )],
            );
        let element_leaf = || leaf("TLeafElement");
        assert_eq!(
            resolve_object(&layouts, "Energy", element_leaf(), -1).unwrap(),
            DecodePlan::new(TypeDescriptor::Float64, Encoding::Packed { header_bytes: 6 })
        );
        assert_eq!(
            resolve_object(&layouts, "Label", element_leaf(), -1).unwrap(),
            DecodePlan::new(TypeDescriptor::String, Encoding::Strings { header_bytes: 6 })
        );
        assert_eq!(
            resolve_object(&layouts, "Samples", element_leaf(), -1).unwrap(),
            DecodePlan::new(
                TypeDescriptor::VarArray(Primitive::Int16),
                Encoding::Prefixed { header_bytes: 12 }
            )
        );
    }

    #[test]
    fn composite_classes_are_rejected() {
        let layouts = Layouts::default()
            .with(
                "Derived",
                vec![
                    member("TObject", 66, "BASE", ElementKind::Base { base_version: 1 }),
                    member("x", codes::INT, "int", ElementKind::BasicType),
                ],
            )
            .with(
                "Pair",
                vec![
                    member("a", codes::INT, "int", ElementKind::BasicType),
                    member("b", codes::INT, "int", ElementKind::BasicType),
                ],
            )
            .with(
                "Holder",
                vec![member("inner", codes::OBJECT, "Pair", ElementKind::Object)],
            )
            .with(
                "Packed",
                vec![member("v", codes::DOUBLE32, "Double32_t", ElementKind::BasicType)],
            );
        for (class, reason) in [
            ("Derived", "inherits"),
            ("Pair", "2 members"),
            ("Holder", "nested object"),
            ("Packed", "packed format"),
            ("Unknown", "no class layout"),
        ] {
            let err = resolve_object(&layouts, class, leaf("TLeafElement"), -1).unwrap_err();
            assert_eq!(err.class_name, class);
            assert!(err.reason.contains(reason), "{}: {}", class, err.reason);
        }
    }

    #[test]
    fn split_members_resolve_through_their_leaf() {
        let layouts = Layouts::default().with(
            "Event",
            vec![
                member("n", codes::INT, "int", ElementKind::BasicType),
                member(
                    "hits",
                    codes::STL,
                    "vector<double>",
                    ElementKind::Stl {
                        stl_type: stl::VECTOR,
                        ctype: codes::DOUBLE,
                    },
                ),
            ],
        );

        let mut scalar = leaf("TLeafElement");
        scalar.element = Some((0, codes::UINT));
        assert_eq!(
            resolve_object(&layouts, "Event", scalar, 0).unwrap(),
            DecodePlan::new(TypeDescriptor::UInt32, Encoding::Packed { header_bytes: 0 })
        );

        let mut vector = leaf("TLeafElement");
        vector.element = Some((1, codes::STL));
        assert_eq!(
            resolve_object(&layouts, "Event", vector, 1).unwrap(),
            DecodePlan::new(
                TypeDescriptor::VarArray(Primitive::Float64),
                Encoding::Prefixed { header_bytes: 6 }
            )
        );

        let mut counted = leaf("TLeafElement");
        counted.element = Some((2, codes::OFFSET_P + codes::FLOAT));
        counted.count_leaf = Some("n".into());
        assert_eq!(
            resolve_object(&layouts, "Event", counted, 2).unwrap(),
            DecodePlan::new(
                TypeDescriptor::VarArray(Primitive::Float32),
                Encoding::Counted {
                    count_leaf: "n".into(),
                    header_bytes: 1
                }
            )
        );

        let mut fixed = leaf("TLeafElement");
        fixed.element = Some((3, codes::OFFSET_L + codes::SHORT));
        fixed.len = 4;
        assert_eq!(
            resolve_object(&layouts, "Event", fixed, 3).unwrap().descriptor,
            TypeDescriptor::FixedArray(Primitive::Int16, 4)
        );

        let mut packed = leaf("TLeafElement");
        packed.element = Some((4, codes::DOUBLE32));
        assert!(resolve_object(&layouts, "Event", packed, 4).is_err());
    }

    #[test]
    fn split_parents_are_unsupported() {
        let layouts = Layouts::default();
        let element = element("Event", -1);
        let err = TypeResolver::new("event", &layouts)
            .resolve(
                "Event",
                &RawTypeInfo::Element {
                    element: &element,
                    leaves: &[],
                    has_subbranches: true,
                },
            )
            .unwrap_err();
        assert!(err.reason.contains("split"), "{}", err.reason);
    }

    // ── Descriptors ────────────────────────────────────────────────────────

    #[test]
    fn type_names_and_sizes() {
        assert_eq!(TypeDescriptor::Float64.item_type_name(), "double");
        assert_eq!(TypeDescriptor::String.item_type_name(), "std::string");
        assert_eq!(
            TypeDescriptor::VarArray(Primitive::Float32).item_type_name(),
            "std::vector<float>"
        );
        assert_eq!(
            TypeDescriptor::FixedArray(Primitive::Int32, 3).item_type_name(),
            "int32_t[3]"
        );
        assert_eq!(
            TypeDescriptor::FixedArray(Primitive::Int32, 3).entry_size(),
            Some(12)
        );
        assert_eq!(TypeDescriptor::VarArray(Primitive::Int32).entry_size(), None);
        assert_eq!(TypeDescriptor::UInt16.entry_size(), Some(2));
    }

    #[test]
    fn arrow_types() {
        assert_eq!(TypeDescriptor::Bool.arrow_type(), DataType::Boolean);
        assert_eq!(TypeDescriptor::String.arrow_type(), DataType::Binary);
        assert_eq!(
            TypeDescriptor::VarArray(Primitive::Int64).arrow_type(),
            DataType::List(list_item_field(Primitive::Int64))
        );
        assert_eq!(
            TypeDescriptor::FixedArray(Primitive::Float32, 2).arrow_type(),
            DataType::FixedSizeList(list_item_field(Primitive::Float32), 2)
        );
    }

    #[test]
    fn cpp_names_parse() {
        assert_eq!(Primitive::from_cpp_name("Float_t"), Some(Primitive::Float32));
        assert_eq!(Primitive::from_cpp_name("unsigned int"), Some(Primitive::UInt32));
        assert_eq!(Primitive::from_cpp_name("Long64_t"), Some(Primitive::Int64));
        assert_eq!(Primitive::from_cpp_name("Double32_t"), None);
        assert_eq!(vector_item("std::vector<float>"), Some("float"));
        assert_eq!(vector_item("vector<vector<int> >"), Some("vector<int>"));
        assert_eq!(vector_item("list<int>"), None);
    }
}
