//! Class layouts stored in the file's streamer record.

use std::collections::HashMap;

use crate::error::FormatError;

use super::{Object, ObjectReader};

/// Type codes used by streamer elements and leaf elements.
pub mod codes {
    pub const CHAR: i32 = 1;
    pub const SHORT: i32 = 2;
    pub const INT: i32 = 3;
    pub const LONG: i32 = 4;
    pub const FLOAT: i32 = 5;
    pub const COUNTER: i32 = 6;
    pub const CHAR_STAR: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const DOUBLE32: i32 = 9;
    pub const LEGACY_CHAR: i32 = 10;
    pub const UCHAR: i32 = 11;
    pub const USHORT: i32 = 12;
    pub const UINT: i32 = 13;
    pub const ULONG: i32 = 14;
    pub const BITS: i32 = 15;
    pub const LONG64: i32 = 16;
    pub const ULONG64: i32 = 17;
    pub const BOOL: i32 = 18;
    pub const FLOAT16: i32 = 19;
    /// Added to a basic code for fixed-size arrays.
    pub const OFFSET_L: i32 = 20;
    /// Added to a basic code for arrays sized by a counter member.
    pub const OFFSET_P: i32 = 40;
    pub const OBJECT: i32 = 61;
    pub const ANY: i32 = 62;
    pub const OBJECT_P: i32 = 63;
    pub const OBJECT_PP: i32 = 64;
    pub const TSTRING: i32 = 65;
    pub const TOBJECT: i32 = 66;
    pub const TNAMED: i32 = 67;
    pub const STL: i32 = 300;
    pub const STL_STRING: i32 = 365;
    pub const BASE: i32 = 0;
}

/// Container kinds of `TStreamerSTL`.
pub mod stl {
    pub const VECTOR: i32 = 1;
    pub const STRING: i32 = 365;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Base { base_version: i32 },
    BasicType,
    BasicPointer { count_name: String, count_class: String },
    Loop { count_name: String, count_class: String },
    Object,
    ObjectPointer,
    ObjectAny,
    ObjectAnyPointer,
    String,
    Stl { stl_type: i32, ctype: i32 },
    StlString,
    Artificial,
}

const ELEMENT_CLASSES: [&str; 12] = [
    "TStreamerBase",
    "TStreamerBasicType",
    "TStreamerBasicPointer",
    "TStreamerLoop",
    "TStreamerObject",
    "TStreamerObjectPointer",
    "TStreamerObjectAny",
    "TStreamerObjectAnyPointer",
    "TStreamerString",
    "TStreamerSTL",
    "TStreamerSTLstring",
    "TStreamerArtificial",
];

/// One member (or base class) of a class layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerElement {
    pub name: String,
    pub title: String,
    pub type_code: i32,
    pub size: i32,
    pub array_length: i32,
    pub array_dim: i32,
    pub type_name: String,
    pub kind: ElementKind,
}

impl StreamerElement {
    pub fn is_element_class(class: &str) -> bool {
        ELEMENT_CLASSES.contains(&class)
    }

    pub fn read(reader: &mut ObjectReader<'_>, class: &str) -> Result<Self, FormatError> {
        let derived = reader.record()?;
        // TStreamerSTLstring wraps a whole TStreamerSTL record
        let stl = if class == "TStreamerSTLstring" {
            Some(reader.record()?)
        } else {
            None
        };
        let mut element = Self::read_base(reader)?;

        element.kind = match class {
            "TStreamerBase" => ElementKind::Base {
                base_version: if derived.version >= 2 { reader.cursor().i32()? } else { 0 },
            },
            "TStreamerBasicType" => ElementKind::BasicType,
            "TStreamerBasicPointer" | "TStreamerLoop" => {
                let _count_version = reader.cursor().i32()?;
                let count_name = reader.string()?;
                let count_class = reader.string()?;
                if class == "TStreamerLoop" {
                    ElementKind::Loop {
                        count_name,
                        count_class,
                    }
                } else {
                    ElementKind::BasicPointer {
                        count_name,
                        count_class,
                    }
                }
            }
            "TStreamerObject" => ElementKind::Object,
            "TStreamerObjectPointer" => ElementKind::ObjectPointer,
            "TStreamerObjectAny" => ElementKind::ObjectAny,
            "TStreamerObjectAnyPointer" => ElementKind::ObjectAnyPointer,
            "TStreamerString" => ElementKind::String,
            "TStreamerSTL" | "TStreamerSTLstring" => {
                let stl_type = reader.cursor().i32()?;
                let ctype = reader.cursor().i32()?;
                if class == "TStreamerSTLstring" {
                    ElementKind::StlString
                } else {
                    ElementKind::Stl { stl_type, ctype }
                }
            }
            _ => ElementKind::Artificial,
        };

        if let Some(stl) = stl {
            reader.finish(&stl, "TStreamerSTL")?;
        }
        reader.finish(&derived, "TStreamerElement")?;
        Ok(element)
    }

    fn read_base(reader: &mut ObjectReader<'_>) -> Result<Self, FormatError> {
        let header = reader.record()?;
        let (name, title) = reader.tnamed()?;
        let cursor = reader.cursor();
        let type_code = cursor.i32()?;
        let size = cursor.i32()?;
        let array_length = cursor.i32()?;
        let array_dim = cursor.i32()?;
        if header.version == 1 {
            let n = cursor.count("max index count")?;
            cursor.skip(n * 4)?;
        } else {
            cursor.skip(5 * 4)?;
        }
        let type_name = reader.string()?;
        reader.finish(&header, "TStreamerElement")?;
        Ok(Self {
            name,
            title,
            type_code,
            size,
            array_length,
            array_dim,
            type_name,
            kind: ElementKind::Artificial,
        })
    }

    pub fn is_base(&self) -> bool {
        matches!(self.kind, ElementKind::Base { .. })
    }
}

/// The layout of one class version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerInfo {
    pub class_name: String,
    pub checksum: u32,
    pub class_version: i32,
    pub elements: Vec<StreamerElement>,
}

impl StreamerInfo {
    pub fn read(reader: &mut ObjectReader<'_>) -> Result<Self, FormatError> {
        let header = reader.record()?;
        let (class_name, _title) = reader.tnamed()?;
        let cursor = reader.cursor();
        let checksum = cursor.u32()?;
        let class_version = cursor.i32()?;
        let elements = match reader.read_object_any()? {
            Some(Object::ObjArray(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Object::StreamerElement(element) => Some(element),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
            Some(other) => {
                return Err(FormatError::malformed(
                    "TStreamerInfo",
                    format!("{} elements are not an array: {:?}", class_name, other),
                ))
            }
        };
        reader.finish(&header, "TStreamerInfo")?;
        Ok(Self {
            class_name,
            checksum,
            class_version,
            elements,
        })
    }
}

/// Source of class layouts for type resolution.
pub trait StreamerLookup {
    fn streamer(&self, class_name: &str) -> Option<&StreamerInfo>;

    /// Why layouts may be missing, if the record could not be read.
    fn unavailable_reason(&self) -> Option<&str> {
        None
    }
}

/// Every class layout found in a file, by class name.
#[derive(Debug, Default)]
pub struct StreamerRegistry {
    infos: HashMap<String, StreamerInfo>,
    load_error: Option<String>,
}

impl StreamerRegistry {
    pub(crate) fn unavailable(reason: String) -> Self {
        Self {
            infos: HashMap::new(),
            load_error: Some(reason),
        }
    }

    /// Reads the TList of TStreamerInfo records stored at the file's streamer key.
    pub fn read(reader: &mut ObjectReader<'_>) -> Result<Self, FormatError> {
        let mut registry = Self::default();
        for object in reader.list()? {
            if let Object::StreamerInfo(info) = object {
                registry.insert(info);
            }
        }
        Ok(registry)
    }

    pub fn insert(&mut self, info: StreamerInfo) {
        // a class may be described once per version; keep the newest
        match self.infos.get(&info.class_name) {
            Some(existing) if existing.class_version >= info.class_version => {}
            _ => {
                self.infos.insert(info.class_name.clone(), info);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl StreamerLookup for StreamerRegistry {
    fn streamer(&self, class_name: &str) -> Option<&StreamerInfo> {
        self.infos.get(class_name)
    }

    fn unavailable_reason(&self) -> Option<&str> {
        self.load_error.as_deref()
    }
}
