//! Readers for the handful of stored classes needed to describe trees.
//!
//! Objects are read the way they are streamed: a record header (byte count and version)
//! followed by the base classes and members. Pointers to objects carry a class tag that is
//! either a new class name or a reference to a class seen earlier in the same buffer.
//! Classes without a reader here are skipped using their byte count.

use std::collections::HashMap;

use crate::{
    cursor::{Cursor, RecordHeader, BYTE_COUNT_MASK},
    error::{CursorError, FormatError},
};

pub mod streamers;
pub mod tree;

use streamers::{StreamerElement, StreamerInfo};
use tree::{BranchRecord, LeafRecord, TreeRecord};

pub const CLASS_MASK: u32 = 0x8000_0000;
pub const NEW_CLASS_TAG: u32 = 0xffff_ffff;
/// Offset added to buffer displacements when registering tags.
pub const MAP_OFFSET: u32 = 2;
/// Set in a TObject version when it is preceded by a byte count.
const TOBJECT_BYTE_COUNT_BIT: i16 = 0x4000;
/// TObject bit telling that the object carries a process id.
const TOBJECT_IS_REFERENCED: u32 = 1 << 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Named { name: String, title: String },
    ObjArray(Vec<Object>),
    List(Vec<Object>),
    Tree(Box<TreeRecord>),
    Branch(Box<BranchRecord>),
    Leaf(LeafRecord),
    StreamerInfo(StreamerInfo),
    StreamerElement(StreamerElement),
    /// A pointer to an object read earlier from the same buffer.
    Reference { class: String, name: Option<String> },
    /// An object of a class without a reader, skipped.
    Unknown(String),
}

impl Object {
    pub fn name(&self) -> Option<&str> {
        match self {
            Object::Named { name, .. } => Some(name),
            Object::Tree(tree) => Some(&tree.name),
            Object::Branch(branch) => Some(&branch.name),
            Object::Leaf(leaf) => Some(&leaf.name),
            Object::StreamerInfo(info) => Some(&info.class_name),
            Object::StreamerElement(element) => Some(&element.name),
            Object::Reference { name, .. } => name.as_deref(),
            Object::ObjArray(_) | Object::List(_) | Object::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Tagged {
    Class(String),
    Object { class: String, name: Option<String> },
}

/// Reads objects from one buffer, tracking the class and object tags it has seen.
pub struct ObjectReader<'a> {
    cursor: Cursor<'a>,
    tags: HashMap<u32, Tagged>,
}

impl<'a> ObjectReader<'a> {
    pub fn new(cursor: Cursor<'a>) -> Self {
        Self {
            cursor,
            tags: HashMap::new(),
        }
    }

    pub fn cursor(&mut self) -> &mut Cursor<'a> {
        &mut self.cursor
    }

    pub(crate) fn record(&mut self) -> Result<RecordHeader, FormatError> {
        Ok(self.cursor.record()?)
    }

    /// Moves past the end of `header`, failing if the members read overran it.
    pub(crate) fn finish(
        &mut self,
        header: &RecordHeader,
        class: &'static str,
    ) -> Result<(), FormatError> {
        if let Some(end) = header.end {
            if self.cursor.position() > end {
                return Err(FormatError::malformed(
                    class,
                    format!(
                        "members end at {} past the record end {}",
                        self.cursor.position(),
                        end
                    ),
                ));
            }
        }
        Ok(header.finish(&mut self.cursor)?)
    }

    pub(crate) fn check_version(
        &self,
        header: &RecordHeader,
        class: &'static str,
        supported: std::ops::RangeInclusive<i16>,
    ) -> Result<(), FormatError> {
        if supported.contains(&header.version) {
            Ok(())
        } else {
            Err(FormatError::UnsupportedClassVersion {
                class,
                version: header.version,
            })
        }
    }

    pub(crate) fn string(&mut self) -> Result<String, FormatError> {
        Ok(self.cursor.string()?)
    }

    pub(crate) fn skip_record(&mut self, what: &'static str) -> Result<(), FormatError> {
        self.cursor.skip_record(what)?;
        Ok(())
    }

    /// Reads the TObject base: version, unique id and status bits.
    pub(crate) fn tobject(&mut self) -> Result<(), FormatError> {
        let version = self.cursor.i16()?;
        if version & TOBJECT_BYTE_COUNT_BIT != 0 {
            self.cursor.skip(4)?;
        }
        let _unique_id = self.cursor.u32()?;
        let bits = self.cursor.u32()?;
        if bits & TOBJECT_IS_REFERENCED != 0 {
            self.cursor.skip(2)?;
        }
        Ok(())
    }

    pub(crate) fn tnamed(&mut self) -> Result<(String, String), FormatError> {
        let header = self.record()?;
        self.tobject()?;
        let name = self.string()?;
        let title = self.string()?;
        self.finish(&header, "TNamed")?;
        Ok((name, title))
    }

    /// Reads an embedded TObjArray, streamed without a class tag.
    pub(crate) fn objarray(&mut self) -> Result<Vec<Object>, FormatError> {
        let header = self.record()?;
        if header.version > 2 {
            self.tobject()?;
        }
        if header.version > 1 {
            let _name = self.string()?;
        }
        let len = self.cursor.count("TObjArray size")?;
        let _lower_bound = self.cursor.i32()?;
        let mut items = Vec::with_capacity(len.min(self.cursor.remaining()));
        for _ in 0..len {
            if let Some(item) = self.read_object_any()? {
                items.push(item);
            }
        }
        self.finish(&header, "TObjArray")?;
        Ok(items)
    }

    pub(crate) fn list(&mut self) -> Result<Vec<Object>, FormatError> {
        let header = self.record()?;
        self.check_version(&header, "TList", 4..=5)?;
        self.tobject()?;
        let _name = self.string()?;
        let len = self.cursor.count("TList size")?;
        let mut items = Vec::with_capacity(len.min(self.cursor.remaining()));
        for _ in 0..len {
            let item = self.read_object_any()?;
            let _option = self.cursor.string_bytes()?;
            if let Some(item) = item {
                items.push(item);
            }
        }
        self.finish(&header, "TList")?;
        Ok(items)
    }

    /// Reads a pointer: null, a reference to an earlier object, or a tagged object.
    pub fn read_object_any(&mut self) -> Result<Option<Object>, FormatError> {
        let begin = self.cursor.position();
        let begin_displacement = self.displacement()?;
        let word = self.cursor.u32()?;

        let (tag, tag_displacement, end) =
            if word & BYTE_COUNT_MASK == 0 || word == NEW_CLASS_TAG {
                (word, None, None)
            } else {
                let tag_displacement = self.displacement()?;
                let count = (word & !BYTE_COUNT_MASK) as usize;
                let end = begin + 4 + count;
                if end > self.cursor.position() + self.cursor.remaining() {
                    return Err(CursorError::OutOfBounds {
                        position: begin,
                        wanted: 4 + count,
                        available: self.cursor.remaining() + 4,
                    }
                    .into());
                }
                (self.cursor.u32()?, Some(tag_displacement), Some(end))
            };

        if tag & CLASS_MASK == 0 {
            if tag == 0 {
                return Ok(None);
            }
            return match self.tags.get(&tag) {
                Some(Tagged::Object { class, name }) => Ok(Some(Object::Reference {
                    class: class.clone(),
                    name: name.clone(),
                })),
                Some(Tagged::Class(class)) => Err(FormatError::malformed(
                    "object tag",
                    format!("tag {} names class {} where an object was expected", tag, class),
                )),
                None => {
                    // a reference into a part of the buffer that was never read
                    if let Some(end) = end {
                        self.cursor.seek(end)?;
                    }
                    Ok(None)
                }
            };
        }

        let class = if tag == NEW_CLASS_TAG {
            let class = self.cursor.cstring()?;
            let key = match tag_displacement {
                Some(displacement) => displacement + MAP_OFFSET,
                None => self.next_sequential_tag(),
            };
            self.tags.insert(key, Tagged::Class(class.clone()));
            class
        } else {
            let reference = tag & !CLASS_MASK;
            match self.tags.get(&reference) {
                Some(Tagged::Class(class)) => class.clone(),
                _ => {
                    return Err(FormatError::malformed(
                        "object tag",
                        format!("class reference {} does not name a class", reference),
                    ))
                }
            }
        };

        let object = self.read_class(&class, end)?;
        if let Some(end) = end {
            if self.cursor.position() > end {
                return Err(FormatError::malformed(
                    "object",
                    format!("{} overruns its byte count", class),
                ));
            }
            self.cursor.seek(end)?;
        }
        let key = match end {
            Some(_) => begin_displacement + MAP_OFFSET,
            None => self.next_sequential_tag(),
        };
        self.tags.insert(
            key,
            Tagged::Object {
                class: class.clone(),
                name: object.name().map(str::to_string),
            },
        );
        Ok(Some(object))
    }

    /// Reads an object of a known class whose record starts at the cursor.
    pub fn read_class(&mut self, class: &str, end: Option<usize>) -> Result<Object, FormatError> {
        let object = match class {
            "TNamed" => {
                let (name, title) = self.tnamed()?;
                Object::Named { name, title }
            }
            "TObjArray" => Object::ObjArray(self.objarray()?),
            "TList" | "THashList" => Object::List(self.list()?),
            "TTree" => Object::Tree(Box::new(TreeRecord::read(self)?)),
            "TBranch" | "TBranchElement" => {
                Object::Branch(Box::new(BranchRecord::read(self, class)?))
            }
            _ if LeafRecord::is_leaf_class(class) => Object::Leaf(LeafRecord::read(self, class)?),
            "TStreamerInfo" => Object::StreamerInfo(StreamerInfo::read(self)?),
            _ if StreamerElement::is_element_class(class) => {
                Object::StreamerElement(StreamerElement::read(self, class)?)
            }
            _ => match end {
                Some(end) => {
                    self.cursor.seek(end)?;
                    Object::Unknown(class.to_string())
                }
                None => {
                    return Err(FormatError::malformed(
                        "object",
                        format!("cannot skip {} without a byte count", class),
                    ))
                }
            },
        };
        Ok(object)
    }

    fn displacement(&self) -> Result<u32, FormatError> {
        let displacement = self.cursor.displacement();
        u32::try_from(displacement).map_err(|_| {
            FormatError::malformed("object", format!("buffer offset {} too large", displacement))
        })
    }

    fn next_sequential_tag(&self) -> u32 {
        self.tags.len() as u32 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ObjectWriter;

    #[test]
    fn reads_named_objects_and_references() {
        let mut writer = ObjectWriter::new(64);
        writer.object_any("TNamed", |w| w.tnamed("first", "one"));
        writer.object_any("TNamed", |w| w.tnamed("second", "two"));
        writer.reference("first");
        writer.null();
        let bytes = writer.into_bytes();

        let mut reader = ObjectReader::new(Cursor::with_origin(&bytes, 64));
        assert_eq!(
            reader.read_object_any().unwrap(),
            Some(Object::Named {
                name: "first".into(),
                title: "one".into()
            })
        );
        // second object reuses the class tag
        assert_eq!(
            reader.read_object_any().unwrap().unwrap().name(),
            Some("second")
        );
        assert_eq!(
            reader.read_object_any().unwrap(),
            Some(Object::Reference {
                class: "TNamed".into(),
                name: Some("first".into())
            })
        );
        assert_eq!(reader.read_object_any().unwrap(), None);
        assert!(reader.cursor().is_exhausted());
    }

    #[test]
    fn unknown_classes_are_skipped() {
        let mut writer = ObjectWriter::new(0);
        writer.object_any("TH1D", |w| w.raw(&[1, 2, 3, 4, 5]));
        writer.object_any("TNamed", |w| w.tnamed("after", ""));
        let bytes = writer.into_bytes();

        let mut reader = ObjectReader::new(Cursor::new(&bytes));
        assert_eq!(
            reader.read_object_any().unwrap(),
            Some(Object::Unknown("TH1D".into()))
        );
        assert_eq!(
            reader.read_object_any().unwrap().unwrap().name(),
            Some("after")
        );
    }

    #[test]
    fn bad_class_reference_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(BYTE_COUNT_MASK | 4).to_be_bytes());
        bytes.extend_from_slice(&(CLASS_MASK | 99).to_be_bytes());
        let mut reader = ObjectReader::new(Cursor::new(&bytes));
        assert!(matches!(
            reader.read_object_any(),
            Err(FormatError::Malformed { .. })
        ));
    }

    #[test]
    fn lists_and_arrays() {
        let mut writer = ObjectWriter::new(10);
        writer.list(|w| {
            w.list_item(|w| w.object_any("TNamed", |w| w.tnamed("a", "")));
            w.list_item(|w| {
                w.object_any("TObjArray", |w| {
                    w.objarray(|w| {
                        w.object_any("TNamed", |w| w.tnamed("b", ""));
                        w.null();
                    })
                })
            });
        });
        let bytes = writer.into_bytes();

        let mut reader = ObjectReader::new(Cursor::with_origin(&bytes, 10));
        let items = reader.list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name(), Some("a"));
        match &items[1] {
            Object::ObjArray(inner) => {
                assert_eq!(inner.len(), 1);
                assert_eq!(inner[0].name(), Some("b"));
            }
            other => panic!("expected an array, got {:?}", other),
        }
        assert!(reader.cursor().is_exhausted());
    }
}
