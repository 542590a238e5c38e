//! An in-memory writer for the subset of the ROOT format this crate reads.
//!
//! Used by the test suites of this crate and, through the `fixtures` feature, of downstream
//! crates. It writes small, valid files: trees with baskets in any supported codec,
//! subdirectories, key cycles and streamer records. Corruptions are applied by the tests
//! themselves on the returned bytes.

use std::{collections::HashMap, io::Write};

use flate2::{write::ZlibEncoder, Compression};

use crate::{
    compression::{Codec, LZ4_CHECKSUM_LEN, MAX_FRAME_LEN},
    cursor::BYTE_COUNT_MASK,
    file::LARGE_FILE_VERSION,
    key::LARGE_KEY_VERSION,
    objects::{
        streamers::{codes, stl},
        CLASS_MASK, MAP_OFFSET, NEW_CLASS_TAG,
    },
    types::OBJECT_HEADER_LEN,
};

const FILE_VERSION: i32 = 62206;
const FILE_BEGIN: usize = 100;
const UUID_LEN: usize = 18;
const BASKET_BUFFER_SIZE: i32 = 32000;
/// ROOT's default file compression: zlib, level 1.
const DEFAULT_COMPRESSION: i32 = 101;

/// Big-endian writes onto a byte vector.
trait PutBigEndian {
    fn put_u8(&mut self, value: u8);
    fn put_i16(&mut self, value: i16);
    fn put_i32(&mut self, value: i32);
    fn put_u32(&mut self, value: u32);
    fn put_i64(&mut self, value: i64);
    fn put_string(&mut self, value: &str);
    fn put_seek(&mut self, large: bool, value: u64);
}

impl PutBigEndian for Vec<u8> {
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }

    fn put_i16(&mut self, value: i16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        if bytes.len() < 255 {
            self.push(bytes.len() as u8);
        } else {
            self.push(255);
            self.put_u32(bytes.len() as u32);
        }
        self.extend_from_slice(bytes);
    }

    fn put_seek(&mut self, large: bool, value: u64) {
        if large {
            self.put_i64(value as i64);
        } else {
            self.put_i32(value as i32);
        }
    }
}

// ── Compression ─────────────────────────────────────────────────────────────

/// Compresses `data` into frames of at most `max_frame_len` input bytes.
///
/// LZMA and legacy frames are only tagged as such; their bodies are zlib streams, which is
/// enough to exercise codec dispatch.
pub fn compress_frames(codec: Codec, level: i32, data: &[u8], max_frame_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(max_frame_len.clamp(1, MAX_FRAME_LEN)) {
        let (method, body) = match codec {
            Codec::Lz4 => {
                let mut body = vec![0u8; LZ4_CHECKSUM_LEN];
                body.extend(lz4_flex::block::compress(chunk));
                (1, body)
            }
            Codec::Zstd => (
                1,
                zstd::bulk::compress(chunk, level).expect("zstd compresses in memory"),
            ),
            Codec::Zlib | Codec::Lzma | Codec::Legacy => {
                let mut encoder =
                    ZlibEncoder::new(Vec::new(), Compression::new(level.clamp(0, 9) as u32));
                encoder.write_all(chunk).expect("zlib compresses in memory");
                (8, encoder.finish().expect("zlib compresses in memory"))
            }
        };
        out.extend_from_slice(&codec.tag());
        out.push(method);
        out.extend_from_slice(&u24_le(body.len()));
        out.extend_from_slice(&u24_le(chunk.len()));
        out.extend(body);
    }
    out
}

fn u24_le(value: usize) -> [u8; 3] {
    [value as u8, (value >> 8) as u8, (value >> 16) as u8]
}

// ── Keys ────────────────────────────────────────────────────────────────────

/// A TKey header.
#[derive(Debug, Clone)]
pub struct KeyWriter {
    class_name: String,
    name: String,
    title: String,
    cycle: i16,
    seek_key: u64,
    seek_pdir: u64,
    stored_len: usize,
    objlen: usize,
    large: bool,
    trailer: Vec<u8>,
}

impl KeyWriter {
    pub fn new(class_name: &str, name: &str, title: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            name: name.to_string(),
            title: title.to_string(),
            cycle: 1,
            seek_key: 0,
            seek_pdir: 0,
            stored_len: 0,
            objlen: 0,
            large: false,
            trailer: Vec::new(),
        }
    }

    pub fn cycle(mut self, cycle: i16) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn seek_key(mut self, seek_key: u64) -> Self {
        self.seek_key = seek_key;
        self
    }

    pub fn seek_pdir(mut self, seek_pdir: u64) -> Self {
        self.seek_pdir = seek_pdir;
        self
    }

    /// Stored payload size and uncompressed payload size.
    pub fn sizes(mut self, stored_len: usize, objlen: usize) -> Self {
        self.stored_len = stored_len;
        self.objlen = objlen;
        self
    }

    pub fn large(mut self, large: bool) -> Self {
        self.large = large;
        self
    }

    /// Bytes that belong to the key but follow its standard fields, like a basket header.
    pub fn trailer(mut self, trailer: Vec<u8>) -> Self {
        self.trailer = trailer;
        self
    }

    pub fn key_len(&self) -> usize {
        self.to_bytes().len()
    }

    pub fn nbytes(&self) -> usize {
        self.key_len() + self.stored_len
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut tail = Vec::new();
        tail.put_i16(self.cycle);
        tail.put_seek(self.large, self.seek_key);
        tail.put_seek(self.large, self.seek_pdir);
        tail.put_string(&self.class_name);
        tail.put_string(&self.name);
        tail.put_string(&self.title);
        tail.extend_from_slice(&self.trailer);

        let keylen = 16 + tail.len();
        let version = if self.large { LARGE_KEY_VERSION + 4 } else { 4 };
        let mut out = Vec::with_capacity(keylen);
        out.put_i32((keylen + self.stored_len) as i32);
        out.put_i16(version);
        out.put_i32(self.objlen as i32);
        out.put_u32(0x6d7b_4a21);
        out.put_i16(keylen as i16);
        out.extend(tail);
        out
    }
}

// ── Streamed objects ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Array,
    List,
}

#[derive(Debug)]
struct OpenContainer {
    kind: Container,
    depth: usize,
    count: i32,
    count_position: usize,
}

/// Streams objects the way ROOT buffers do: byte-counted records, class tags and
/// object references relative to `origin`.
#[derive(Debug)]
pub struct ObjectWriter {
    out: Vec<u8>,
    origin: usize,
    class_tags: HashMap<String, u32>,
    object_tags: HashMap<String, u32>,
    names: Vec<String>,
    depth: usize,
    containers: Vec<OpenContainer>,
}

impl ObjectWriter {
    /// `origin` is the position of the buffer inside its key, usually the key length.
    pub fn new(origin: usize) -> Self {
        Self {
            out: Vec::new(),
            origin,
            class_tags: HashMap::new(),
            object_tags: HashMap::new(),
            names: Vec::new(),
            depth: 0,
            containers: Vec::new(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, value: u8) {
        self.out.put_u8(value);
    }

    pub fn i16(&mut self, value: i16) {
        self.out.put_i16(value);
    }

    pub fn i32(&mut self, value: i32) {
        self.out.put_i32(value);
    }

    pub fn u32(&mut self, value: u32) {
        self.out.put_u32(value);
    }

    pub fn i64(&mut self, value: i64) {
        self.out.put_i64(value);
    }

    pub fn f32(&mut self, value: f32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn f64(&mut self, value: f64) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn string(&mut self, value: &str) {
        self.out.put_string(value);
    }

    fn tag_of(&self, position: usize) -> u32 {
        (position + self.origin) as u32 + MAP_OFFSET
    }

    fn patch_i32(&mut self, position: usize, value: u32) {
        self.out[position..position + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// A byte-counted record of the given version.
    pub fn record(&mut self, version: i16, body: impl FnOnce(&mut Self)) {
        let begin = self.out.len();
        self.out.put_u32(0);
        self.out.put_i16(version);
        body(self);
        let count = (self.out.len() - begin - 4) as u32;
        self.patch_i32(begin, BYTE_COUNT_MASK | count);
    }

    pub fn tobject(&mut self) {
        self.out.put_i16(1);
        self.out.put_u32(0);
        self.out.put_u32(0x0300_0000);
    }

    pub fn tnamed(&mut self, name: &str, title: &str) {
        self.names.push(name.to_string());
        self.record(1, |w| {
            w.tobject();
            w.string(name);
            w.string(title);
        });
    }

    fn count_item(&mut self, kind: Container) {
        if let Some(open) = self.containers.last_mut() {
            if open.kind == kind && open.depth == self.depth {
                open.count += 1;
            }
        }
    }

    /// A tagged object: byte count, class tag (new or referenced), then the body.
    pub fn object_any(&mut self, class: &str, body: impl FnOnce(&mut Self)) {
        self.count_item(Container::Array);
        let begin = self.out.len();
        self.out.put_u32(0);
        let tag_position = self.out.len();
        match self.class_tags.get(class) {
            Some(tag) => {
                let tag = *tag;
                self.out.put_u32(CLASS_MASK | tag);
            }
            None => {
                self.out.put_u32(NEW_CLASS_TAG);
                self.out.extend_from_slice(class.as_bytes());
                self.out.push(0);
                let tag = self.tag_of(tag_position);
                self.class_tags.insert(class.to_string(), tag);
            }
        }

        let named = self.names.len();
        self.depth += 1;
        body(self);
        self.depth -= 1;

        let count = (self.out.len() - begin - 4) as u32;
        self.patch_i32(begin, BYTE_COUNT_MASK | count);
        let is_container = matches!(class, "TObjArray" | "TList" | "THashList");
        if let Some(name) = self.names.get(named).filter(|_| !is_container).cloned() {
            let tag = self.tag_of(begin);
            self.object_tags.insert(name, tag);
        }
    }

    /// Whether an object named `name` was written and can be referenced.
    pub fn knows(&self, name: &str) -> bool {
        self.object_tags.contains_key(name)
    }

    /// A pointer to an object written earlier.
    pub fn reference(&mut self, name: &str) {
        self.count_item(Container::Array);
        let tag = self.object_tags.get(name).copied().unwrap_or_else(|| {
            panic!("no object named {} was written before the reference", name)
        });
        self.out.put_u32(tag);
    }

    pub fn null(&mut self) {
        self.count_item(Container::Array);
        self.out.put_u32(0);
    }

    fn open(&mut self, kind: Container) {
        let count_position = self.out.len();
        self.out.put_i32(0);
        self.containers.push(OpenContainer {
            kind,
            depth: self.depth,
            count: 0,
            count_position,
        });
    }

    fn close(&mut self) {
        if let Some(open) = self.containers.pop() {
            self.patch_i32(open.count_position, open.count as u32);
        }
    }

    /// An embedded TObjArray; items are the objects and nulls written directly by `body`.
    pub fn objarray(&mut self, body: impl FnOnce(&mut Self)) {
        self.record(3, |w| {
            w.tobject();
            w.string("");
            w.open(Container::Array);
            w.i32(0);
            body(w);
            w.close();
        });
    }

    /// An embedded TList; items are written with [`ObjectWriter::list_item`].
    pub fn list(&mut self, body: impl FnOnce(&mut Self)) {
        self.record(5, |w| {
            w.tobject();
            w.string("");
            w.open(Container::List);
            body(w);
            w.close();
        });
    }

    pub fn list_item(&mut self, body: impl FnOnce(&mut Self)) {
        self.count_item(Container::List);
        self.depth += 1;
        body(self);
        self.depth -= 1;
        self.string("");
    }

    /// The TList of class layouts stored at a file's streamer key.
    pub fn streamer_list(&mut self, defs: &[StreamerDef]) {
        self.list(|w| {
            for def in defs {
                w.list_item(|w| w.object_any("TStreamerInfo", |w| def.write(w)));
            }
        });
    }
}

// ── Streamer records ────────────────────────────────────────────────────────

/// The layout of one class version.
#[derive(Debug, Clone)]
pub struct StreamerDef {
    class_name: String,
    version: i32,
    elements: Vec<ElementDef>,
}

impl StreamerDef {
    pub fn new(class_name: &str, version: i32) -> Self {
        Self {
            class_name: class_name.to_string(),
            version,
            elements: Vec::new(),
        }
    }

    pub fn element(mut self, element: ElementDef) -> Self {
        self.elements.push(element);
        self
    }

    fn write(&self, w: &mut ObjectWriter) {
        w.record(9, |w| {
            w.tnamed(&self.class_name, "");
            w.u32(0x1234_5678);
            w.i32(self.version);
            w.object_any("TObjArray", |w| {
                w.objarray(|w| {
                    for element in &self.elements {
                        w.object_any(element.class, |w| element.write(w));
                    }
                })
            });
        });
    }
}

#[derive(Debug, Clone)]
enum ElementExtra {
    None,
    Base(i32),
    Stl { stl_type: i32, ctype: i32 },
}

/// One member of a class layout.
#[derive(Debug, Clone)]
pub struct ElementDef {
    class: &'static str,
    name: String,
    type_code: i32,
    size: i32,
    array_length: i32,
    array_dim: i32,
    type_name: String,
    extra: ElementExtra,
}

impl ElementDef {
    fn new(class: &'static str, name: &str, type_code: i32, type_name: &str) -> Self {
        Self {
            class,
            name: name.to_string(),
            type_code,
            size: 0,
            array_length: 0,
            array_dim: 0,
            type_name: type_name.to_string(),
            extra: ElementExtra::None,
        }
    }

    pub fn base(name: &str, version: i32) -> Self {
        let mut element = Self::new("TStreamerBase", name, codes::BASE, "BASE");
        element.extra = ElementExtra::Base(version);
        element
    }

    pub fn basic(name: &str, type_code: i32, type_name: &str) -> Self {
        Self::new("TStreamerBasicType", name, type_code, type_name)
    }

    /// A fixed-size array member such as `float m[3]`.
    pub fn fixed_array(name: &str, type_code: i32, type_name: &str, len: i32) -> Self {
        let mut element = Self::basic(name, codes::OFFSET_L + type_code, type_name);
        element.array_length = len;
        element.array_dim = 1;
        element
    }

    pub fn stl(name: &str, type_name: &str, stl_type: i32, ctype: i32) -> Self {
        let mut element = Self::new("TStreamerSTL", name, codes::STL, type_name);
        element.extra = ElementExtra::Stl { stl_type, ctype };
        element
    }

    pub fn stl_string(name: &str) -> Self {
        let mut element = Self::new("TStreamerSTLstring", name, codes::STL_STRING, "string");
        element.extra = ElementExtra::Stl {
            stl_type: stl::STRING,
            ctype: codes::OBJECT,
        };
        element
    }

    pub fn string(name: &str) -> Self {
        Self::new("TStreamerString", name, codes::TSTRING, "TString")
    }

    fn write_base(&self, w: &mut ObjectWriter) {
        w.record(4, |w| {
            w.tnamed(&self.name, "");
            w.i32(self.type_code);
            w.i32(self.size);
            w.i32(self.array_length);
            w.i32(self.array_dim);
            w.i32(self.array_length);
            for _ in 0..4 {
                w.i32(0);
            }
            w.string(&self.type_name);
        });
        match self.extra {
            ElementExtra::None => {}
            ElementExtra::Base(version) => w.i32(version),
            ElementExtra::Stl { stl_type, ctype } => {
                w.i32(stl_type);
                w.i32(ctype);
            }
        }
    }

    fn write(&self, w: &mut ObjectWriter) {
        w.record(3, |w| {
            if self.class == "TStreamerSTLstring" {
                w.record(3, |w| self.write_base(w));
            } else {
                self.write_base(w);
            }
        });
    }
}

// ── Branches ────────────────────────────────────────────────────────────────

/// A primitive a fixture branch can hold.
pub trait LeafValue: Copy {
    const LEAF_CLASS: &'static str;
    const TYPE_LETTER: char;
    const TYPE_CODE: i32;
    const CPP_NAME: &'static str;
    const UNSIGNED: bool;

    fn be_bytes(self) -> Vec<u8>;
}

macro_rules! leaf_value {
    ($ty:ty, $class:expr, $letter:expr, $code:expr, $cpp:expr, $unsigned:expr) => {
        impl LeafValue for $ty {
            const LEAF_CLASS: &'static str = $class;
            const TYPE_LETTER: char = $letter;
            const TYPE_CODE: i32 = $code;
            const CPP_NAME: &'static str = $cpp;
            const UNSIGNED: bool = $unsigned;

            fn be_bytes(self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }
        }
    };
}

leaf_value!(i8, "TLeafB", 'B', codes::CHAR, "char", false);
leaf_value!(u8, "TLeafB", 'b', codes::UCHAR, "unsigned char", true);
leaf_value!(i16, "TLeafS", 'S', codes::SHORT, "short", false);
leaf_value!(u16, "TLeafS", 's', codes::USHORT, "unsigned short", true);
leaf_value!(i32, "TLeafI", 'I', codes::INT, "int", false);
leaf_value!(u32, "TLeafI", 'i', codes::UINT, "unsigned int", true);
leaf_value!(i64, "TLeafL", 'L', codes::LONG64, "Long64_t", false);
leaf_value!(u64, "TLeafL", 'l', codes::ULONG64, "ULong64_t", true);
leaf_value!(f32, "TLeafF", 'F', codes::FLOAT, "float", false);
leaf_value!(f64, "TLeafD", 'D', codes::DOUBLE, "double", false);

impl LeafValue for bool {
    const LEAF_CLASS: &'static str = "TLeafO";
    const TYPE_LETTER: char = 'O';
    const TYPE_CODE: i32 = codes::BOOL;
    const CPP_NAME: &'static str = "bool";
    const UNSIGNED: bool = false;

    fn be_bytes(self) -> Vec<u8> {
        vec![self as u8]
    }
}

#[derive(Debug, Clone)]
struct LeafDef {
    class_name: String,
    name: String,
    title: String,
    len: i32,
    is_unsigned: bool,
    count: Option<String>,
    element: Option<(i32, i32)>,
}

impl LeafDef {
    fn of<T: LeafValue>(name: &str, title: String) -> Self {
        Self {
            class_name: T::LEAF_CLASS.to_string(),
            name: name.to_string(),
            title,
            len: 1,
            is_unsigned: T::UNSIGNED,
            count: None,
            element: None,
        }
    }

    fn element(name: &str, id: i32, type_code: i32) -> Self {
        Self {
            class_name: "TLeafElement".to_string(),
            name: name.to_string(),
            title: name.to_string(),
            len: 1,
            is_unsigned: false,
            count: None,
            element: Some((id, type_code)),
        }
    }
}

#[derive(Debug, Clone)]
struct ElementBranch {
    class_name: String,
    id: i32,
    kind: i32,
    streamer_type: i32,
}

/// One branch of a fixture tree, with its entries already serialized.
#[derive(Debug, Clone)]
pub struct BranchDef {
    name: String,
    title: String,
    leaves: Vec<LeafDef>,
    element: Option<ElementBranch>,
    entries: Vec<Vec<u8>>,
    entry_count: u64,
    entry_offsets: bool,
    entries_per_basket: Option<usize>,
    compression: Option<i32>,
    children: Vec<BranchDef>,
}

fn object_header(body_len: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(OBJECT_HEADER_LEN);
    header.put_u32(BYTE_COUNT_MASK | (body_len + 2) as u32);
    header.put_i16(1);
    header
}

fn short_string(value: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_string(value);
    out
}

impl BranchDef {
    fn new(name: &str, title: String, leaves: Vec<LeafDef>, entries: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            title,
            leaves,
            element: None,
            entry_count: entries.len() as u64,
            entries,
            entry_offsets: false,
            entries_per_basket: None,
            compression: None,
            children: Vec::new(),
        }
    }

    fn with_element(mut self, class_name: &str, id: i32, streamer_type: i32) -> Self {
        self.element = Some(ElementBranch {
            class_name: class_name.to_string(),
            id,
            kind: 0,
            streamer_type,
        });
        self
    }

    /// One primitive value per entry.
    pub fn scalar<T: LeafValue>(name: &str, values: &[T]) -> Self {
        let title = title_of(name, T::TYPE_LETTER);
        let entries = values.iter().map(|v| v.be_bytes()).collect();
        Self::new(name, title.clone(), vec![LeafDef::of::<T>(name, title)], entries)
    }

    /// `width` values per entry, given flattened.
    pub fn fixed<T: LeafValue>(name: &str, width: usize, values: &[T]) -> Self {
        let title = format!("{}[{}]/{}", name, width, T::TYPE_LETTER);
        let mut leaf = LeafDef::of::<T>(name, title.clone());
        leaf.len = width as i32;
        let entries = values
            .chunks(width)
            .map(|entry| entry.iter().flat_map(|v| v.be_bytes()).collect())
            .collect();
        Self::new(name, title, vec![leaf], entries)
    }

    /// A variable number of values per entry, counted by the leaf `count_leaf` of another
    /// branch.
    pub fn counted<T: LeafValue>(name: &str, count_leaf: &str, values: &[Vec<T>]) -> Self {
        let title = format!("{}[{}]/{}", name, count_leaf, T::TYPE_LETTER);
        let mut leaf = LeafDef::of::<T>(name, title.clone());
        leaf.count = Some(count_leaf.to_string());
        let entries = values
            .iter()
            .map(|entry| entry.iter().flat_map(|v| v.be_bytes()).collect())
            .collect();
        let mut branch = Self::new(name, title, vec![leaf], entries);
        branch.entry_offsets = true;
        branch
    }

    /// C strings stored in a TLeafC.
    pub fn strings(name: &str, values: &[&str]) -> Self {
        let title = format!("{}/C", name);
        let leaf = LeafDef {
            class_name: "TLeafC".to_string(),
            name: name.to_string(),
            title: title.clone(),
            len: values.iter().map(|v| v.len() as i32 + 1).max().unwrap_or(1),
            is_unsigned: false,
            count: None,
            element: None,
        };
        let entries = values.iter().map(|v| short_string(v)).collect();
        let mut branch = Self::new(name, title, vec![leaf], entries);
        branch.entry_offsets = true;
        branch
    }

    /// A top-level `std::string` branch.
    pub fn std_string(name: &str, values: &[&str]) -> Self {
        let entries = values
            .iter()
            .map(|v| {
                let body = short_string(v);
                let mut entry = object_header(body.len());
                entry.extend(body);
                entry
            })
            .collect();
        let mut branch = Self::new(
            name,
            name.to_string(),
            vec![LeafDef::element(name, -1, -1)],
            entries,
        )
        .with_element("string", -1, -1);
        branch.entry_offsets = true;
        branch
    }

    /// A top-level `std::vector<T>` branch.
    pub fn vector<T: LeafValue>(name: &str, values: &[Vec<T>]) -> Self {
        let entries = values
            .iter()
            .map(|entry| {
                let mut body = Vec::new();
                body.put_i32(entry.len() as i32);
                for value in entry {
                    body.extend(value.be_bytes());
                }
                let mut out = object_header(body.len());
                out.extend(body);
                out
            })
            .collect();
        let class_name = format!("vector<{}>", T::CPP_NAME);
        let mut branch = Self::new(
            name,
            name.to_string(),
            vec![LeafDef::element(name, -1, -1)],
            entries,
        )
        .with_element(&class_name, -1, -1);
        branch.entry_offsets = true;
        branch
    }

    /// A whole object of `class_name` per entry, streamed as one value behind its header.
    /// The class layout must be added to the file with [`FileBuilder::streamer`].
    pub fn object<T: LeafValue>(name: &str, class_name: &str, values: &[T]) -> Self {
        let entries = values
            .iter()
            .map(|v| {
                let body = v.be_bytes();
                let mut entry = object_header(body.len());
                entry.extend(body);
                entry
            })
            .collect();
        let mut branch = Self::new(
            name,
            name.to_string(),
            vec![LeafDef::element(name, -1, -1)],
            entries,
        )
        .with_element(class_name, -1, -1);
        branch.entry_offsets = true;
        branch
    }

    /// A member of a split object: member `id` of `class_name`.
    pub fn member<T: LeafValue>(name: &str, class_name: &str, id: i32, values: &[T]) -> Self {
        let entries = values.iter().map(|v| v.be_bytes()).collect();
        Self::new(
            name,
            name.to_string(),
            vec![LeafDef::element(name, id, T::TYPE_CODE)],
            entries,
        )
        .with_element(class_name, id, T::TYPE_CODE)
    }

    /// A split object: a parent branch without data of its own, plus its member branches.
    pub fn split_object(name: &str, class_name: &str, members: Vec<BranchDef>) -> Self {
        let entry_count = members.first().map_or(0, |m| m.entry_count);
        let mut branch = Self::new(
            name,
            name.to_string(),
            vec![LeafDef::element(name, -1, -1)],
            Vec::new(),
        )
        .with_element(class_name, -1, -1);
        branch.entry_count = entry_count;
        branch.children = members;
        branch
    }

    /// Two leaves in one branch (`a/I:b/F`), stored interleaved.
    pub fn leaflist(name: &str, ints: &[i32], floats: &[f32]) -> Self {
        let leaves = vec![
            LeafDef::of::<i32>("a", "a".to_string()),
            LeafDef::of::<f32>("b", "b".to_string()),
        ];
        let entries = ints
            .iter()
            .zip(floats)
            .map(|(i, f)| [i.be_bytes(), f.be_bytes()].concat())
            .collect();
        Self::new(name, "a/I:b/F".to_string(), leaves, entries)
    }

    pub fn child(mut self, child: BranchDef) -> Self {
        self.children.push(child);
        self
    }

    /// Splits the entries over baskets of at most `entries` entries.
    pub fn entries_per_basket(mut self, entries: usize) -> Self {
        self.entries_per_basket = Some(entries.max(1));
        self
    }

    /// Compression setting (`algorithm * 100 + level`) of this branch's baskets.
    pub fn compression(mut self, setting: i32) -> Self {
        self.compression = Some(setting);
        self
    }

    /// Drops the entry-offset table from the baskets.
    pub fn without_entry_offsets(mut self) -> Self {
        self.entry_offsets = false;
        self
    }
}

fn title_of(name: &str, letter: char) -> String {
    format!("{}/{}", name, letter)
}

// ── Trees, directories and files ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TreeBuilder {
    name: String,
    title: String,
    cycle: i16,
    entries: Option<u64>,
    branches: Vec<BranchDef>,
}

impl TreeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: String::new(),
            cycle: 1,
            entries: None,
            branches: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn cycle(mut self, cycle: i16) -> Self {
        self.cycle = cycle;
        self
    }

    /// Overrides the entry count, which otherwise follows the first branch.
    pub fn entries(mut self, entries: u64) -> Self {
        self.entries = Some(entries);
        self
    }

    pub fn branch(mut self, branch: BranchDef) -> Self {
        self.branches.push(branch);
        self
    }

    fn entry_count(&self) -> u64 {
        self.entries
            .unwrap_or_else(|| self.branches.first().map_or(0, |b| b.entry_count))
    }
}

#[derive(Debug, Clone)]
enum DirectoryKind {
    Written,
    /// Its key list pointer is the parent's key list.
    LoopToParent,
    /// Its key list pointer is the given offset, with nothing written there.
    Dangling(u64),
}

#[derive(Debug, Clone)]
pub struct DirectoryBuilder {
    kind: DirectoryKind,
    trees: Vec<TreeBuilder>,
    directories: Vec<(String, DirectoryBuilder)>,
}

impl Default for DirectoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryBuilder {
    pub fn new() -> Self {
        Self {
            kind: DirectoryKind::Written,
            trees: Vec::new(),
            directories: Vec::new(),
        }
    }

    pub fn looping_to_parent() -> Self {
        Self {
            kind: DirectoryKind::LoopToParent,
            ..Self::new()
        }
    }

    pub fn dangling(seek_keys: u64) -> Self {
        Self {
            kind: DirectoryKind::Dangling(seek_keys),
            ..Self::new()
        }
    }

    pub fn tree(mut self, tree: TreeBuilder) -> Self {
        self.trees.push(tree);
        self
    }

    pub fn directory(mut self, name: &str, directory: DirectoryBuilder) -> Self {
        self.directories.push((name.to_string(), directory));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FileBuilder {
    top: DirectoryBuilder,
    large: bool,
    compression: i32,
    max_frame_len: usize,
    streamers: Vec<StreamerDef>,
}

impl Default for FileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBuilder {
    pub fn new() -> Self {
        Self {
            top: DirectoryBuilder::new(),
            large: false,
            compression: DEFAULT_COMPRESSION,
            max_frame_len: MAX_FRAME_LEN,
            streamers: Vec::new(),
        }
    }

    /// Writes 64-bit pointers throughout.
    pub fn large(mut self, large: bool) -> Self {
        self.large = large;
        self
    }

    /// File compression setting (`algorithm * 100 + level`); zero stores everything raw.
    pub fn compression(mut self, setting: i32) -> Self {
        self.compression = setting;
        self
    }

    /// Splits compressed payloads into frames of at most `len` input bytes.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn tree(mut self, tree: TreeBuilder) -> Self {
        self.top = self.top.tree(tree);
        self
    }

    pub fn directory(mut self, name: &str, directory: DirectoryBuilder) -> Self {
        self.top = self.top.directory(name, directory);
        self
    }

    pub fn streamer(mut self, streamer: StreamerDef) -> Self {
        self.streamers.push(streamer);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut writer = FileWriter {
            out: vec![0u8; FILE_BEGIN],
            large: self.large,
            compression: self.compression,
            max_frame_len: self.max_frame_len,
        };

        // TFile key: file name, title, top directory record, UUID
        let name = "fixture.root";
        let mut names = Vec::new();
        names.put_string(name);
        names.put_string("");
        let record_len = directory_record(self.large, 0, 0, 0, 0, 0).len();
        let payload_len = names.len() + record_len + UUID_LEN;
        let key = writer
            .key("TFile", name, "")
            .seek_key(FILE_BEGIN as u64)
            .sizes(payload_len, payload_len);
        let keylen = key.key_len();
        let nbytes_name = keylen + names.len();
        writer.out.extend(key.to_bytes());
        writer.out.extend(names);
        let record_position = writer.out.len();
        writer.out.extend(vec![0u8; record_len + UUID_LEN]);
        writer.write_directory(
            &self.top,
            name,
            FILE_BEGIN as u64,
            record_position,
            nbytes_name as u32,
            0,
        );

        let key = writer.key("TList", "StreamerInfo", "Doubly linked list");
        let mut objects = ObjectWriter::new(key.key_len());
        objects.streamer_list(&self.streamers);
        let streamer_key = writer.write_object(key, &objects.into_bytes(), self.compression);

        let end = writer.out.len() as u64;
        let mut header = Vec::with_capacity(FILE_BEGIN);
        header.extend_from_slice(b"root");
        header.put_i32(if self.large {
            FILE_VERSION + LARGE_FILE_VERSION
        } else {
            FILE_VERSION
        });
        header.put_i32(FILE_BEGIN as i32);
        header.put_seek(self.large, end);
        header.put_seek(self.large, 0);
        header.put_i32(0);
        header.put_i32(0);
        header.put_i32(nbytes_name as i32);
        header.put_u8(if self.large { 8 } else { 4 });
        header.put_i32(self.compression);
        header.put_seek(self.large, streamer_key.seek_key);
        header.put_i32(streamer_key.nbytes() as i32);
        writer.out[..header.len()].copy_from_slice(&header);
        writer.out
    }
}

fn directory_record(
    large: bool,
    nbytes_keys: u32,
    nbytes_name: u32,
    seek_dir: u64,
    seek_parent: u64,
    seek_keys: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_i16(if large { 1005 } else { 5 });
    out.put_u32(0x6d7b_4a21);
    out.put_u32(0x6d7b_4a21);
    out.put_i32(nbytes_keys as i32);
    out.put_i32(nbytes_name as i32);
    out.put_seek(large, seek_dir);
    out.put_seek(large, seek_parent);
    out.put_seek(large, seek_keys);
    out
}

/// Basket positions written for one branch and its children.
struct WrittenBranch {
    compression: i32,
    baskets: Vec<(u64, usize, u64)>,
    children: Vec<WrittenBranch>,
}

struct FileWriter {
    out: Vec<u8>,
    large: bool,
    compression: i32,
    max_frame_len: usize,
}

impl FileWriter {
    fn key(&self, class_name: &str, name: &str, title: &str) -> KeyWriter {
        KeyWriter::new(class_name, name, title).large(self.large)
    }

    /// Appends a key and its payload, compressed with `setting` when that makes it smaller.
    fn write_object(&mut self, key: KeyWriter, payload: &[u8], setting: i32) -> KeyWriter {
        let stored = match Codec::from_setting(setting) {
            Some(codec) if !payload.is_empty() => {
                let framed = compress_frames(codec, setting % 100, payload, self.max_frame_len);
                if framed.len() < payload.len() {
                    framed
                } else {
                    payload.to_vec()
                }
            }
            _ => payload.to_vec(),
        };
        let key = key
            .seek_key(self.out.len() as u64)
            .sizes(stored.len(), payload.len());
        self.out.extend(key.to_bytes());
        self.out.extend(stored);
        key
    }

    fn patch_record(&mut self, position: usize, record: Vec<u8>) {
        self.out[position..position + record.len()].copy_from_slice(&record);
    }

    fn write_directory(
        &mut self,
        directory: &DirectoryBuilder,
        name: &str,
        seek_dir: u64,
        record_position: usize,
        nbytes_name: u32,
        seek_parent: u64,
    ) {
        let mut keys = Vec::new();
        for tree in &directory.trees {
            keys.push(self.write_tree(tree, seek_dir));
        }

        let mut loops = Vec::new();
        for (sub_name, sub) in &directory.directories {
            let position = self.out.len() as u64;
            let record = directory_record(self.large, 0, 0, position, seek_dir, 0);
            let key = self
                .key("TDirectory", sub_name, sub_name)
                .seek_key(position)
                .seek_pdir(seek_dir)
                .sizes(record.len(), record.len());
            let keylen = key.key_len();
            self.out.extend(key.to_bytes());
            self.out.extend(record);
            keys.push(key.to_bytes());

            let sub_record = position as usize + keylen;
            match sub.kind {
                DirectoryKind::Written => self.write_directory(
                    sub,
                    sub_name,
                    position,
                    sub_record,
                    keylen as u32,
                    seek_dir,
                ),
                DirectoryKind::LoopToParent => loops.push((sub_record, position)),
                DirectoryKind::Dangling(seek_keys) => {
                    let record = directory_record(
                        self.large,
                        100,
                        keylen as u32,
                        position,
                        seek_dir,
                        seek_keys,
                    );
                    self.patch_record(sub_record, record);
                }
            }
        }

        let mut payload = Vec::new();
        payload.put_i32(keys.len() as i32);
        for key in keys {
            payload.extend(key);
        }
        let list_key = self.key("TDirectory", name, "").seek_pdir(seek_dir);
        let list_key = self.write_object(list_key, &payload, 0);
        let nbytes_keys = list_key.nbytes() as u32;
        let seek_keys = list_key.seek_key;

        let record = directory_record(
            self.large,
            nbytes_keys,
            nbytes_name,
            seek_dir,
            seek_parent,
            seek_keys,
        );
        self.patch_record(record_position, record);
        for (sub_record, position) in loops {
            let record =
                directory_record(self.large, nbytes_keys, 0, position, seek_dir, seek_keys);
            self.patch_record(sub_record, record);
        }
    }

    /// Writes the baskets and the TTree key of `tree`, returning the key header.
    fn write_tree(&mut self, tree: &TreeBuilder, seek_dir: u64) -> Vec<u8> {
        let written: Vec<WrittenBranch> = tree
            .branches
            .iter()
            .map(|branch| self.write_baskets(branch, &tree.name, seek_dir))
            .collect();

        let key = self
            .key("TTree", &tree.name, &tree.title)
            .cycle(tree.cycle)
            .seek_pdir(seek_dir);
        let mut objects = ObjectWriter::new(key.key_len());
        write_tree_record(&mut objects, tree, &written);
        let key = self.write_object(key, &objects.into_bytes(), self.compression);
        key.to_bytes()
    }

    fn write_baskets(
        &mut self,
        branch: &BranchDef,
        tree_name: &str,
        seek_dir: u64,
    ) -> WrittenBranch {
        let compression = branch.compression.unwrap_or(self.compression);
        let per_basket = branch
            .entries_per_basket
            .unwrap_or(branch.entries.len())
            .max(1);
        let mut baskets = Vec::new();
        let mut first_entry = 0u64;
        for chunk in branch.entries.chunks(per_basket) {
            let (seek, nbytes) = self.write_basket(branch, chunk, compression, tree_name, seek_dir);
            baskets.push((seek, nbytes, first_entry));
            first_entry += chunk.len() as u64;
        }
        let children = branch
            .children
            .iter()
            .map(|child| self.write_baskets(child, tree_name, seek_dir))
            .collect();
        WrittenBranch {
            compression,
            baskets,
            children,
        }
    }

    fn write_basket(
        &mut self,
        branch: &BranchDef,
        entries: &[Vec<u8>],
        compression: i32,
        tree_name: &str,
        seek_dir: u64,
    ) -> (u64, usize) {
        let mut buffer = Vec::new();
        let mut starts = Vec::with_capacity(entries.len());
        for entry in entries {
            starts.push(buffer.len());
            buffer.extend_from_slice(entry);
        }
        let border = buffer.len();

        let key = self
            .key("TBasket", &branch.name, tree_name)
            .seek_pdir(seek_dir)
            .trailer(basket_header(0, 0, 0));
        let keylen = key.key_len();
        if branch.entry_offsets {
            buffer.put_i32(entries.len() as i32 + 1);
            for start in &starts {
                buffer.put_i32((keylen + start) as i32);
            }
            buffer.put_i32((keylen + border) as i32);
        }
        let nev_buf_size = if branch.entry_offsets { 10 } else { 0 };
        let key = key.trailer(basket_header(
            nev_buf_size,
            entries.len() as i32,
            (keylen + border) as i32,
        ));
        let key = self.write_object(key, &buffer, compression);
        (key.seek_key, key.nbytes())
    }
}

fn basket_header(nev_buf_size: i32, nev_buf: i32, last: i32) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_i16(3);
    out.put_i32(BASKET_BUFFER_SIZE);
    out.put_i32(nev_buf_size);
    out.put_i32(nev_buf);
    out.put_i32(last);
    out.put_u8(0);
    out
}

fn write_tree_record(w: &mut ObjectWriter, tree: &TreeBuilder, written: &[WrittenBranch]) {
    w.record(20, |w| {
        w.tnamed(&tree.name, &tree.title);
        // TAttLine, TAttFill, TAttMarker
        w.record(2, |w| {
            w.i16(602);
            w.i16(1);
            w.i16(1);
        });
        w.record(2, |w| {
            w.i16(0);
            w.i16(1001);
        });
        w.record(2, |w| {
            w.i16(1);
            w.i16(1);
            w.f32(1.0);
        });
        w.i64(tree.entry_count() as i64);
        for _ in 0..4 {
            w.i64(0);
        }
        w.f64(1.0);
        w.i32(0);
        w.i32(25);
        w.i32(0);
        w.i32(1000);
        w.i32(0);
        for _ in 0..6 {
            w.i64(0);
        }
        w.u8(0);
        w.u8(0);
        w.record(1, |w| w.u8(0));
        w.objarray(|w| {
            for (branch, written) in tree.branches.iter().zip(written) {
                write_branch(w, branch, written);
            }
        });
        w.objarray(|_| {});
    });
}

fn write_branch(w: &mut ObjectWriter, branch: &BranchDef, written: &WrittenBranch) {
    match &branch.element {
        Some(element) => w.object_any("TBranchElement", |w| {
            w.record(10, |w| {
                write_branch_record(w, branch, written);
                w.string(&element.class_name);
                w.string("");
                w.string("");
                w.u32(0);
                w.i16(1);
                w.i32(element.id);
                w.i32(element.kind);
                w.i32(element.streamer_type);
                w.i32(0);
                w.null();
                w.null();
            })
        }),
        None => w.object_any("TBranch", |w| write_branch_record(w, branch, written)),
    }
}

fn write_branch_record(w: &mut ObjectWriter, branch: &BranchDef, written: &WrittenBranch) {
    let baskets = &written.baskets;
    let capacity = baskets.len() + 1;
    w.record(13, |w| {
        w.tnamed(&branch.name, &branch.title);
        w.record(2, |w| {
            w.i16(0);
            w.i16(1001);
        });
        w.i32(written.compression);
        w.i32(BASKET_BUFFER_SIZE);
        w.i32(if branch.entry_offsets { 10 } else { 0 });
        w.i32(baskets.len() as i32);
        w.i64(branch.entry_count as i64);
        w.record(1, |w| w.u8(0));
        w.i32(0);
        w.i32(capacity as i32);
        w.i32(if branch.children.is_empty() { 0 } else { 99 });
        w.i64(branch.entry_count as i64);
        w.i64(0);
        w.i64(0);
        w.i64(0);
        w.objarray(|w| {
            for (child, written) in branch.children.iter().zip(&written.children) {
                write_branch(w, child, written);
            }
        });
        w.objarray(|w| {
            for leaf in &branch.leaves {
                w.object_any(&leaf.class_name, |w| write_leaf_record(w, leaf));
            }
        });
        w.objarray(|_| {});

        w.u8(1);
        for i in 0..capacity {
            w.i32(baskets.get(i).map_or(0, |(_, nbytes, _)| *nbytes as i32));
        }
        w.u8(1);
        for i in 0..capacity {
            w.i64(baskets.get(i).map_or(0, |(_, _, first)| *first as i64));
        }
        w.u8(1);
        for i in 0..capacity {
            w.i64(baskets.get(i).map_or(0, |(seek, _, _)| *seek as i64));
        }
        w.string("");
    });
}

fn write_leaf_record(w: &mut ObjectWriter, leaf: &LeafDef) {
    w.record(1, |w| {
        w.record(2, |w| {
            w.tnamed(&leaf.name, &leaf.title);
            w.i32(leaf.len);
            w.i32(0);
            w.i32(0);
            w.u8(0);
            w.u8(leaf.is_unsigned as u8);
            match &leaf.count {
                Some(count) if w.knows(count) => w.reference(count),
                Some(count) => {
                    let counter = LeafDef::of::<i32>(count, title_of(count, 'I'));
                    w.object_any("TLeafI", |w| write_leaf_record(w, &counter));
                }
                None => w.null(),
            }
        });
        if let Some((id, type_code)) = leaf.element {
            w.i32(id);
            w.i32(type_code);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaflist_entries_interleave_big_endian_leaves() {
        let branch = BranchDef::leaflist("packed", &[1, -2], &[1.5, 0.0]);
        assert_eq!(branch.entry_count, 2);
        assert_eq!(branch.entries[0], vec![0, 0, 0, 1, 0x3f, 0xc0, 0, 0]);
        assert_eq!(branch.entries[1], vec![0xff, 0xff, 0xff, 0xfe, 0, 0, 0, 0]);
    }

    #[test]
    fn scalar_entries_use_the_leaf_width() {
        let branch = BranchDef::scalar("flags", &[true, false]);
        assert_eq!(branch.entries, vec![vec![1], vec![0]]);
        let branch = BranchDef::scalar("n", &[258u16]);
        assert_eq!(branch.entries, vec![vec![1, 2]]);
    }
}
