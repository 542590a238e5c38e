//! Reads trees out of ROOT files and materializes their columns as Arrow arrays.
//!
//! ```no_run
//! use arbor_arrow_root::SourceFile;
//!
//! let file = SourceFile::open("events.root")?;
//! let tree = file.get_tree("events")?;
//! let px = tree.column("px")?.to_array(None)?;
//! println!("{} entries of {}", px.len(), px.descriptor());
//! # Ok::<(), arbor_arrow_root::RootError>(())
//! ```

pub mod basket;
pub mod cache;
pub mod column;
pub mod compression;
pub mod cursor;
pub mod decoders;
pub mod directory;
pub mod error;
pub mod file;
pub mod key;
pub mod objects;
pub mod source;
pub mod tree;
pub mod types;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use column::{Column, DecodedColumn};
pub use directory::DirectoryEntry;
pub use error::{DecodeError, FormatError, RootError, RootResult, UnsupportedType};
pub use file::{FileHeader, ReaderOptions, SourceFile};
pub use source::ReadAt;
pub use tree::{ColumnInfo, Tree};
pub use types::{DecodePlan, Encoding, Primitive, TypeDescriptor};
