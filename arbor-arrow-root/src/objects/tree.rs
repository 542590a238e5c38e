use crate::error::FormatError;

use super::{Object, ObjectReader};

/// The parts of a stored TTree needed to locate its column data.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRecord {
    pub name: String,
    pub title: String,
    pub entries: u64,
    pub branches: Vec<BranchRecord>,
}

impl TreeRecord {
    pub fn read(reader: &mut ObjectReader<'_>) -> Result<Self, FormatError> {
        let header = reader.record()?;
        reader.check_version(&header, "TTree", 18..=20)?;
        let (name, title) = reader.tnamed()?;
        reader.skip_record("TAttLine")?;
        reader.skip_record("TAttFill")?;
        reader.skip_record("TAttMarker")?;

        let cursor = reader.cursor();
        let entries = cursor.i64()?;
        let _tot_bytes = cursor.i64()?;
        let _zip_bytes = cursor.i64()?;
        let _saved_bytes = cursor.i64()?;
        let _flushed_bytes = cursor.i64()?;
        let _weight = cursor.f64()?;
        let _timer_interval = cursor.i32()?;
        let _scan_field = cursor.i32()?;
        let _update = cursor.i32()?;
        let _default_entry_offset_len = cursor.i32()?;
        let cluster_ranges = if header.version >= 19 {
            cursor.count("cluster range count")?
        } else {
            0
        };
        // max entries, max entry loop, max virtual size, auto save, auto flush, estimate
        cursor.skip(6 * 8)?;
        if header.version >= 19 {
            for _ in 0..2 {
                if cursor.u8()? != 0 {
                    cursor.skip(cluster_ranges * 8)?;
                }
            }
        }
        if header.version >= 20 {
            reader.skip_record("TIOFeatures")?;
        }

        let entries = u64::try_from(entries)
            .map_err(|_| FormatError::malformed("TTree", format!("{} entries", entries)))?;
        let branches = branch_records(reader.objarray()?, &name)?;
        reader.finish(&header, "TTree")?;
        Ok(Self {
            name,
            title,
            entries,
            branches,
        })
    }
}

/// Extra members of a TBranchElement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub class_name: String,
    pub parent_name: String,
    pub clones_name: String,
    pub checksum: u32,
    pub class_version: i32,
    /// Index of the member inside the class layout, negative for whole objects.
    pub id: i32,
    pub kind: i32,
    pub streamer_type: i32,
    pub maximum: i32,
    pub count_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchRecord {
    pub class_name: String,
    pub name: String,
    pub title: String,
    pub compression: i32,
    pub entry_offset_len: i32,
    pub write_basket: usize,
    pub entries: u64,
    pub branches: Vec<BranchRecord>,
    pub leaves: Vec<LeafRecord>,
    pub basket_bytes: Vec<i32>,
    pub basket_entry: Vec<i64>,
    pub basket_seek: Vec<i64>,
    pub element: Option<ElementInfo>,
}

impl BranchRecord {
    pub fn read(reader: &mut ObjectReader<'_>, class: &str) -> Result<Self, FormatError> {
        match class {
            "TBranchElement" => Self::read_element(reader),
            _ => Self::read_branch(reader),
        }
    }

    fn read_branch(reader: &mut ObjectReader<'_>) -> Result<Self, FormatError> {
        let header = reader.record()?;
        reader.check_version(&header, "TBranch", 10..=13)?;
        let (name, title) = reader.tnamed()?;
        reader.skip_record("TAttFill")?;

        let cursor = reader.cursor();
        let compression = cursor.i32()?;
        let _basket_size = cursor.i32()?;
        let entry_offset_len = cursor.i32()?;
        let write_basket = cursor.count("written basket count")?;
        let _entry_number = cursor.i64()?;
        if header.version >= 13 {
            reader.skip_record("TIOFeatures")?;
        }
        let cursor = reader.cursor();
        let _offset = cursor.i32()?;
        let max_baskets = cursor.count("basket capacity")?;
        let _split_level = cursor.i32()?;
        let entries = cursor.i64()?;
        if header.version >= 11 {
            let _first_entry = cursor.i64()?;
        }
        let _tot_bytes = cursor.i64()?;
        let _zip_bytes = cursor.i64()?;

        let branches = branch_records(reader.objarray()?, &name)?;
        let leaves = reader
            .objarray()?
            .into_iter()
            .filter_map(|object| match object {
                Object::Leaf(leaf) => Some(leaf),
                _ => None,
            })
            .collect();
        reader.skip_record("TBranch baskets")?;

        let cursor = reader.cursor();
        let basket_bytes = optional_array(cursor, max_baskets, |c| c.i32())?;
        let basket_entry = optional_array(cursor, max_baskets, |c| c.i64())?;
        let basket_seek = optional_array(cursor, max_baskets, |c| c.i64())?;
        let _file_name = reader.string()?;
        reader.finish(&header, "TBranch")?;

        if write_basket > max_baskets {
            return Err(FormatError::malformed(
                "TBranch",
                format!(
                    "{} lists {} written baskets but has room for {}",
                    name, write_basket, max_baskets
                ),
            ));
        }
        let entries = u64::try_from(entries)
            .map_err(|_| FormatError::malformed("TBranch", format!("{} entries", entries)))?;
        Ok(Self {
            class_name: "TBranch".to_string(),
            name,
            title,
            compression,
            entry_offset_len,
            write_basket,
            entries,
            branches,
            leaves,
            basket_bytes,
            basket_entry,
            basket_seek,
            element: None,
        })
    }

    fn read_element(reader: &mut ObjectReader<'_>) -> Result<Self, FormatError> {
        let header = reader.record()?;
        reader.check_version(&header, "TBranchElement", 8..=10)?;
        let mut branch = Self::read_branch(reader)?;
        let class_name = reader.string()?;
        let parent_name = reader.string()?;
        let clones_name = reader.string()?;
        let cursor = reader.cursor();
        let checksum = cursor.u32()?;
        let class_version = if header.version >= 10 {
            cursor.i16()? as i32
        } else {
            cursor.i32()?
        };
        let id = cursor.i32()?;
        let kind = cursor.i32()?;
        let streamer_type = cursor.i32()?;
        let maximum = cursor.i32()?;
        let count_branch = reader.read_object_any()?.and_then(|o| o.name().map(str::to_string));
        let _count_branch2 = reader.read_object_any()?;
        reader.finish(&header, "TBranchElement")?;

        branch.class_name = "TBranchElement".to_string();
        branch.element = Some(ElementInfo {
            class_name,
            parent_name,
            clones_name,
            checksum,
            class_version,
            id,
            kind,
            streamer_type,
            maximum,
            count_branch,
        });
        Ok(branch)
    }

    pub fn has_subbranches(&self) -> bool {
        !self.branches.is_empty()
    }
}

fn branch_records(objects: Vec<Object>, owner: &str) -> Result<Vec<BranchRecord>, FormatError> {
    let mut branches = Vec::with_capacity(objects.len());
    for object in objects {
        match object {
            Object::Branch(branch) => branches.push(*branch),
            Object::Unknown(class) => {
                tracing::warn!("Skipping branch of unsupported class {} in {}", class, owner)
            }
            other => {
                return Err(FormatError::malformed(
                    "branch list",
                    format!("{} holds a non-branch object {:?}", owner, other.name()),
                ))
            }
        }
    }
    Ok(branches)
}

/// Reads a counted array preceded by a presence byte.
fn optional_array<T>(
    cursor: &mut crate::cursor::Cursor<'_>,
    len: usize,
    mut read: impl FnMut(&mut crate::cursor::Cursor<'_>) -> Result<T, crate::error::CursorError>,
) -> Result<Vec<T>, FormatError> {
    if cursor.u8()? == 0 {
        return Ok(Vec::new());
    }
    let mut values = Vec::with_capacity(len.min(cursor.remaining()));
    for _ in 0..len {
        values.push(read(cursor)?);
    }
    Ok(values)
}

const LEAF_CLASSES: [&str; 10] = [
    "TLeafO",
    "TLeafB",
    "TLeafS",
    "TLeafI",
    "TLeafL",
    "TLeafG",
    "TLeafF",
    "TLeafD",
    "TLeafC",
    "TLeafElement",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRecord {
    pub class_name: String,
    pub name: String,
    pub title: String,
    /// Number of fixed elements per entry.
    pub len: i32,
    pub len_type: i32,
    pub offset: i32,
    pub is_range: bool,
    pub is_unsigned: bool,
    /// Name of the leaf holding per-entry element counts.
    pub count_leaf: Option<String>,
    /// `(id, type code)` of a TLeafElement.
    pub element: Option<(i32, i32)>,
}

impl LeafRecord {
    pub fn is_leaf_class(class: &str) -> bool {
        LEAF_CLASSES.contains(&class)
    }

    pub fn read(reader: &mut ObjectReader<'_>, class: &str) -> Result<Self, FormatError> {
        let derived = reader.record()?;
        let header = reader.record()?;
        reader.check_version(&header, "TLeaf", 2..=2)?;
        let (name, title) = reader.tnamed()?;
        let cursor = reader.cursor();
        let len = cursor.i32()?;
        let len_type = cursor.i32()?;
        let offset = cursor.i32()?;
        let is_range = cursor.bool()?;
        let is_unsigned = cursor.bool()?;
        let count_leaf = match reader.read_object_any()? {
            Some(object) => object.name().map(str::to_string),
            None => None,
        }
        .or_else(|| count_from_title(&name, &title));
        reader.finish(&header, "TLeaf")?;

        let element = if class == "TLeafElement" {
            let cursor = reader.cursor();
            Some((cursor.i32()?, cursor.i32()?))
        } else {
            None
        };
        reader.finish(&derived, "TLeaf")?;

        Ok(Self {
            class_name: class.to_string(),
            name,
            title,
            len,
            len_type,
            offset,
            is_range,
            is_unsigned,
            count_leaf,
            element,
        })
    }
}

/// Extracts the count leaf from a leaf title like `px[n]`, ignoring numeric dimensions.
fn count_from_title(name: &str, title: &str) -> Option<String> {
    let dimensions = title.strip_prefix(name)?.strip_prefix('[')?;
    let inner = dimensions[..dimensions.find(']')?].trim();
    if inner.is_empty() || inner.chars().all(|c| c.is_ascii_digit()) {
        None
    } else {
        Some(inner.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_leaf_from_title() {
        assert_eq!(count_from_title("px", "px[n]"), Some("n".to_string()));
        assert_eq!(
            count_from_title("px", "px[nTracks]/F"),
            Some("nTracks".to_string())
        );
        assert_eq!(count_from_title("m", "m[3]"), None);
        assert_eq!(count_from_title("e", "energy [GeV]"), None);
        assert_eq!(count_from_title("plain", "plain"), None);
    }

    #[test]
    fn leaf_classes() {
        assert!(LeafRecord::is_leaf_class("TLeafD"));
        assert!(LeafRecord::is_leaf_class("TLeafElement"));
        assert!(!LeafRecord::is_leaf_class("TLeafObject"));
    }
}
