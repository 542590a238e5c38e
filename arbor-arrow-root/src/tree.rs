//! Trees and the flattened column index of their branches.

use std::{
    collections::HashMap,
    ops::Range,
    sync::{Arc, OnceLock},
};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    basket::BasketRef,
    column::{Column, DecodedColumn},
    cursor::Cursor,
    directory::DirectoryEntry,
    error::{FormatError, RootError, RootResult, UnsupportedType},
    file::SourceFile,
    objects::{
        streamers::StreamerLookup,
        tree::{BranchRecord, ElementInfo, LeafRecord, TreeRecord},
        ObjectReader,
    },
    types::{DecodePlan, RawTypeInfo, TypeDescriptor, TypeResolver},
};

/// Name and resolved type of one column, as listed by [`Tree::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub descriptor: Result<TypeDescriptor, UnsupportedType>,
    /// C++ spelling of the type, when it is supported.
    pub item_type_name: Option<String>,
}

/// A stored tree. Cloning is cheap; clones share resolved column types.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) inner: Arc<TreeInner>,
}

#[derive(Debug)]
pub(crate) struct TreeInner {
    pub(crate) file: SourceFile,
    name: String,
    title: String,
    entry_count: u64,
    pub(crate) columns: IndexMap<String, ColumnData>,
    /// Leaf name to column index, for locating count leaves.
    leaf_columns: HashMap<String, usize>,
}

#[derive(Debug)]
pub(crate) struct ColumnData {
    pub(crate) name: String,
    pub(crate) title: String,
    pub(crate) branch_class: String,
    pub(crate) leaves: Vec<LeafRecord>,
    pub(crate) element: Option<ElementInfo>,
    pub(crate) has_subbranches: bool,
    pub(crate) baskets: Vec<BasketRef>,
    plan: OnceLock<Result<DecodePlan, UnsupportedType>>,
}

impl ColumnData {
    fn new(name: String, branch: BranchRecord, has_subbranches: bool) -> Result<Self, FormatError> {
        let baskets = basket_refs(&branch)?;
        Ok(Self {
            name,
            title: branch.title,
            branch_class: branch.class_name,
            leaves: branch.leaves,
            element: branch.element,
            has_subbranches,
            baskets,
            plan: OnceLock::new(),
        })
    }

    /// The class name type resolution starts from.
    pub(crate) fn type_class(&self) -> &str {
        match (&self.element, self.leaves.first()) {
            (Some(element), _) => &element.class_name,
            (None, Some(leaf)) => &leaf.class_name,
            (None, None) => &self.branch_class,
        }
    }

    pub(crate) fn plan(&self, file: &SourceFile) -> Result<&DecodePlan, UnsupportedType> {
        self.plan
            .get_or_init(|| {
                let streamers = file.streamers();
                let plan = self.resolve(streamers.as_ref());
                match &plan {
                    Ok(plan) => debug!(
                        column = %self.name,
                        descriptor = %plan.descriptor,
                        "Resolved column type"
                    ),
                    Err(e) => debug!(column = %self.name, "Column is not decodable: {}", e.reason),
                }
                plan
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    fn resolve(&self, streamers: &dyn StreamerLookup) -> Result<DecodePlan, UnsupportedType> {
        let raw = match &self.element {
            Some(element) => RawTypeInfo::Element {
                element,
                leaves: &self.leaves,
                has_subbranches: self.has_subbranches,
            },
            None => RawTypeInfo::Leaves(&self.leaves),
        };
        TypeResolver::new(&self.name, streamers).resolve(self.type_class(), &raw)
    }
}

/// Locates the written baskets of a branch, ordered by first entry.
fn basket_refs(branch: &BranchRecord) -> Result<Vec<BasketRef>, FormatError> {
    let written = branch.write_basket;
    if branch.basket_bytes.len() < written
        || branch.basket_entry.len() < written
        || branch.basket_seek.len() < written
    {
        return Err(FormatError::malformed(
            "TBranch",
            format!(
                "{} lists {} written baskets but stores fewer basket positions",
                branch.name, written
            ),
        ));
    }

    let mut starts = Vec::with_capacity(written);
    for index in 0..written {
        let malformed = |what: &str, value: i64| {
            FormatError::malformed(
                "TBranch",
                format!("{} basket {} has {} {}", branch.name, index, what, value),
            )
        };
        let seek = u64::try_from(branch.basket_seek[index])
            .map_err(|_| malformed("offset", branch.basket_seek[index]))?;
        let nbytes = u32::try_from(branch.basket_bytes[index])
            .map_err(|_| malformed("size", branch.basket_bytes[index] as i64))?;
        let first_entry = u64::try_from(branch.basket_entry[index])
            .map_err(|_| malformed("first entry", branch.basket_entry[index]))?;
        starts.push((index, seek, nbytes, first_entry));
    }
    starts.sort_by_key(|(_, _, _, first_entry)| *first_entry);

    let mut baskets = Vec::with_capacity(written);
    for (i, (index, seek, nbytes, first_entry)) in starts.iter().enumerate() {
        let end = starts
            .get(i + 1)
            .map_or(branch.entries, |(_, _, _, next)| *next);
        let entry_count = end.checked_sub(*first_entry).ok_or_else(|| {
            FormatError::malformed(
                "TBranch",
                format!(
                    "{} basket {} starts at entry {} past the branch end {}",
                    branch.name, index, first_entry, end
                ),
            )
        })?;
        baskets.push(BasketRef {
            index: *index,
            seek: *seek,
            nbytes: *nbytes,
            first_entry: *first_entry,
            entry_count,
        });
    }
    Ok(baskets)
}

/// Adds every branch and, depth first, its sub-branches as columns.
fn flatten(
    branches: Vec<BranchRecord>,
    parent: Option<&str>,
    columns: &mut IndexMap<String, ColumnData>,
) -> Result<(), FormatError> {
    for mut branch in branches {
        let children = std::mem::take(&mut branch.branches);
        let mut name = branch.name.clone();
        if columns.contains_key(&name) {
            if let Some(parent) = parent {
                name = format!("{}/{}", parent, branch.name);
            }
        }
        if columns.contains_key(&name) {
            warn!("Skipping branch {} with a duplicate name", name);
        } else {
            let column = ColumnData::new(name.clone(), branch, !children.is_empty())?;
            columns.insert(name.clone(), column);
        }
        flatten(children, Some(&name), columns)?;
    }
    Ok(())
}

impl Tree {
    pub(crate) fn read(file: SourceFile, entry: &DirectoryEntry) -> RootResult<Self> {
        let payload = file.read_object(entry)?;
        let mut reader = ObjectReader::new(Cursor::with_origin(&payload, entry.key_len as usize));
        let record = TreeRecord::read(&mut reader)?;

        let mut columns = IndexMap::new();
        flatten(record.branches, None, &mut columns)?;
        let mut leaf_columns = HashMap::new();
        for (index, column) in columns.values().enumerate() {
            for leaf in &column.leaves {
                leaf_columns.entry(leaf.name.clone()).or_insert(index);
            }
        }
        debug!(
            tree = %entry.name,
            entries = record.entries,
            columns = columns.len(),
            "Read tree"
        );

        Ok(Self {
            inner: Arc::new(TreeInner {
                file,
                name: entry.name.clone(),
                title: record.title,
                entry_count: record.entries,
                columns,
                leaf_columns,
            }),
        })
    }

    /// Path-qualified key name of the tree.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count
    }

    pub fn file(&self) -> &SourceFile {
        &self.inner.file
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.inner.columns.keys().map(String::as_str).collect()
    }

    /// Every column with its type, resolving types on first use.
    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.inner
            .columns
            .values()
            .map(|column| {
                let descriptor = column
                    .plan(&self.inner.file)
                    .map(|plan| plan.descriptor.clone());
                ColumnInfo {
                    name: column.name.clone(),
                    item_type_name: descriptor.as_ref().ok().map(TypeDescriptor::item_type_name),
                    descriptor,
                }
            })
            .collect()
    }

    pub fn column(&self, name: &str) -> RootResult<Column> {
        self.inner
            .columns
            .get_index_of(name)
            .map(|index| Column::new(self.clone(), index))
            .ok_or_else(|| RootError::not_found("column", name))
    }

    /// The column holding the leaf `name`, falling back to a column of that name.
    pub(crate) fn column_for_leaf(&self, name: &str) -> RootResult<Column> {
        match self.inner.leaf_columns.get(name) {
            Some(index) => Ok(Column::new(self.clone(), *index)),
            None => self.column(name),
        }
    }

    /// Materializes several columns over the same range, keeping each result separate.
    pub fn column_arrays(
        &self,
        names: &[&str],
        range: Option<Range<u64>>,
    ) -> IndexMap<String, RootResult<DecodedColumn>> {
        names
            .iter()
            .map(|name| {
                let decoded = self
                    .column(name)
                    .and_then(|column| column.to_array(range.clone()));
                (name.to_string(), decoded)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{BranchDef, FileBuilder, TreeBuilder};

    fn branch(entries: u64, basket_entry: Vec<i64>) -> BranchRecord {
        let n = basket_entry.len();
        BranchRecord {
            class_name: "TBranch".into(),
            name: "x".into(),
            title: "x/I".into(),
            compression: 0,
            entry_offset_len: 0,
            write_basket: n,
            entries,
            branches: Vec::new(),
            leaves: Vec::new(),
            basket_bytes: vec![100; n],
            basket_entry,
            basket_seek: (0..n as i64).map(|i| 1000 + i * 100).collect(),
            element: None,
        }
    }

    #[test]
    fn basket_entry_counts_follow_the_next_basket() {
        let baskets = basket_refs(&branch(10, vec![0, 4, 7])).unwrap();
        let ranges: Vec<_> = baskets.iter().map(BasketRef::entries).collect();
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(baskets[2].seek, 1200);
    }

    #[test]
    fn baskets_are_ordered_by_first_entry() {
        let baskets = basket_refs(&branch(6, vec![3, 0])).unwrap();
        assert_eq!(baskets[0].index, 1);
        assert_eq!(baskets[0].entries(), 0..3);
        assert_eq!(baskets[1].entries(), 3..6);
    }

    #[test]
    fn baskets_past_the_branch_end_are_malformed() {
        assert!(basket_refs(&branch(2, vec![0, 5])).is_err());
        let mut short = branch(4, vec![0, 2]);
        short.basket_seek.truncate(1);
        assert!(basket_refs(&short).is_err());
    }

    #[test]
    fn nested_branches_are_flattened_depth_first() {
        let bytes = FileBuilder::new()
            .tree(
                TreeBuilder::new("t")
                    .branch(BranchDef::scalar("x", &[7i32, 8]))
                    .branch(
                        BranchDef::scalar("a", &[1i32, 2])
                            .child(BranchDef::scalar("a.b", &[3i32, 4]))
                            .child(BranchDef::scalar("x", &[5i32, 6])),
                    ),
            )
            .build();
        let tree = SourceFile::from_bytes(bytes).unwrap().get_tree("t").unwrap();
        assert_eq!(tree.column_names(), vec!["x", "a", "a.b", "a/x"]);
        assert!(matches!(
            tree.column("missing"),
            Err(RootError::NotFound { kind: "column", .. })
        ));
    }

    #[test]
    fn column_listing_reports_types() {
        let bytes = FileBuilder::new()
            .tree(
                TreeBuilder::new("t")
                    .branch(BranchDef::scalar("energy", &[1.0f64, 2.0]))
                    .branch(BranchDef::leaflist("packed", &[1i32, 2], &[3.0f32, 4.0])),
            )
            .build();
        let tree = SourceFile::from_bytes(bytes).unwrap().get_tree("t").unwrap();
        let columns = tree.columns();
        assert_eq!(columns[0].descriptor, Ok(TypeDescriptor::Float64));
        assert_eq!(columns[0].item_type_name.as_deref(), Some("double"));
        assert!(columns[1].descriptor.is_err());
        assert!(columns[1].item_type_name.is_none());
    }
}
