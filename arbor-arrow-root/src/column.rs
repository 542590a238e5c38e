//! Column handles and materialization of entry ranges into Arrow arrays.

use std::{ops::Range, sync::Arc};

use arrow::{
    array::{new_empty_array, Array, ArrayRef, AsArray, ListArray},
    buffer::OffsetBuffer,
    compute::concat,
    datatypes::DataType,
};
use tracing::debug;

use crate::{
    basket::{decode_basket, BasketRef, DecodedBasket},
    decoders::{
        jagged::{assemble_counted, counts_from_array},
        BasketPayload,
    },
    error::{DecodeError, RootError, RootResult, UnsupportedType},
    objects::tree::{ElementInfo, LeafRecord},
    tree::{ColumnData, Tree},
    types::{DecodePlan, Encoding, TypeDescriptor},
};

/// One column of a tree.
#[derive(Debug, Clone)]
pub struct Column {
    tree: Tree,
    index: usize,
}

impl Column {
    pub(crate) fn new(tree: Tree, index: usize) -> Self {
        Self { tree, index }
    }

    fn data(&self) -> &ColumnData {
        &self.tree.inner.columns[self.index]
    }

    pub fn name(&self) -> &str {
        &self.data().name
    }

    pub fn title(&self) -> &str {
        &self.data().title
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn leaves(&self) -> &[LeafRecord] {
        &self.data().leaves
    }

    pub fn element(&self) -> Option<&ElementInfo> {
        self.data().element.as_ref()
    }

    pub fn has_subbranches(&self) -> bool {
        self.data().has_subbranches
    }

    /// Written baskets, ordered by first entry.
    pub fn baskets(&self) -> &[BasketRef] {
        &self.data().baskets
    }

    /// How entries are decoded; resolved once per column.
    pub fn plan(&self) -> Result<&DecodePlan, UnsupportedType> {
        self.data().plan(&self.tree.inner.file)
    }

    pub fn descriptor(&self) -> Result<TypeDescriptor, UnsupportedType> {
        self.plan().map(|plan| plan.descriptor.clone())
    }

    pub fn item_type_name(&self) -> Result<String, UnsupportedType> {
        self.plan().map(|plan| plan.descriptor.item_type_name())
    }

    /// Decodes the entries in `range`, or every entry when `None`.
    pub fn to_array(&self, range: Option<Range<u64>>) -> RootResult<DecodedColumn> {
        let plan = self.plan()?;
        let entries = self.tree.entry_count();
        let range = range.unwrap_or(0..entries);
        if range.start > range.end || range.end > entries {
            return Err(DecodeError::InvalidRange {
                start: range.start,
                end: range.end,
                entries,
            }
            .into());
        }

        let array = if range.is_empty() {
            new_empty_array(&plan.descriptor.arrow_type())
        } else {
            self.materialize(plan, &range)?
        };
        debug!(
            column = self.name(),
            start = range.start,
            end = range.end,
            "Materialized column"
        );
        Ok(DecodedColumn {
            name: self.name().to_string(),
            descriptor: plan.descriptor.clone(),
            range,
            array,
        })
    }

    /// Baskets overlapping `range`, after checking they tile every entry of the tree.
    fn covering_baskets(&self, range: &Range<u64>) -> Result<&[BasketRef], DecodeError> {
        let baskets = self.baskets();
        let entries = self.tree.entry_count();
        let mut expected = 0;
        for basket in baskets {
            if basket.first_entry != expected {
                return Err(DecodeError::Coverage(format!(
                    "basket {} of {} starts at entry {}, expected {}",
                    basket.index,
                    self.name(),
                    basket.first_entry,
                    expected
                )));
            }
            expected += basket.entry_count;
        }
        if expected != entries {
            return Err(DecodeError::Coverage(format!(
                "baskets of {} hold {} entries, the tree has {}",
                self.name(),
                expected,
                entries
            )));
        }

        let first = baskets.partition_point(|b| b.first_entry + b.entry_count <= range.start);
        let last = baskets.partition_point(|b| b.first_entry < range.end);
        Ok(&baskets[first..last])
    }

    fn decoded_baskets(
        &self,
        plan: &DecodePlan,
        baskets: &[BasketRef],
    ) -> Result<Vec<Arc<DecodedBasket>>, DecodeError> {
        let file = &self.tree.inner.file;
        baskets
            .iter()
            .map(|basket| {
                file.basket_cache()
                    .get_or_decode(basket.seek, || decode_basket(file, basket, plan))
                    .map_err(|e| e.in_basket(self.name(), basket.index))
            })
            .collect()
    }

    fn materialize(&self, plan: &DecodePlan, range: &Range<u64>) -> RootResult<ArrayRef> {
        let baskets = self.covering_baskets(range)?;
        let (aligned_start, aligned_end) = match (baskets.first(), baskets.last()) {
            (Some(first), Some(last)) => (first.first_entry, last.first_entry + last.entry_count),
            _ => {
                return Err(DecodeError::Coverage(format!(
                    "no basket of {} holds entries {}..{}",
                    self.name(),
                    range.start,
                    range.end
                ))
                .into())
            }
        };
        let decoded = self.decoded_baskets(plan, baskets)?;
        let parts: Vec<&dyn Array> = decoded
            .iter()
            .map(|basket| basket.payload.array().as_ref())
            .collect();
        let joined = concat(&parts).map_err(DecodeError::from)?;

        let joined = match &plan.encoding {
            Encoding::Counted { count_leaf, .. } => {
                let primitive = plan.descriptor.primitive().ok_or_else(|| {
                    DecodeError::MalformedPayload(format!(
                        "counted column {} has no element type",
                        self.name()
                    ))
                })?;
                let counts = self.counts(count_leaf, aligned_start..aligned_end)?;
                Arc::new(assemble_counted(primitive, &counts, joined)?) as ArrayRef
            }
            _ => {
                if let Some(basket) = decoded
                    .iter()
                    .find(|basket| matches!(basket.payload, BasketPayload::Values(_)))
                {
                    return Err(DecodeError::MalformedPayload(format!(
                        "basket at entry {} decoded without per-entry structure",
                        basket.first_entry
                    ))
                    .into());
                }
                joined
            }
        };

        let offset = (range.start - aligned_start) as usize;
        let len = (range.end - range.start) as usize;
        Ok(compact(joined.slice(offset, len))?)
    }

    /// Per-entry element counts of a counted column, read from its count leaf.
    fn counts(&self, count_leaf: &str, range: Range<u64>) -> Result<Vec<usize>, DecodeError> {
        let count_error = |e: RootError| DecodeError::CountColumn {
            column: count_leaf.to_string(),
            source: Box::new(e),
        };
        let counter = self.tree.column_for_leaf(count_leaf).map_err(count_error)?;
        if counter.index == self.index {
            return Err(DecodeError::MalformedPayload(format!(
                "{} is counted by itself",
                self.name()
            )));
        }
        let decoded = counter.to_array(Some(range)).map_err(count_error)?;
        counts_from_array(decoded.array())
    }
}

/// Rebuilds a sliced list so its offsets start at zero and its values hold only
/// the selected entries.
fn compact(array: ArrayRef) -> Result<ArrayRef, DecodeError> {
    let Some(list) = array.as_list_opt::<i32>() else {
        return Ok(array);
    };
    let offsets = list.value_offsets();
    let (first, last) = match (offsets.first(), offsets.last()) {
        (Some(first), Some(last)) if *first != 0 || (*last as usize) < list.values().len() => {
            (*first, *last)
        }
        _ => return Ok(array),
    };
    let values = list.values().slice(first as usize, (last - first) as usize);
    let rebased: Vec<i32> = offsets.iter().map(|offset| offset - first).collect();
    let field = match list.data_type() {
        DataType::List(field) => field.clone(),
        other => {
            return Err(DecodeError::MalformedPayload(format!(
                "list array typed as {}",
                other
            )))
        }
    };
    let compacted = ListArray::try_new(
        field,
        OffsetBuffer::new(rebased.into()),
        values,
        list.nulls().cloned(),
    )?;
    Ok(Arc::new(compacted))
}

/// The values of one column over a range of entries.
#[derive(Debug, Clone)]
pub struct DecodedColumn {
    name: String,
    descriptor: TypeDescriptor,
    range: Range<u64>,
    array: ArrayRef,
}

impl DecodedColumn {
    pub fn new(
        name: impl Into<String>,
        descriptor: TypeDescriptor,
        range: Range<u64>,
        array: ArrayRef,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            range,
            array,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Entries of the tree this column covers.
    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    pub fn into_array(self) -> ArrayRef {
        self.array
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Entry offsets of a jagged column, starting at zero.
    pub fn offsets(&self) -> Option<&[i32]> {
        self.array
            .as_list_opt::<i32>()
            .map(|list| list.value_offsets())
    }

    /// Flattened element values of an array column.
    pub fn values(&self) -> Option<&ArrayRef> {
        match self.array.as_list_opt::<i32>() {
            Some(list) => Some(list.values()),
            None => self
                .array
                .as_fixed_size_list_opt()
                .map(|list| list.values()),
        }
    }

    /// Entries `start..end`, counted from the start of this column.
    pub fn slice(&self, start: usize, end: usize) -> Result<DecodedColumn, DecodeError> {
        if start > end || end > self.len() {
            return Err(DecodeError::InvalidRange {
                start: self.range.start + start as u64,
                end: self.range.start + end as u64,
                entries: self.range.end,
            });
        }
        Ok(DecodedColumn {
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
            range: self.range.start + start as u64..self.range.start + end as u64,
            array: compact(self.array.slice(start, end - start))?,
        })
    }
}
