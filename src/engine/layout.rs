//! # Component Layouts
//!
//! A [`ComponentLayout`] is the static description of one component set
//! (an archetype): which component types a chunk holds, in which column order,
//! and where each column would sit inside a single chunk-sized buffer.
//!
//! ## Invariants
//! - Components are sorted by [`ComponentID`] and contain no duplicates.
//! - Once built, a layout never changes. A different set of types needs a
//!   different layout.
//! - Column `i` starts at `offset(i)`, aligned to the component's alignment;
//!   row `r` of that column lives at `offset(i) + r * stride(i)`.

use std::any::TypeId;

use crate::engine::component::ComponentDesc;
use crate::engine::types::{ComponentID, Signature, RowID};

/// Immutable description of a component set and its column geometry.
#[derive(Clone, Debug)]
pub struct ComponentLayout {
    signature: Signature,
    components: Vec<ComponentDesc>,
    offsets: Vec<usize>,
    entities_per_chunk: usize,
    chunk_bytes: usize,
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

impl ComponentLayout {
    /// Builds a layout from component descriptors.
    ///
    /// Descriptors are sorted by id; duplicates collapse to one column.
    ///
    /// ## Panics
    /// Panics if `entities_per_chunk` is zero.
    pub fn new(mut components: Vec<ComponentDesc>, entities_per_chunk: usize) -> Self {
        assert!(entities_per_chunk > 0, "entities_per_chunk must be non-zero");
        components.sort_by_key(|desc| desc.component_id);
        components.dedup_by_key(|desc| desc.component_id);

        let mut signature = Signature::default();
        let mut offsets = Vec::with_capacity(components.len());
        let mut cursor = 0usize;
        for desc in &components {
            signature.set(desc.component_id);
            cursor = align_up(cursor, desc.align);
            offsets.push(cursor);
            cursor += desc.size * entities_per_chunk;
        }

        Self {
            signature,
            components,
            offsets,
            entities_per_chunk,
            chunk_bytes: cursor,
        }
    }

    /// Layout with no components.
    pub fn empty(entities_per_chunk: usize) -> Self {
        Self::new(Vec::new(), entities_per_chunk)
    }

    /// Component set of this layout.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Column descriptors, in column order.
    #[inline]
    pub fn components(&self) -> &[ComponentDesc] {
        &self.components
    }

    /// Number of columns.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` for the empty component set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Rows per chunk this geometry was computed for.
    #[inline]
    pub fn entities_per_chunk(&self) -> usize {
        self.entities_per_chunk
    }

    /// Size in bytes of one chunk's backing buffer.
    #[inline]
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Returns `true` if `component_id` is part of this layout.
    #[inline]
    pub fn contains(&self, component_id: ComponentID) -> bool {
        self.signature.has(component_id)
    }

    /// Column index of `component_id`.
    #[inline]
    pub fn index_of(&self, component_id: ComponentID) -> Option<usize> {
        if !self.signature.has(component_id) {
            return None;
        }
        self.components
            .binary_search_by_key(&component_id, |desc| desc.component_id)
            .ok()
    }

    /// Column index of the component with the given runtime type.
    #[inline]
    pub fn index_of_type(&self, type_id: TypeId) -> Option<usize> {
        self.components.iter().position(|desc| desc.type_id == type_id)
    }

    /// Byte offset of the column for `component_id`.
    pub fn offset_of(&self, component_id: ComponentID) -> Option<usize> {
        self.index_of(component_id).map(|index| self.offsets[index])
    }

    /// Distance in bytes between two consecutive rows of `component_id`.
    pub fn stride_of(&self, component_id: ComponentID) -> Option<usize> {
        self.index_of(component_id).map(|index| self.components[index].size)
    }

    /// Byte address of `(component_id, row)` relative to the chunk start.
    pub fn byte_offset(&self, component_id: ComponentID, row: RowID) -> Option<usize> {
        if row as usize >= self.entities_per_chunk {
            return None;
        }
        let index = self.index_of(component_id)?;
        Some(self.offsets[index] + row as usize * self.components[index].size)
    }
}
