//! # Archetypes
//!
//! An [`Archetype`] is the storage group for one component set: an id, its
//! [`Signature`], and the [`Chunks`] holding every entity with exactly that
//! set. [`Archetypes`] indexes them by signature.
//!
//! ## Invariants
//! - Archetype `0` is the empty component set and always exists.
//! - At most one archetype exists per signature.
//! - Archetype ids are dense and never reused while the world lives; clearing
//!   the world empties archetypes without removing them, so query caches that
//!   hold archetype ids stay valid.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::engine::chunks::Chunks;
use crate::engine::component::Components;
use crate::engine::layout::ComponentLayout;
use crate::engine::types::{ArchetypeID, Signature};

/// Storage group for one component set.
pub struct Archetype {
    archetype_id: ArchetypeID,
    signature: Signature,
    chunks: Chunks,
}

impl Archetype {
    /// Creates an empty archetype for `layout`.
    pub fn new(archetype_id: ArchetypeID, layout: ComponentLayout) -> Self {
        Self {
            archetype_id,
            signature: *layout.signature(),
            chunks: Chunks::new(Arc::new(layout)),
        }
    }

    /// Returns the archetype's id.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Returns the component signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns `true` if the archetype holds every component in `need`.
    #[inline]
    pub fn matches_all(&self, need: &Signature) -> bool {
        self.signature.contains_all(need)
    }

    /// Number of stored entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.entity_count()
    }

    /// Returns `true` if no entity is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Row storage.
    #[inline]
    pub fn chunks(&self) -> &Chunks {
        &self.chunks
    }

    /// Row storage, mutably.
    #[inline]
    pub fn chunks_mut(&mut self) -> &mut Chunks {
        &mut self.chunks
    }
}

/// Archetype table of a world.
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeID>,
}

/// Id of the empty archetype.
pub const EMPTY_ARCHETYPE: ArchetypeID = 0;

impl Archetypes {
    /// Creates the table with the empty archetype.
    pub fn new(entities_per_chunk: usize) -> Self {
        let empty = ComponentLayout::empty(entities_per_chunk);
        let mut by_signature = HashMap::new();
        by_signature.insert(*empty.signature(), EMPTY_ARCHETYPE);
        Self {
            archetypes: vec![Archetype::new(EMPTY_ARCHETYPE, empty)],
            by_signature,
        }
    }

    /// Number of archetypes, the empty one included.
    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Always `false`: the empty archetype exists from construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Archetype by id.
    #[inline]
    pub fn get(&self, archetype_id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(archetype_id as usize)
    }

    /// Archetype by id, mutably.
    #[inline]
    pub fn get_mut(&mut self, archetype_id: ArchetypeID) -> Option<&mut Archetype> {
        self.archetypes.get_mut(archetype_id as usize)
    }

    /// Archetype id for `signature`, if it exists.
    #[inline]
    pub fn find(&self, signature: &Signature) -> Option<ArchetypeID> {
        self.by_signature.get(signature).copied()
    }

    /// All archetypes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// All archetypes in id order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.archetypes.iter_mut()
    }

    /// Returns the archetype for `signature`, creating it if needed.
    pub fn get_or_create(
        &mut self,
        signature: Signature,
        components: &Components,
        entities_per_chunk: usize,
    ) -> ArchetypeID {
        if let Some(&archetype_id) = self.by_signature.get(&signature) {
            return archetype_id;
        }
        let archetype_id = self.archetypes.len() as ArchetypeID;
        let layout = components.layout_for(&signature, entities_per_chunk);
        debug!(archetype_id, components = layout.len(), chunk_bytes = layout.chunk_bytes(), "created archetype");
        self.archetypes.push(Archetype::new(archetype_id, layout));
        self.by_signature.insert(signature, archetype_id);
        archetype_id
    }

    /// Borrows two distinct archetypes mutably.
    ///
    /// ## Panics
    /// Panics if `a == b` or either id is out of range.
    pub fn get_pair_mut(&mut self, a: ArchetypeID, b: ArchetypeID) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "cannot borrow the same archetype twice");
        let (a, b) = (a as usize, b as usize);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Empties every archetype. Archetypes and chunk allocations are kept.
    pub fn clear(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.chunks.clear();
        }
    }
}
