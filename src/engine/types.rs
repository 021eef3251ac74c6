//! Core ECS Types, Identifiers, and Bitsets
//!
//! This module defines the **identifiers, capacities, and signatures** shared
//! by every other part of the engine: storage, queries, and the scheduler.
//!
//! ## Design Philosophy
//!
//! - **Small, copyable identifiers** for archetypes, chunks, rows, and
//!   component/resource types.
//! - **Fixed-size bitsets** ([`Signature`]) for component sets, so archetype
//!   identity and query matching reduce to word-wise bit operations.
//! - **Explicit access declaration** ([`AccessSets`]) so the scheduler can
//!   decide which systems may run side by side without runtime bookkeeping.
//!
//! ## Ticks
//!
//! A [`Tick`] timestamps component and resource writes. The world tick starts
//! at [`FIRST_TICK`]; the value [`NEVER_TICK`] is reserved and means "never
//! written".
//!
//! This module contains no unsafe code.

/// Simulation tick counter used for change detection.
pub type Tick = u64;

/// Reserved tick value meaning "never written".
pub const NEVER_TICK: Tick = 0;

/// First tick handed out by a fresh world.
pub const FIRST_TICK: Tick = 1;

/// Unique identifier for an archetype (one component set).
pub type ArchetypeID = u32;
/// Chunk index within an archetype.
pub type ChunkID = u32;
/// Row index within a chunk.
pub type RowID = u32;

/// Index part of an entity handle.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Maximum number of rows per chunk.
pub const CHUNK_CAP: usize = 16_384;

/// Default number of rows per chunk when no configuration is given.
pub const DEFAULT_ENTITIES_PER_CHUNK: usize = 128;

/// Unique identifier for a component type within one world.
pub type ComponentID = u16;

/// Unique identifier for a resource type within one world.
pub type ResourceID = u16;

/// Maximum number of registered component (and resource) types per world.
pub const COMPONENT_CAP: usize = 1024;

/// Number of `u64` words required to represent a full signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Bitset representing a set of component (or resource) ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            components: [0u64; SIGNATURE_SIZE],
        }
    }
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        for (component_a, component_b) in self.components.iter().zip(signature.components.iter()) {
            if (component_a & component_b) != *component_b { return false; }
        }
        true
    }

    /// Returns `true` if the two signatures share at least one bit.
    #[inline]
    pub fn intersects(&self, other: &Signature) -> bool {
        self.components
            .iter()
            .zip(other.components.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|word| *word == 0)
    }

    /// Number of set bits.
    #[inline]
    pub fn count(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all ids set in this signature, in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }
}

/// Builds a signature from a list of ids.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    let mut signature = Signature::default();
    for &component_id in component_ids { signature.set(component_id); }
    signature
}

/// Access mode for a component or resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Exclusive write access.
    Write,
}

/// Declares the component and resource access of a system.
///
/// Two systems may run concurrently iff neither one's write set intersects
/// the other's read or write set, for components and resources alike.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read.
    pub read: Signature,
    /// Components written.
    pub write: Signature,
    /// Resources read.
    pub resource_read: Signature,
    /// Resources written.
    pub resource_write: Signature,
}

impl AccessSets {
    /// Records a component access.
    #[inline]
    pub fn add_component(&mut self, component_id: ComponentID, mode: AccessMode) {
        match mode {
            AccessMode::Read => self.read.set(component_id),
            AccessMode::Write => self.write.set(component_id),
        }
    }

    /// Records a resource access.
    #[inline]
    pub fn add_resource(&mut self, resource_id: ResourceID, mode: AccessMode) {
        match mode {
            AccessMode::Read => self.resource_read.set(resource_id),
            AccessMode::Write => self.resource_write.set(resource_id),
        }
    }

    /// Merges another access set into this one.
    pub fn extend(&mut self, other: &AccessSets) {
        for (a, b) in self.read.components.iter_mut().zip(other.read.components.iter()) { *a |= b; }
        for (a, b) in self.write.components.iter_mut().zip(other.write.components.iter()) { *a |= b; }
        for (a, b) in self.resource_read.components.iter_mut().zip(other.resource_read.components.iter()) { *a |= b; }
        for (a, b) in self.resource_write.components.iter_mut().zip(other.resource_write.components.iter()) { *a |= b; }
    }

    /// Returns `true` if this access set conflicts with another.
    #[inline]
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        // Conflicts if: (W ∩ W) or (W ∩ R) or (R ∩ W)
        self.write.intersects(&other.write)
            || self.write.intersects(&other.read)
            || self.read.intersects(&other.write)
            || self.resource_write.intersects(&other.resource_write)
            || self.resource_write.intersects(&other.resource_read)
            || self.resource_read.intersects(&other.resource_write)
    }

    /// Returns `true` if nothing is accessed.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty()
            && self.write.is_empty()
            && self.resource_read.is_empty()
            && self.resource_write.is_empty()
    }
}
