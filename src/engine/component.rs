//! # Component Registry and Bundles
//!
//! This module assigns compact [`ComponentID`] values to Rust component types
//! and keeps, for each one, a [`ComponentDesc`]: a small vtable-like record
//! (size, alignment, drop requirement, and a factory for empty column
//! storage). Chunks stay type-erased and bind typed accessors on top through
//! these descriptors.
//!
//! ## Design
//! - The registry ([`Components`]) is owned by a `World`. Two worlds may
//!   assign different ids to the same type.
//! - Types are registered lazily the first time a world sees them (spawn,
//!   insert, or a query/system declaring them).
//! - A component may declare *required components*: inserting it also inserts
//!   the required ones when the entity lacks them.
//!
//! ## Invariants
//! - `ComponentID` values are dense, unique, and stable for the world's life.
//! - Every registered id has a descriptor and a storage factory.
//!
//! ## Bundles
//! [`Bundle`] groups heterogeneous component values for spawning and
//! insertion. Anything implementing [`IntoBundle`] (a single component, a
//! tuple of bundles, `()`, or a `Bundle`) can be passed where a bundle is
//! expected.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::{align_of, needs_drop, size_of},
    sync::Arc,
};

use crate::engine::layout::ComponentLayout;
use crate::engine::storage::{Column, TypeErasedColumn};
use crate::engine::types::{ComponentID, Signature, COMPONENT_CAP};

/// Marker trait for values stored in entity columns.
///
/// Implement it explicitly for each component type:
///
/// ```ignore
/// struct Position { x: f32, y: f32 }
/// impl Component for Position {}
/// ```
pub trait Component: Send + Sync + 'static {}

/// Factory function for constructing an empty type-erased column with the
/// given row capacity.
pub type ColumnFactory = fn(usize) -> Box<dyn TypeErasedColumn>;

fn new_column<T: Component>(capacity: usize) -> Box<dyn TypeErasedColumn> {
    Box::new(Column::<T>::with_capacity(capacity))
}

/// Metadata describing a registered component type.
#[derive(Clone, Copy, Debug)]
pub struct ComponentDesc {
    /// Id assigned by the owning registry.
    pub component_id: ComponentID,
    /// Rust type name, for diagnostics.
    pub name: &'static str,
    /// Runtime type identity.
    pub type_id: TypeId,
    /// `size_of::<T>()`.
    pub size: usize,
    /// `align_of::<T>()`.
    pub align: usize,
    /// Whether dropping a value runs code.
    pub needs_drop: bool,
    factory: ColumnFactory,
}

impl ComponentDesc {
    /// Builds a descriptor for `T` with the given id.
    pub fn of<T: Component>(component_id: ComponentID) -> Self {
        Self {
            component_id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            needs_drop: needs_drop::<T>(),
            factory: new_column::<T>,
        }
    }

    /// Allocates an empty column for this component.
    #[inline]
    pub fn new_column(&self, capacity: usize) -> Box<dyn TypeErasedColumn> {
        (self.factory)(capacity)
    }
}

type RequiredConstructor = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// A component inserted automatically alongside another one.
#[derive(Clone)]
pub(crate) struct RequiredComponent {
    pub(crate) component_id: ComponentID,
    constructor: RequiredConstructor,
}

/// World-owned mapping between Rust types and [`ComponentID`]s.
#[derive(Default)]
pub struct Components {
    by_type: HashMap<TypeId, ComponentID>,
    descs: Vec<ComponentDesc>,
    required: HashMap<ComponentID, Vec<RequiredComponent>>,
}

impl Components {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` and returns its id. Idempotent.
    ///
    /// ## Panics
    /// Panics if more than [`COMPONENT_CAP`] types are registered.
    pub fn register<T: Component>(&mut self) -> ComponentID {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }
        assert!(self.descs.len() < COMPONENT_CAP, "Exceeded configured component capacity.");
        let id = self.descs.len() as ComponentID;
        self.by_type.insert(type_id, id);
        self.descs.push(ComponentDesc::of::<T>(id));
        id
    }

    /// Returns the id of `T`, if registered.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.id_of_type_id(TypeId::of::<T>())
    }

    /// Returns the id registered for a runtime type, if any.
    #[inline]
    pub fn id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the descriptor for `component_id`.
    #[inline]
    pub fn desc(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.descs.get(component_id as usize)
    }

    /// Number of registered component types.
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Returns `true` if no type has been registered.
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Builds the layout for the component set described by `signature`.
    pub fn layout_for(&self, signature: &Signature, entities_per_chunk: usize) -> ComponentLayout {
        let descs = signature
            .iterate_over_components()
            .filter_map(|component_id| self.desc(component_id).copied())
            .collect();
        ComponentLayout::new(descs, entities_per_chunk)
    }

    /// Declares that inserting `T` also inserts `R` (built by `constructor`)
    /// when the entity does not already have an `R`.
    ///
    /// Registering the same pair again replaces the constructor.
    pub fn register_required<T, R, F>(&mut self, constructor: F)
    where
        T: Component,
        R: Component,
        F: Fn() -> R + Send + Sync + 'static,
    {
        let owner = self.register::<T>();
        let component_id = self.register::<R>();
        let constructor: RequiredConstructor = Arc::new(move || Box::new(constructor()));
        let list = self.required.entry(owner).or_default();
        list.retain(|required| required.component_id != component_id);
        list.push(RequiredComponent { component_id, constructor });
    }

    /// Registers every type in `bundle` and resolves it into `(id, value)`
    /// pairs, appending required components that neither the bundle nor
    /// `existing` provide. Later duplicates in the bundle win.
    pub(crate) fn resolve_bundle(
        &mut self,
        bundle: Bundle,
        existing: &Signature,
    ) -> Vec<(ComponentID, Box<dyn Any + Send>)> {
        let mut values: Vec<(ComponentID, Box<dyn Any + Send>)> = Vec::with_capacity(bundle.len());
        for entry in bundle.entries {
            let component_id = (entry.register)(self);
            match values.iter_mut().find(|(id, _)| *id == component_id) {
                Some(slot) => slot.1 = entry.value,
                None => values.push((component_id, entry.value)),
            }
        }

        // transitive closure over required components
        let mut index = 0;
        while index < values.len() {
            let owner = values[index].0;
            if let Some(required) = self.required.get(&owner) {
                for requirement in required {
                    let present = existing.has(requirement.component_id)
                        || values.iter().any(|(id, _)| *id == requirement.component_id);
                    if !present {
                        values.push((requirement.component_id, (requirement.constructor)()));
                    }
                }
            }
            index += 1;
        }
        values
    }
}

struct BundleEntry {
    type_id: TypeId,
    register: fn(&mut Components) -> ComponentID,
    value: Box<dyn Any + Send>,
}

/// Type-erased list of component values.
#[derive(Default)]
pub struct Bundle {
    entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds a component value, builder style.
    #[inline]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Adds a component value.
    #[inline]
    pub fn insert<T: Component>(&mut self, value: T) {
        self.entries.push(BundleEntry {
            type_id: TypeId::of::<T>(),
            register: Components::register::<T>,
            value: Box::new(value),
        });
    }

    /// Appends every value of `other`.
    pub fn extend(&mut self, other: Bundle) {
        self.entries.extend(other.entries);
    }

    /// Returns `true` if a value of type `T` is present.
    pub fn contains<T: Component>(&self) -> bool {
        let type_id = TypeId::of::<T>();
        self.entries.iter().any(|entry| entry.type_id == type_id)
    }

    /// Number of stored values (duplicates included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no value is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Conversion into a [`Bundle`].
pub trait IntoBundle: Send + 'static {
    /// Appends the values of `self` to `bundle`.
    fn write_into(self, bundle: &mut Bundle);

    /// Collects `self` into a fresh bundle.
    fn into_bundle(self) -> Bundle
    where
        Self: Sized,
    {
        let mut bundle = Bundle::new();
        self.write_into(&mut bundle);
        bundle
    }
}

impl<C: Component> IntoBundle for C {
    fn write_into(self, bundle: &mut Bundle) {
        bundle.insert(self);
    }
}

impl IntoBundle for Bundle {
    fn write_into(self, bundle: &mut Bundle) {
        bundle.extend(self);
    }

    fn into_bundle(self) -> Bundle {
        self
    }
}

impl IntoBundle for () {
    fn write_into(self, _bundle: &mut Bundle) {}
}

macro_rules! impl_into_bundle_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoBundle),+> IntoBundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn write_into(self, bundle: &mut Bundle) {
                let ($($name,)+) = self;
                $($name.write_into(bundle);)+
            }
        }
    };
}

impl_into_bundle_for_tuple!(A);
impl_into_bundle_for_tuple!(A, B);
impl_into_bundle_for_tuple!(A, B, C);
impl_into_bundle_for_tuple!(A, B, C, D);
impl_into_bundle_for_tuple!(A, B, C, D, E);
impl_into_bundle_for_tuple!(A, B, C, D, E, F);
impl_into_bundle_for_tuple!(A, B, C, D, E, F, G);
impl_into_bundle_for_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    struct Health(u32);
    impl Component for Health {}

    struct Armor(u32);
    impl Component for Armor {}

    struct Shield;
    impl Component for Shield {}

    #[test]
    fn registration_is_idempotent() {
        let mut components = Components::new();
        let a = components.register::<Health>();
        let b = components.register::<Armor>();
        assert_ne!(a, b);
        assert_eq!(components.register::<Health>(), a);
        assert_eq!(components.id_of::<Armor>(), Some(b));
        assert_eq!(components.desc(a).map(|d| d.size), Some(4));
    }

    #[test]
    fn later_bundle_values_win() {
        let mut components = Components::new();
        let bundle = (Health(1), Health(7)).into_bundle();
        let values = components.resolve_bundle(bundle, &Signature::default());
        assert_eq!(values.len(), 1);
        let health = values[0].1.downcast_ref::<Health>().map(|h| h.0);
        assert_eq!(health, Some(7));
    }

    #[test]
    fn required_components_resolve_transitively() {
        let mut components = Components::new();
        components.register_required::<Health, Armor, _>(|| Armor(3));
        components.register_required::<Armor, Shield, _>(|| Shield);

        let values = components.resolve_bundle((Health(10),).into_bundle(), &Signature::default());
        assert_eq!(values.len(), 3);

        // already present on the entity: nothing added
        let mut existing = Signature::default();
        existing.set(components.register::<Armor>());
        let values = components.resolve_bundle(Health(10).into_bundle(), &existing);
        assert_eq!(values.len(), 1);
    }
}
