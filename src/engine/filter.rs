//! # Query Filters
//!
//! Filters decide *which* entities a query visits without changing *what*
//! it yields. They come in two flavours:
//!
//! - **archetypal** filters ([`With`], [`Without`] and combinations of them)
//!   depend only on the component set, so they are evaluated once per
//!   archetype when the query is updated;
//! - **row** filters ([`Changed`]) inspect per-slot change ticks and are
//!   evaluated for every visited row.
//!
//! Combinators: [`And`], [`Or`], [`Not`]. A tuple of filters is an implicit
//! `And`; `()` accepts everything.
//!
//! ```ignore
//! // entities with Position, and either Velocity or a changed Mass
//! type Moving = (With<Position>, Or<With<Velocity>, Changed<Mass>>);
//! let query = Query::<Entity, Moving>::new();
//! ```

use std::marker::PhantomData;

use crate::engine::component::{Component, Components};
use crate::engine::storage::Chunk;
use crate::engine::types::{AccessMode, AccessSets, ComponentID, Signature, Tick};

/// Presence or change predicate over entities.
pub trait QueryFilter {
    /// Resolved component ids.
    type State: Copy + Send + Sync + 'static;

    /// `true` if [`QueryFilter::matches_row`] always returns `true` on
    /// archetypes accepted by [`QueryFilter::matches_archetype`].
    const IS_ARCHETYPAL: bool;

    /// Registers every component type the filter names.
    fn register(components: &mut Components);

    /// Resolves component ids. Unregistered types resolve to `None`.
    fn init_state(components: &Components) -> Self::State;

    /// Adds the filter's component reads to `access`.
    fn update_access(state: &Self::State, access: &mut AccessSets);

    /// Archetype-level test.
    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool;

    /// Row-level test on a chunk of an accepted archetype.
    fn matches_row(state: &Self::State, chunk: &Chunk, row: usize, last_run: Tick) -> bool;
}

/// Accepts entities that have `T`.
pub struct With<T>(PhantomData<fn() -> T>);

/// Accepts entities that lack `T`.
pub struct Without<T>(PhantomData<fn() -> T>);

/// Accepts entities whose `T` was written after the query's last run.
///
/// Spawning, inserting, and mutable access through `Mut`, `ComponentMut` or
/// `World::get_mut` all count as writes. Reading ticks takes no column lock.
pub struct Changed<T>(PhantomData<fn() -> T>);

/// Accepts entities matching both filters.
pub struct And<A, B>(PhantomData<fn() -> (A, B)>);

/// Accepts entities matching either filter.
pub struct Or<A, B>(PhantomData<fn() -> (A, B)>);

/// Accepts entities the inner filter rejects.
pub struct Not<F>(PhantomData<fn() -> F>);

impl<T: Component> QueryFilter for With<T> {
    type State = Option<ComponentID>;
    const IS_ARCHETYPAL: bool = true;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Self::State {
        components.id_of::<T>()
    }

    fn update_access(_state: &Self::State, _access: &mut AccessSets) {}

    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
        state.is_some_and(|id| signature.has(id))
    }

    fn matches_row(_state: &Self::State, _chunk: &Chunk, _row: usize, _last_run: Tick) -> bool {
        true
    }
}

impl<T: Component> QueryFilter for Without<T> {
    type State = Option<ComponentID>;
    const IS_ARCHETYPAL: bool = true;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Self::State {
        components.id_of::<T>()
    }

    fn update_access(_state: &Self::State, _access: &mut AccessSets) {}

    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
        state.map_or(true, |id| !signature.has(id))
    }

    fn matches_row(_state: &Self::State, _chunk: &Chunk, _row: usize, _last_run: Tick) -> bool {
        true
    }
}

impl<T: Component> QueryFilter for Changed<T> {
    type State = Option<ComponentID>;
    const IS_ARCHETYPAL: bool = false;

    fn register(components: &mut Components) {
        components.register::<T>();
    }

    fn init_state(components: &Components) -> Self::State {
        components.id_of::<T>()
    }

    fn update_access(state: &Self::State, access: &mut AccessSets) {
        if let Some(id) = state {
            access.add_component(*id, AccessMode::Read);
        }
    }

    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
        state.is_some_and(|id| signature.has(id))
    }

    fn matches_row(state: &Self::State, chunk: &Chunk, row: usize, last_run: Tick) -> bool {
        state
            .and_then(|id| chunk.column_index(id))
            .is_some_and(|index| chunk.tick_at(index, row) > last_run)
    }
}

impl<A: QueryFilter, B: QueryFilter> QueryFilter for And<A, B> {
    type State = (A::State, B::State);
    const IS_ARCHETYPAL: bool = A::IS_ARCHETYPAL && B::IS_ARCHETYPAL;

    fn register(components: &mut Components) {
        A::register(components);
        B::register(components);
    }

    fn init_state(components: &Components) -> Self::State {
        (A::init_state(components), B::init_state(components))
    }

    fn update_access(state: &Self::State, access: &mut AccessSets) {
        A::update_access(&state.0, access);
        B::update_access(&state.1, access);
    }

    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
        A::matches_archetype(&state.0, signature) && B::matches_archetype(&state.1, signature)
    }

    fn matches_row(state: &Self::State, chunk: &Chunk, row: usize, last_run: Tick) -> bool {
        A::matches_row(&state.0, chunk, row, last_run) && B::matches_row(&state.1, chunk, row, last_run)
    }
}

impl<A: QueryFilter, B: QueryFilter> QueryFilter for Or<A, B> {
    type State = (A::State, B::State);
    const IS_ARCHETYPAL: bool = A::IS_ARCHETYPAL && B::IS_ARCHETYPAL;

    fn register(components: &mut Components) {
        A::register(components);
        B::register(components);
    }

    fn init_state(components: &Components) -> Self::State {
        (A::init_state(components), B::init_state(components))
    }

    fn update_access(state: &Self::State, access: &mut AccessSets) {
        A::update_access(&state.0, access);
        B::update_access(&state.1, access);
    }

    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
        A::matches_archetype(&state.0, signature) || B::matches_archetype(&state.1, signature)
    }

    // one side may only match at archetype level, so each branch re-checks it
    fn matches_row(state: &Self::State, chunk: &Chunk, row: usize, last_run: Tick) -> bool {
        let signature = chunk.layout().signature();
        (A::matches_archetype(&state.0, signature) && A::matches_row(&state.0, chunk, row, last_run))
            || (B::matches_archetype(&state.1, signature) && B::matches_row(&state.1, chunk, row, last_run))
    }
}

impl<F: QueryFilter> QueryFilter for Not<F> {
    type State = F::State;
    const IS_ARCHETYPAL: bool = F::IS_ARCHETYPAL;

    fn register(components: &mut Components) {
        F::register(components);
    }

    fn init_state(components: &Components) -> Self::State {
        F::init_state(components)
    }

    fn update_access(state: &Self::State, access: &mut AccessSets) {
        F::update_access(state, access);
    }

    fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
        if F::IS_ARCHETYPAL {
            !F::matches_archetype(state, signature)
        } else {
            true
        }
    }

    fn matches_row(state: &Self::State, chunk: &Chunk, row: usize, last_run: Tick) -> bool {
        if F::IS_ARCHETYPAL {
            true
        } else {
            !(F::matches_archetype(state, chunk.layout().signature()) && F::matches_row(state, chunk, row, last_run))
        }
    }
}

impl QueryFilter for () {
    type State = ();
    const IS_ARCHETYPAL: bool = true;

    fn register(_components: &mut Components) {}
    fn init_state(_components: &Components) -> Self::State {}
    fn update_access(_state: &Self::State, _access: &mut AccessSets) {}

    fn matches_archetype(_state: &Self::State, _signature: &Signature) -> bool {
        true
    }

    fn matches_row(_state: &Self::State, _chunk: &Chunk, _row: usize, _last_run: Tick) -> bool {
        true
    }
}

macro_rules! impl_query_filter_for_tuple {
    ($(($name:ident, $index:tt)),+) => {
        impl<$($name: QueryFilter),+> QueryFilter for ($($name,)+) {
            type State = ($($name::State,)+);
            const IS_ARCHETYPAL: bool = true $(&& $name::IS_ARCHETYPAL)+;

            fn register(components: &mut Components) {
                $($name::register(components);)+
            }

            fn init_state(components: &Components) -> Self::State {
                ($($name::init_state(components),)+)
            }

            fn update_access(state: &Self::State, access: &mut AccessSets) {
                $($name::update_access(&state.$index, access);)+
            }

            fn matches_archetype(state: &Self::State, signature: &Signature) -> bool {
                true $(&& $name::matches_archetype(&state.$index, signature))+
            }

            fn matches_row(state: &Self::State, chunk: &Chunk, row: usize, last_run: Tick) -> bool {
                true $(&& $name::matches_row(&state.$index, chunk, row, last_run))+
            }
        }
    };
}

impl_query_filter_for_tuple!((A, 0));
impl_query_filter_for_tuple!((A, 0), (B, 1));
impl_query_filter_for_tuple!((A, 0), (B, 1), (C, 2));
impl_query_filter_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
impl_query_filter_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_query_filter_for_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
