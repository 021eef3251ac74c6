use std::mem::{align_of, size_of};
use std::sync::Arc;

use chunk_ecs::engine::component::Components;
use chunk_ecs::engine::layout::ComponentLayout;
use chunk_ecs::engine::storage::Chunk;
use chunk_ecs::engine::types::{build_signature, ComponentID};
use chunk_ecs::{Component, Entity};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Clone, Copy, Debug, PartialEq)]
struct A(u64);
impl Component for A {}

#[derive(Clone, Copy, Debug, PartialEq)]
struct B(u8);
impl Component for B {}

fn registry() -> (Components, ComponentID, ComponentID, ComponentID) {
    let mut components = Components::new();
    // register out of id order on purpose: B first
    let b = components.register::<B>();
    let position = components.register::<Position>();
    let a = components.register::<A>();
    (components, b, position, a)
}

fn layout(rows: usize) -> (ComponentLayout, ComponentID, ComponentID, ComponentID) {
    let (components, b, position, a) = registry();
    let layout = components.layout_for(&build_signature(&[a, position, b]), rows);
    (layout, b, position, a)
}

#[test]
fn columns_are_sorted_by_component_id() {
    let (layout, b, position, a) = layout(8);
    let ids: Vec<ComponentID> = layout.components().iter().map(|desc| desc.component_id).collect();
    assert_eq!(ids, vec![b, position, a]);
    assert_eq!(layout.index_of(b), Some(0));
    assert_eq!(layout.index_of(a), Some(2));
    assert_eq!(layout.len(), 3);
}

#[test]
fn column_offsets_are_aligned_and_non_overlapping() {
    let rows = 7;
    let (layout, b, position, a) = layout(rows);

    let mut previous_end = 0;
    for (id, size, align) in [
        (b, size_of::<B>(), align_of::<B>()),
        (position, size_of::<Position>(), align_of::<Position>()),
        (a, size_of::<A>(), align_of::<A>()),
    ] {
        let offset = layout.offset_of(id).unwrap();
        assert_eq!(offset % align, 0, "column {id} is misaligned");
        assert!(offset >= previous_end, "column {id} overlaps the previous one");
        assert_eq!(layout.stride_of(id), Some(size));
        previous_end = offset + size * rows;
    }
    assert_eq!(layout.chunk_bytes(), previous_end);
}

#[test]
fn byte_offsets_follow_row_stride() {
    let rows = 16;
    let (layout, _, position, _) = layout(rows);
    let base = layout.offset_of(position).unwrap();
    for row in 0..rows as u32 {
        assert_eq!(
            layout.byte_offset(position, row),
            Some(base + row as usize * size_of::<Position>()),
            "row {row} not at expected byte offset"
        );
    }
    assert_eq!(layout.byte_offset(position, rows as u32), None);
}

#[test]
fn empty_layout_has_no_bytes() {
    let layout = ComponentLayout::empty(32);
    assert!(layout.is_empty());
    assert_eq!(layout.chunk_bytes(), 0);
    assert_eq!(layout.entities_per_chunk(), 32);
}

#[test]
fn chunk_column_is_contiguous() {
    let rows = 8;
    let (components, _, position, _) = registry();
    let layout = Arc::new(components.layout_for(&build_signature(&[position]), rows));
    let mut chunk = Chunk::new(layout);

    for i in 0..rows {
        let row = chunk.add_entity(Entity::new(i as u32, 0)).unwrap();
        chunk.insert_component(row, Position { x: i as f32, y: 0.0 }, 1).unwrap();
    }
    assert!(chunk.is_full());
    assert!(chunk.add_entity(Entity::new(99, 0)).is_none());

    let first = chunk.get::<Position>(0).map(|p| &*p as *const Position as usize).unwrap();
    for i in 1..rows as u32 {
        let address = chunk.get::<Position>(i).map(|p| &*p as *const Position as usize).unwrap();
        assert_eq!(address, first + i as usize * size_of::<Position>(), "row {i} is not contiguous");
    }
}
