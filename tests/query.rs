use std::collections::HashSet;

use chunk_ecs::engine::error::InvalidAccessReason;
use chunk_ecs::prelude::*;
use chunk_ecs::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq)]
struct A(u32);
impl Component for A {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct B(u32);
impl Component for B {}

#[derive(Debug, Clone, Copy, PartialEq)]
struct C(u32);
impl Component for C {}

/// 4 entities with {A}, 3 with {A, B}, 2 with {B}, 1 with {C}.
fn populated() -> (World, Vec<Entity>) {
    let mut world = World::new();
    let mut entities = Vec::new();
    for i in 0..4 {
        entities.push(world.spawn(A(i)));
    }
    for i in 0..3 {
        entities.push(world.spawn((A(10 + i), B(i))));
    }
    for i in 0..2 {
        entities.push(world.spawn(B(20 + i)));
    }
    entities.push(world.spawn(C(0)));
    (world, entities)
}

#[test]
fn count_matches_component_superset() {
    let (mut world, _) = populated();
    assert_eq!(world.query::<&A>().count(&world), 7);
    assert_eq!(world.query::<&B>().count(&world), 5);
    assert_eq!(world.query::<(Entity, &A, &B)>().count(&world), 3);
    assert_eq!(world.query::<Entity>().count(&world), 10);
}

#[test]
fn removing_a_component_drops_the_entity_after_update() {
    let (mut world, entities) = populated();
    let mut query = world.query::<(Entity, &A, &B)>();
    assert_eq!(query.count(&world), 3);

    let target = entities[4];
    world.remove::<B>(target).unwrap();
    query.update(&world);
    assert_eq!(query.count(&world), 2);
    assert!(!query.entities(&world).contains(&target));
}

#[test]
fn stale_query_does_not_see_new_archetypes() {
    let (mut world, entities) = populated();
    let mut query = world.query::<&C>();
    assert_eq!(query.count(&world), 1);

    world.insert(entities[0], C(5)).unwrap();
    assert_eq!(query.count(&world), 1);
    query.update(&world);
    assert_eq!(query.count(&world), 2);
}

#[test]
fn never_updated_query_is_empty() {
    let (world, _) = populated();
    let query = Query::<&A>::new();
    assert!(query.is_empty(&world));
    assert!(query.entities(&world).is_empty());
}

#[test]
fn filters_combine() {
    let (mut world, _) = populated();

    assert_eq!(world.query_filtered::<Entity, And<With<A>, With<B>>>().count(&world), 3);
    assert_eq!(world.query_filtered::<Entity, Or<With<A>, With<B>>>().count(&world), 9);
    assert_eq!(world.query_filtered::<Entity, Without<A>>().count(&world), 3);
    assert_eq!(world.query_filtered::<&A, Without<B>>().count(&world), 4);
    assert_eq!(world.query_filtered::<Entity, (With<A>, With<B>)>().count(&world), 3);
    assert_eq!(world.query_filtered::<Entity, Not<Or<With<A>, With<B>>>>().count(&world), 1);
}

#[test]
fn filters_do_not_change_the_yielded_data() {
    let (mut world, _) = populated();
    let query = world.query_filtered::<&A, With<B>>();
    let mut values = Vec::new();
    query.for_each(&world, |a: &A| values.push(a.0));
    values.sort_unstable();
    assert_eq!(values, vec![10, 11, 12]);
}

#[test]
fn optional_components_yield_none_when_absent() {
    let (mut world, _) = populated();
    let query = world.query::<(&A, Option<&B>)>();
    let mut with_b = 0;
    let mut without_b = 0;
    query.for_each(&world, |(_, b): (&A, Option<&B>)| match b {
        Some(_) => with_b += 1,
        None => without_b += 1,
    });
    assert_eq!((with_b, without_b), (3, 4));
}

#[test]
fn mutable_access_writes_through() {
    let (mut world, entities) = populated();
    let query = world.query::<(&mut A, Option<&B>)>();
    query.for_each(&world, |(mut a, b): (Mut<A>, Option<&B>)| {
        a.0 += b.map_or(100, |b| b.0);
    });

    assert_eq!(world.get::<A>(entities[0]).map(|a| a.0), Some(100));
    assert_eq!(world.get::<A>(entities[5]).map(|a| a.0), Some(12));
}

#[test]
fn optional_mutable_access() {
    let (mut world, entities) = populated();
    let query = world.query::<(&B, Option<&mut A>)>();
    query.for_each(&world, |(b, a): (&B, Option<Mut<A>>)| {
        if let Some(mut a) = a {
            a.0 = b.0;
        }
    });
    assert_eq!(world.get::<A>(entities[6]).map(|a| a.0), Some(2));
    assert_eq!(world.get::<B>(entities[7]).map(|b| b.0), Some(20));
}

#[test]
fn iteration_follows_insertion_order_within_a_chunk() {
    let mut world = World::new();
    let spawned: Vec<Entity> = (0..20).map(|i| world.spawn(A(i))).collect();
    let query = world.query::<Entity>();
    assert_eq!(query.entities(&world), spawned);

    let mut seen = Vec::new();
    query.for_each(&world, |e: Entity| seen.push(e));
    assert_eq!(seen, spawned);
}

#[test]
fn get_reads_a_single_entity() {
    let (mut world, entities) = populated();
    let query = world.query::<(&A, &B)>();
    assert_eq!(query.get(&world, entities[5], |(a, b): (&A, &B)| a.0 + b.0), Some(12));
    assert_eq!(query.get(&world, entities[0], |(a, _): (&A, &B)| a.0), None);

    let dead = entities[6];
    world.despawn(dead).unwrap();
    assert_eq!(query.get(&world, dead, |(a, _): (&A, &B)| a.0), None);
}

#[test]
fn par_for_each_visits_every_row_once() {
    let mut world = World::with_config(WorldConfig::default().entities_per_chunk(16));
    for i in 0..1_000 {
        world.spawn((A(i), B(0)));
    }
    let query = world.query::<(&A, &mut B)>();
    query.par_for_each(&world, |(a, mut b): (&A, Mut<B>)| {
        b.0 = a.0 * 2;
    });

    let check = world.query::<(&A, &B)>();
    let mut mismatches = 0;
    check.for_each(&world, |(a, b): (&A, &B)| {
        if b.0 != a.0 * 2 {
            mismatches += 1;
        }
    });
    assert_eq!(mismatches, 0);
}

#[test]
fn changed_filter_tracks_writes_since_the_last_reset() {
    let (mut world, entities) = populated();
    let mut changed = world.query_filtered::<Entity, Changed<A>>();
    assert_eq!(changed.count(&world), 7);

    world.clear_trackers();
    changed.update(&world);
    assert_eq!(changed.count(&world), 0);

    if let Some(mut a) = world.get_mut::<A>(entities[1]) {
        a.0 = 99;
    }
    let query = world.query::<&mut A>();
    query.for_each(&world, |mut a: Mut<A>| {
        if a.0 == 12 {
            a.0 = 13;
        } else {
            // reading through a mutable handle is not a change
            let _ = a.bypass_change_detection();
        }
    });

    changed.update(&world);
    let found: HashSet<Entity> = changed.entities(&world).into_iter().collect();
    assert_eq!(found, HashSet::from([entities[1], entities[6]]));
}

#[test]
fn change_ticks_move_with_the_entity() {
    let (mut world, entities) = populated();
    world.clear_trackers();

    world.insert(entities[0], C(1)).unwrap();
    let mut changed_a = world.query_filtered::<Entity, Changed<A>>();
    let mut changed_c = world.query_filtered::<Entity, Changed<C>>();
    changed_a.update(&world);
    changed_c.update(&world);
    assert_eq!(changed_a.count(&world), 0);
    assert_eq!(changed_c.entities(&world), vec![entities[0]]);
}

#[test]
fn or_mixes_archetype_and_row_filters() {
    let (mut world, entities) = populated();
    world.clear_trackers();
    world.insert(entities[7], B(0)).unwrap();

    // {C} entity by presence, plus the B written after the reset
    let query = world.query_filtered::<Entity, Or<With<C>, Changed<B>>>();
    let found: HashSet<Entity> = query.entities(&world).into_iter().collect();
    assert_eq!(found, HashSet::from([entities[7], entities[9]]));
}

#[test]
fn aliasing_queries_are_rejected() {
    let error = Query::<(&A, &mut A)>::try_new().err().unwrap();
    assert!(matches!(
        error,
        ExecutionError::InvalidQueryAccess { reason: InvalidAccessReason::ReadAndWrite, .. }
    ));
    let error = Query::<(&mut B, &mut B)>::try_new().err().unwrap();
    assert!(matches!(
        error,
        ExecutionError::InvalidQueryAccess { reason: InvalidAccessReason::DuplicateWrite, .. }
    ));
}

#[test]
#[should_panic(expected = "invalid query access")]
fn aliasing_query_panics_on_new() {
    let _ = Query::<(&mut A, Option<&A>)>::new();
}

#[test]
#[should_panic(expected = "different world")]
fn queries_are_bound_to_their_world() {
    let (mut world, _) = populated();
    let other = World::new();
    let query = world.query::<&A>();
    query.count(&other);
}
