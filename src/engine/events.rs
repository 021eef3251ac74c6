//! # Events
//!
//! Double-buffered messages between systems.
//!
//! An [`Events<E>`] resource holds the events sent during the current update
//! and the ones sent during the previous update. Once per update, in
//! [`ScheduleLabel::PRE_UPDATE`], an [`EventUpdateSystem<E>`] drops the older
//! buffer and makes the current one the previous one. An event is therefore
//! readable during the update it was sent in and during the following one,
//! wherever the reader runs relative to the sender.
//!
//! Event types are registered on first use, either by [`World::add_event`] or
//! by a system declaring access through [`SystemBuilder::events`] or
//! [`SystemBuilder::events_mut`].

use std::any::{type_name, TypeId};
use std::collections::HashSet;
use std::mem;
use std::slice;

use tracing::debug;

use crate::engine::error::ECSResult;
use crate::engine::resource::Resource;
use crate::engine::scheduler::ScheduleLabel;
use crate::engine::systems::{ResMutParam, ResParam, System, SystemBuilder, SystemContext};
use crate::engine::world::World;

/// Marker trait for event payloads.
///
/// ```ignore
/// struct Collision { a: Entity, b: Entity }
/// impl Event for Collision {}
/// ```
pub trait Event: Send + Sync + 'static {}

/// Events of type `E` sent during this update and the previous one.
pub struct Events<E: Event> {
    previous: Vec<E>,
    current: Vec<E>,
}

impl<E: Event> Resource for Events<E> {}

impl<E: Event> Default for Events<E> {
    fn default() -> Self {
        Self { previous: Vec::new(), current: Vec::new() }
    }
}

impl<E: Event> Events<E> {
    /// Creates empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event in the current buffer.
    pub fn send(&mut self, event: E) {
        self.current.push(event);
    }

    /// Records several events in the current buffer, in order.
    pub fn send_batch(&mut self, events: impl IntoIterator<Item = E>) {
        self.current.extend(events);
    }

    /// Every readable event: the previous update's first, then this one's.
    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.previous.iter().chain(self.current.iter())
    }

    /// Events sent during this update.
    pub fn iter_current(&self) -> slice::Iter<'_, E> {
        self.current.iter()
    }

    /// Number of readable events.
    pub fn len(&self) -> usize {
        self.previous.len() + self.current.len()
    }

    /// Returns `true` if no event is readable.
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty() && self.current.is_empty()
    }

    /// Drops the previous buffer and turns the current one into it.
    pub fn update(&mut self) {
        mem::swap(&mut self.previous, &mut self.current);
        self.current.clear();
    }

    /// Takes every readable event, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = E> + '_ {
        self.previous.drain(..).chain(self.current.drain(..))
    }

    /// Drops both buffers.
    pub fn clear(&mut self) {
        self.previous.clear();
        self.current.clear();
    }
}

/// Event types registered in a world.
#[derive(Default)]
pub struct EventRegistry {
    types: HashSet<TypeId>,
    names: Vec<&'static str>,
}

impl Resource for EventRegistry {}

impl EventRegistry {
    /// Returns `true` if `E` has been registered.
    pub fn contains<E: Event>(&self) -> bool {
        self.types.contains(&TypeId::of::<E>())
    }

    /// Names of registered event types, in registration order.
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    fn register<E: Event>(&mut self) -> bool {
        if !self.types.insert(TypeId::of::<E>()) {
            return false;
        }
        self.names.push(type_name::<E>());
        true
    }
}

/// Swaps the buffers of [`Events<E>`] once per update.
pub struct EventUpdateSystem<E: Event> {
    events: ResMutParam<Events<E>>,
}

impl<E: Event> System for EventUpdateSystem<E> {
    fn init(builder: &mut SystemBuilder<'_>) -> ECSResult<Self> {
        Ok(Self { events: builder.resource_mut() })
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> ECSResult<()> {
        if let Some(mut events) = ctx.resource_mut(&self.events) {
            events.update();
        }
        Ok(())
    }
}

impl World {
    /// Registers event type `E`: inserts an empty [`Events<E>`] if none is
    /// present and adds its [`EventUpdateSystem<E>`] to
    /// [`ScheduleLabel::PRE_UPDATE`]. Returns `false` if `E` was already
    /// registered.
    pub fn add_event<E: Event>(&mut self) -> ECSResult<bool> {
        if !self.contains_resource::<EventRegistry>() {
            self.insert_resource(EventRegistry::default());
        }
        let newly_registered = self
            .get_resource_mut::<EventRegistry>()
            .is_some_and(|mut registry| registry.register::<E>());
        if !newly_registered {
            return Ok(false);
        }

        self.insert_resource(Events::<E>::new());
        self.add_system::<EventUpdateSystem<E>>(ScheduleLabel::PRE_UPDATE)?;
        debug!(event = type_name::<E>(), "registered event");
        Ok(true)
    }

    /// Sends `event`. Returns `false`, dropping the event, if `E` is not
    /// registered.
    pub fn send_event<E: Event>(&self, event: E) -> bool {
        match self.get_resource_mut::<Events<E>>() {
            Some(mut events) => {
                events.send(event);
                true
            }
            None => false,
        }
    }
}

impl SystemBuilder<'_> {
    /// Declares read access to the events of type `E`, registering the type
    /// if needed.
    pub fn events<E: Event>(&mut self) -> ECSResult<ResParam<Events<E>>> {
        self.world().add_event::<E>()?;
        Ok(self.resource())
    }

    /// Declares write access to the events of type `E`, registering the type
    /// if needed.
    pub fn events_mut<E: Event>(&mut self) -> ECSResult<ResMutParam<Events<E>>> {
        self.world().add_event::<E>()?;
        Ok(self.resource_mut())
    }
}
