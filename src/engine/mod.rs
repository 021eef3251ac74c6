//! # Engine Module
//!
//! Core ECS implementation.
//!
//! This module contains the building blocks of the ECS:
//! - Component registry, layouts, and chunked column storage
//! - Archetypes and entity management
//! - World, resources, and deferred commands
//! - Queries and filters
//! - Systems and scheduling
//! - Double-buffered events
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod component;
pub mod layout;
pub mod storage;
pub mod chunks;
pub mod entity;
pub mod archetype;
pub mod resource;
pub mod config;
pub mod world;
pub mod commands;
pub mod borrow;
pub mod query;
pub mod filter;
pub mod systems;
pub mod scheduler;
pub mod events;
