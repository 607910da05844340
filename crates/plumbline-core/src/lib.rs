//! Core types and logic for plumbline.
//!
//! plumbline overlays a live inspection tool on a page: it highlights the
//! hovered element and its nearest differently-sized ancestor, computes the
//! distance guides between them, and lets a user lock a measurement to
//! compare it against other elements. The tool runs split across three
//! isolated execution contexts that coordinate only through messages.
//!
//! # Modules
//!
//! - [`bus`]: per-context pub/sub with remote transports and a history ring
//! - [`protocol`]: the tagged message union and its inbound validity filter
//! - [`context`]: execution contexts and message addressing
//! - [`inspect`]: element metadata, ancestor discovery, visibility
//! - [`geometry`]: rectangles and the distance-line algorithm
//! - [`tracker`]: the locked/unlocked measurement state machine
//! - [`registry`]: live trackers and keyboard shortcut dispatch
//! - [`overlay`]: the content context composition root
//! - [`dom`]: the document access capability and an in-memory document
//!
//! # Distance Lines
//!
//! | Pair | Lines | Anchor |
//! |------|-------|--------|
//! | Containing | top, left, right, bottom | pointer (unlocked) or midpoint (locked) |
//! | Disjoint / overlapping | nearest horizontal + nearest vertical | same |
//! | Degenerate box | none | |
//!
//! Locked trackers add 8 structural guides (distance `-1`) across the
//! viewport.

pub mod bus;
pub mod config;
pub mod context;
pub mod dom;
pub mod error;
pub mod geometry;
pub mod inspect;
pub mod keys;
pub mod overlay;
pub mod protocol;
pub mod registry;
pub mod telemetry;
pub mod tracker;
