//! Wheel filename parsing and interpreter compatibility checks.
//!
//! Everything here is derived purely from strings: no filesystem access and
//! no interpreter probing. The sandbox crate is responsible for producing a
//! [`SupportedTags`] set for a concrete interpreter.

#![deny(clippy::all)]

mod filename;
mod name;
mod tags;

pub use filename::{is_compatible_filename, UnparseableWheelName, WheelDescriptor, WHEEL_SUFFIX};
pub use name::{normalize_name, requirement_name, split_versioned_dir};
pub use tags::{SupportedTags, TagTriple, ANY_PLATFORM};
