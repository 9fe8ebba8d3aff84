//! Index, value and coordinate primitives shared by the max-tree engine.
//!
//! This crate carries no algorithms of its own; it is the vocabulary that
//! `maxtree_image` and `maxtree_algos` build on.

pub mod dims;
pub mod error;
pub mod idx;
pub mod value;

pub use dims::{Coord, Dims};
pub use error::CoreError;
pub use idx::{AtomicIdx, Idx};
pub use value::Value;
