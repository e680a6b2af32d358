//! Slot-addressed method bodies.
//!
//! `lower` turns a name-based body into `Op`s against the frame of the layout
//! it is compiled in, and `rewrite` moves already lowered entries into the
//! frame of a larger composed layout without going back to source.

pub mod expressions;
pub mod lower;
pub mod rewrite;

pub use expressions::*;
