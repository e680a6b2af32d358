//! Compile-time composition for a class-free, structurally typed object model.
//!
//! Objects compose with `@Extend` and `@Mixin` instead of inheriting. Each
//! composed type is flattened into one contiguous slot layout, inherited
//! method bodies are shifted to address their region of it, and every type
//! gets a dispatch table that is either stored on the instance or, for
//! single-field types at monomorphized call sites, passed alongside it.

pub mod ast;
pub mod compile;
pub mod compose;
pub mod demos;
pub mod dispatch;
pub mod errors;
pub mod exec;
pub mod helper;
pub mod layout;
pub mod lir;
pub mod types;
