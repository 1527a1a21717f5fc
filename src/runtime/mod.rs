//! Interpreter-facing plumbing: the native API surface, raw field access at
//! computed offsets, and the executable page holding the GC cooperation slots

pub mod code_page;
pub mod ffi;
pub mod offsets;
