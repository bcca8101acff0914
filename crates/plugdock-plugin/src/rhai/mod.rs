//! Rhai plugin runtime.
//!
//! Rhai plugins define their hooks as zero-argument script functions named
//! after the hook, and declare panels by returning an array of maps from a
//! `tabs()` function.

mod runtime;

pub use runtime::RhaiFactory;
