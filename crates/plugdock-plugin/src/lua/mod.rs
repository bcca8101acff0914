//! Lua plugin runtime.
//!
//! Plugins written in Lua 5.4 (via mlua) return a module table from their
//! entry script. Hooks are optional functions on that table and panels are
//! declared in its `tabs` array.

mod bindings;
mod runtime;

pub use runtime::LuaFactory;
