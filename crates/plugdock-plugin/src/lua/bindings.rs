//! Host API exposed to Lua plugins.

use std::path::Path;

use mlua::{Lua, Table, Value as LuaValue};

use plugdock_core::PluginDescriptor;

/// Remove file-loading globals and make the plugin directory importable.
pub fn prepare_environment(lua: &Lua, dir: &Path) -> mlua::Result<()> {
    let globals = lua.globals();

    // Code is only loaded through `require` from the plugin directory.
    globals.set("loadfile", LuaValue::Nil)?;
    globals.set("dofile", LuaValue::Nil)?;

    let package: Table = globals.get("package")?;
    let search_path: String = package.get("path")?;
    let dir = dir.to_string_lossy();
    package.set(
        "path",
        format!("{dir}/?.lua;{dir}/?/init.lua;{search_path}"),
    )?;

    Ok(())
}

/// Create the `host` namespace.
pub fn create_host_api(lua: &Lua, descriptor: &PluginDescriptor, dir: &Path) -> mlua::Result<Table> {
    let host = lua.create_table()?;

    host.set("version", env!("CARGO_PKG_VERSION"))?;
    host.set("plugin_name", descriptor.name.as_str())?;
    host.set("plugin_dir", dir.to_string_lossy().into_owned())?;

    let log_info = lua.create_function(|_, msg: String| {
        tracing::info!(target: "plugin", "{}", msg);
        Ok(())
    })?;
    host.set("log_info", log_info)?;

    let log_warn = lua.create_function(|_, msg: String| {
        tracing::warn!(target: "plugin", "{}", msg);
        Ok(())
    })?;
    host.set("log_warn", log_warn)?;

    let log_error = lua.create_function(|_, msg: String| {
        tracing::error!(target: "plugin", "{}", msg);
        Ok(())
    })?;
    host.set("log_error", log_error)?;

    Ok(host)
}
