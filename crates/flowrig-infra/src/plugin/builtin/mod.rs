//! Plugins compiled into the binary and registered in every engine.

pub mod file;
pub mod http;
pub mod shell;

use std::path::Path;

use flowrig_core::plugin::PluginHandle;

pub use file::FilePlugin;
pub use http::HttpPlugin;
pub use shell::ShellPlugin;

/// Handles for every built-in plugin.
///
/// `base_dir` anchors relative paths for the `shell` working directory and
/// the `file` plugin.
pub fn builtin_plugins(base_dir: &Path) -> Vec<PluginHandle> {
    vec![
        PluginHandle::new(ShellPlugin::new(base_dir)),
        PluginHandle::new(FilePlugin::new(base_dir)),
        PluginHandle::new(HttpPlugin::new()),
    ]
}

/// Read a string parameter, treating absent and null the same.
pub(crate) fn str_param<'a>(params: &'a flowrig_types::workflow::ValueMap, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
