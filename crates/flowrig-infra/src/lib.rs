//! Infrastructure layer for flowrig.
//!
//! Implements the ports defined in `flowrig-core`: the local plugin store,
//! the HTTP artifact fetcher, subprocess and built-in plugins. Also loads
//! project configuration, flows, and the plugin manifest, and persists the
//! run snapshot.

pub mod config;
pub mod plugin;
pub mod project;
pub mod state_store;
