//! Shared domain types for flowrig.
//!
//! This crate contains the data model used across the workspace: workflow
//! documents, step results and run reports, the plugin manifest and catalog,
//! the run snapshot, and global configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod plugin;
pub mod run;
pub mod state;
pub mod workflow;
