//! Workflow engine for flowrig.
//!
//! Parses and validates flow documents, evaluates `${...}` expressions,
//! expands loops, and drives the step graph with retry and timeout control.
//! Plugins are resolved through the `PluginStore` and `ArtifactFetcher`
//! ports, which `flowrig-infra` implements. Nothing here touches the
//! network or spawns processes directly.

pub mod engine;
pub mod event;
pub mod plugin;
pub mod workflow;
