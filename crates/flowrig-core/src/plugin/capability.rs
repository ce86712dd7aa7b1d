//! The plugin capability and its type-erased handle.
//!
//! Follows the blanket-impl pattern used for dynamic dispatch over RPITIT
//! traits:
//! 1. `Plugin` uses native async fn in traits
//! 2. `PluginDyn` is the object-safe twin with boxed futures, blanket-implemented
//! 3. `PluginHandle` wraps `Arc<dyn PluginDyn>` so it can be shared across tasks

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowrig_types::plugin::{ActionSpec, PluginMetadata};
use flowrig_types::workflow::ValueMap;

use super::catalog;
use super::PluginError;

/// A unit of work dispatch: built-in, subprocess, or test double.
///
/// Implementations live in flowrig-infra (e.g. `SubprocessPlugin`,
/// `ShellPlugin`).
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Action catalog. An empty catalog disables catalog validation.
    fn actions(&self) -> &[ActionSpec];

    /// Reject malformed input before `execute`.
    fn validate(&self, action: &str, params: &ValueMap) -> Result<(), PluginError> {
        catalog::validate_params(&self.metadata().name, self.actions(), action, params)
    }

    fn execute(
        &self,
        action: &str,
        params: ValueMap,
    ) -> impl Future<Output = Result<ValueMap, PluginError>> + Send;
}

/// Object-safe version of [`Plugin`] with boxed futures.
pub trait PluginDyn: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    fn actions(&self) -> &[ActionSpec];

    fn validate(&self, action: &str, params: &ValueMap) -> Result<(), PluginError>;

    fn execute_boxed<'a>(
        &'a self,
        action: &'a str,
        params: ValueMap,
    ) -> Pin<Box<dyn Future<Output = Result<ValueMap, PluginError>> + Send + 'a>>;
}

impl<T: Plugin> PluginDyn for T {
    fn metadata(&self) -> &PluginMetadata {
        Plugin::metadata(self)
    }

    fn actions(&self) -> &[ActionSpec] {
        Plugin::actions(self)
    }

    fn validate(&self, action: &str, params: &ValueMap) -> Result<(), PluginError> {
        Plugin::validate(self, action, params)
    }

    fn execute_boxed<'a>(
        &'a self,
        action: &'a str,
        params: ValueMap,
    ) -> Pin<Box<dyn Future<Output = Result<ValueMap, PluginError>> + Send + 'a>> {
        Box::pin(self.execute(action, params))
    }
}

/// Shared, type-erased plugin.
#[derive(Clone)]
pub struct PluginHandle {
    inner: Arc<dyn PluginDyn>,
}

impl PluginHandle {
    pub fn new<T: Plugin + 'static>(plugin: T) -> Self {
        Self {
            inner: Arc::new(plugin),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.metadata().name
    }

    pub fn metadata(&self) -> &PluginMetadata {
        self.inner.metadata()
    }

    pub fn actions(&self) -> &[ActionSpec] {
        self.inner.actions()
    }

    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.inner.actions().iter().find(|a| a.name == name)
    }

    pub fn validate(&self, action: &str, params: &ValueMap) -> Result<(), PluginError> {
        self.inner.validate(action, params)
    }

    pub async fn execute(&self, action: &str, params: ValueMap) -> Result<ValueMap, PluginError> {
        self.inner.execute_boxed(action, params).await
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name())
            .field("version", &self.metadata().version)
            .finish()
    }
}
