//! In-memory plugin doubles shared by scheduler and runner tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowrig_types::plugin::{ActionSpec, PluginInfo, PluginManifest, PluginMetadata};
use flowrig_types::workflow::ValueMap;

use super::{ArtifactFetcher, Plugin, PluginError, PluginHandle, PluginRegistry, PluginResolver, PluginStore};

/// Decides the outcome of the n-th call (1-based) given its params.
pub type Behavior = Arc<dyn Fn(usize, &ValueMap) -> Result<ValueMap, PluginError> + Send + Sync>;

#[derive(Clone)]
pub struct FakePlugin {
    metadata: PluginMetadata,
    actions: Vec<ActionSpec>,
    delay: Duration,
    hang: bool,
    behavior: Behavior,
    pub calls: Arc<Mutex<Vec<ValueMap>>>,
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl FakePlugin {
    /// Plugin that echoes its params back as outputs.
    pub fn new(name: &str) -> Self {
        Self {
            metadata: PluginMetadata {
                name: name.to_string(),
                version: "0.0.0".to_string(),
                ..Default::default()
            },
            actions: Vec::new(),
            delay: Duration::ZERO,
            hang: false,
            behavior: Arc::new(|_, params| Ok(params.clone())),
            calls: Arc::default(),
            active: Arc::default(),
            peak: Arc::default(),
        }
    }

    pub fn with_behavior(
        mut self,
        f: impl Fn(usize, &ValueMap) -> Result<ValueMap, PluginError> + Send + Sync + 'static,
    ) -> Self {
        self.behavior = Arc::new(f);
        self
    }

    /// Every call fails with `message`.
    pub fn failing(self, message: &str) -> Self {
        let message = message.to_string();
        self.with_behavior(move |_, _| Err(PluginError::Execution(message.clone())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls never complete.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_actions(mut self, actions: Vec<ActionSpec>) -> Self {
        self.actions = actions;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn handle(&self) -> PluginHandle {
        PluginHandle::new(self.clone())
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Plugin for FakePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    async fn execute(&self, _action: &str, params: ValueMap) -> Result<ValueMap, PluginError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));

        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(params.clone());
            calls.len()
        };
        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.behavior)(n, &params)
    }
}

/// Store with nothing installed.
pub struct EmptyStore;

impl PluginStore for EmptyStore {
    fn install_dir(&self, name: &str) -> PathBuf {
        PathBuf::from("/nonexistent").join(name)
    }

    fn is_installed(&self, _name: &str, _info: Option<&PluginInfo>) -> bool {
        false
    }

    async fn load(
        &self,
        _name: &str,
        _info: Option<&PluginInfo>,
    ) -> Result<Option<PluginHandle>, PluginError> {
        Ok(None)
    }
}

/// Fetcher that always fails.
pub struct NoFetcher;

impl ArtifactFetcher for NoFetcher {
    async fn fetch(
        &self,
        name: &str,
        url: &str,
        _dest: &Path,
        _sha256: Option<&str>,
    ) -> Result<(), PluginError> {
        Err(PluginError::Download {
            name: name.to_string(),
            url: url.to_string(),
            message: "network disabled".to_string(),
        })
    }
}

/// Fetcher whose downloads never finish.
pub struct StalledFetcher;

impl ArtifactFetcher for StalledFetcher {
    async fn fetch(
        &self,
        _name: &str,
        _url: &str,
        _dest: &Path,
        _sha256: Option<&str>,
    ) -> Result<(), PluginError> {
        std::future::pending().await
    }
}

/// Resolver whose registry holds exactly `plugins`.
pub fn resolver_with(plugins: &[&FakePlugin]) -> Arc<PluginResolver<EmptyStore, NoFetcher>> {
    let registry = Arc::new(PluginRegistry::new());
    for plugin in plugins {
        registry.register(plugin.handle());
    }
    Arc::new(PluginResolver::new(
        registry,
        EmptyStore,
        NoFetcher,
        PluginManifest::default(),
    ))
}
