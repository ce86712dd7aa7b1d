//! Plugin resolution: registry, then local storage, then manifest download.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowrig_types::plugin::{PluginInfo, PluginManifest};

use super::manifest::download_url;
use super::{PluginError, PluginHandle, PluginRegistry};

/// Local plugin storage.
///
/// Implementations live in flowrig-infra (`LocalPluginStore`).
pub trait PluginStore: Send + Sync {
    /// Directory a plugin is installed into.
    fn install_dir(&self, name: &str) -> PathBuf;

    /// Whether `name` is installed. Must not start or otherwise touch the plugin.
    fn is_installed(&self, name: &str, info: Option<&PluginInfo>) -> bool;

    /// Load an installed plugin; `Ok(None)` when it is not installed.
    fn load(
        &self,
        name: &str,
        info: Option<&PluginInfo>,
    ) -> impl Future<Output = Result<Option<PluginHandle>, PluginError>> + Send;
}

/// Downloads and unpacks a release archive.
///
/// Implementations live in flowrig-infra (`HttpArtifactFetcher`).
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(
        &self,
        name: &str,
        url: &str,
        dest: &Path,
        sha256: Option<&str>,
    ) -> impl Future<Output = Result<(), PluginError>> + Send;
}

/// How a plugin would be resolved right now, without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Already in the registry (built-ins, earlier resolutions).
    Loaded,
    /// Installed in local storage.
    Installed,
    /// Declared in the manifest; needs a download.
    Download,
    /// Unknown everywhere.
    Missing,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Installed => "installed",
            Self::Download => "download",
            Self::Missing => "missing",
        }
    }
}

/// Where a resolved plugin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Registry,
    LocalStore,
    Download,
}

impl ResolvedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::LocalStore => "local",
            Self::Download => "download",
        }
    }
}

pub struct PluginResolver<S, F> {
    registry: Arc<PluginRegistry>,
    store: S,
    fetcher: F,
    manifest: PluginManifest,
}

impl<S: PluginStore, F: ArtifactFetcher> PluginResolver<S, F> {
    pub fn new(registry: Arc<PluginRegistry>, store: S, fetcher: F, manifest: PluginManifest) -> Self {
        Self {
            registry,
            store,
            fetcher,
            manifest,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn resolve(&self, name: &str) -> Result<PluginHandle, PluginError> {
        self.resolve_traced(name).await.map(|(handle, _)| handle)
    }

    /// Resolve `name`, reporting which source satisfied it.
    ///
    /// Concurrent calls for the same name serialize on a per-name lock, so a
    /// plugin is downloaded at most once per engine.
    pub async fn resolve_traced(&self, name: &str) -> Result<(PluginHandle, ResolvedFrom), PluginError> {
        if let Some(handle) = self.registry.get(name) {
            return Ok((handle, ResolvedFrom::Registry));
        }

        let lock = self.registry.resolution_lock(name);
        let _guard = lock.lock().await;

        // Another task may have finished while we waited.
        if let Some(handle) = self.registry.get(name) {
            return Ok((handle, ResolvedFrom::Registry));
        }

        let info = self.manifest.find(name);
        if let Some(handle) = self.store.load(name, info).await? {
            tracing::info!(plugin = %name, source = "local", "plugin resolved");
            self.registry.register(handle.clone());
            return Ok((handle, ResolvedFrom::LocalStore));
        }

        let Some(info) = info else {
            return Err(PluginError::NotFound(name.to_string()));
        };

        let url = download_url(info);
        let dest = self.store.install_dir(name);
        tracing::info!(plugin = %name, version = %info.version, url = %url, "downloading plugin");
        self.fetcher
            .fetch(name, &url, &dest, info.sha256.as_deref())
            .await?;

        let handle = self.store.load(name, Some(info)).await?.ok_or_else(|| PluginError::Invalid {
            name: name.to_string(),
            message: format!("no executable found in {} after download", dest.display()),
        })?;
        tracing::info!(plugin = %name, source = "download", "plugin resolved");
        self.registry.register(handle.clone());
        Ok((handle, ResolvedFrom::Download))
    }

    /// Report how `name` would resolve, without downloading.
    pub fn availability(&self, name: &str) -> Availability {
        if self.registry.contains(name) {
            return Availability::Loaded;
        }
        let info = self.manifest.find(name);
        if self.store.is_installed(name, info) {
            Availability::Installed
        } else if info.is_some() {
            Availability::Download
        } else {
            Availability::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use flowrig_types::plugin::{ActionSpec, PluginMetadata};
    use flowrig_types::workflow::ValueMap;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Stub(PluginMetadata);

    impl Plugin for Stub {
        fn metadata(&self) -> &PluginMetadata {
            &self.0
        }

        fn actions(&self) -> &[ActionSpec] {
            &[]
        }

        async fn execute(&self, _action: &str, _params: ValueMap) -> Result<ValueMap, PluginError> {
            Ok(ValueMap::new())
        }
    }

    fn stub(name: &str) -> PluginHandle {
        PluginHandle::new(Stub(PluginMetadata {
            name: name.to_string(),
            ..Default::default()
        }))
    }

    /// In-memory store: "installed" names load, others are absent.
    #[derive(Default, Clone)]
    struct MemStore {
        installed: Arc<Mutex<HashSet<String>>>,
        loads: Arc<AtomicUsize>,
    }

    impl PluginStore for MemStore {
        fn install_dir(&self, name: &str) -> PathBuf {
            PathBuf::from("/plugins").join(name)
        }

        fn is_installed(&self, name: &str, _info: Option<&PluginInfo>) -> bool {
            self.installed.lock().unwrap().contains(name)
        }

        async fn load(
            &self,
            name: &str,
            _info: Option<&PluginInfo>,
        ) -> Result<Option<PluginHandle>, PluginError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let installed = self.installed.lock().unwrap().contains(name);
            Ok(installed.then(|| stub(name)))
        }
    }

    /// Fetcher that "installs" into the shared store, or fails.
    #[derive(Clone)]
    struct MemFetcher {
        store: MemStore,
        fail: bool,
        urls: Arc<Mutex<Vec<String>>>,
    }

    impl ArtifactFetcher for MemFetcher {
        async fn fetch(
            &self,
            name: &str,
            url: &str,
            _dest: &Path,
            _sha256: Option<&str>,
        ) -> Result<(), PluginError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.urls.lock().unwrap().push(url.to_string());
            if self.fail {
                return Err(PluginError::Download {
                    name: name.to_string(),
                    url: url.to_string(),
                    message: "HTTP 404".to_string(),
                });
            }
            self.store.installed.lock().unwrap().insert(name.to_string());
            Ok(())
        }
    }

    fn manifest() -> PluginManifest {
        PluginManifest {
            plugins: vec![PluginInfo {
                name: "k8s".to_string(),
                repository: "https://github.com/acme/x".to_string(),
                version: "v1.2.0".to_string(),
                path: None,
                sha256: None,
            }],
        }
    }

    fn resolver(fail: bool) -> (PluginResolver<MemStore, MemFetcher>, MemFetcher) {
        let store = MemStore::default();
        let fetcher = MemFetcher {
            store: store.clone(),
            fail,
            urls: Arc::default(),
        };
        let resolver = PluginResolver::new(
            Arc::new(PluginRegistry::new()),
            store,
            fetcher.clone(),
            manifest(),
        );
        (resolver, fetcher)
    }

    #[tokio::test]
    async fn test_registry_hit_first() {
        let (resolver, fetcher) = resolver(false);
        resolver.registry().register(stub("shell"));
        let (_, from) = resolver.resolve_traced("shell").await.unwrap();
        assert_eq!(from, ResolvedFrom::Registry);
        assert!(fetcher.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_store_before_download() {
        let (resolver, fetcher) = resolver(false);
        resolver.store().installed.lock().unwrap().insert("k8s".to_string());
        let (handle, from) = resolver.resolve_traced("k8s").await.unwrap();
        assert_eq!(handle.name(), "k8s");
        assert_eq!(from, ResolvedFrom::LocalStore);
        assert!(fetcher.urls.lock().unwrap().is_empty());
        assert!(resolver.registry().contains("k8s"));
    }

    #[tokio::test]
    async fn test_download_from_manifest() {
        let (resolver, fetcher) = resolver(false);
        assert_eq!(resolver.availability("k8s"), Availability::Download);
        assert_eq!(resolver.availability("helm"), Availability::Missing);
        let (_, from) = resolver.resolve_traced("k8s").await.unwrap();
        assert_eq!(from, ResolvedFrom::Download);
        assert_eq!(
            fetcher.urls.lock().unwrap().as_slice(),
            ["https://github.com/acme/x/releases/download/v1.2.0/k8s.tar.gz"]
        );
        let (_, again) = resolver.resolve_traced("k8s").await.unwrap();
        assert_eq!(again, ResolvedFrom::Registry);
        assert_eq!(resolver.availability("k8s"), Availability::Loaded);
    }

    #[tokio::test]
    async fn test_availability_never_loads_plugins() {
        let (resolver, _) = resolver(false);
        resolver.store().installed.lock().unwrap().insert("k8s".to_string());
        assert_eq!(resolver.availability("k8s"), Availability::Installed);
        assert_eq!(resolver.availability("helm"), Availability::Missing);
        assert_eq!(resolver.store().loads.load(Ordering::SeqCst), 0);
        assert!(!resolver.registry().contains("k8s"));
    }

    #[tokio::test]
    async fn test_concurrent_resolution_downloads_once() {
        let (resolver, fetcher) = resolver(false);
        let resolver = Arc::new(resolver);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let r = Arc::clone(&resolver);
            tasks.spawn(async move { r.resolve("k8s").await.map(|h| h.name().to_string()) });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), "k8s");
        }
        assert_eq!(fetcher.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_and_download_failure() {
        let (resolver, _) = resolver(true);
        let err = resolver.resolve("terraform").await.unwrap_err();
        assert!(matches!(err, PluginError::NotFound(_)));

        let err = resolver.resolve("k8s").await.unwrap_err();
        assert!(matches!(err, PluginError::Download { .. }));
        assert!(err.is_resolution());
        assert!(!resolver.registry().contains("k8s"));
    }
}
