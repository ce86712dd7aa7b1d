//! Filesystem-based plugin storage.
//!
//! Layout:
//! ```text
//! {plugin_dir}/{name}/
//!   {name}        executable, or
//!   plugin        executable, or
//!   {path}        when the manifest entry sets `path`
//! ```

use std::path::{Path, PathBuf};

use flowrig_core::plugin::{PluginError, PluginHandle, PluginStore};
use flowrig_types::plugin::PluginInfo;

use super::SubprocessPlugin;

/// Executable name tried after `{name}` when the manifest gives no path.
const FALLBACK_EXECUTABLE: &str = "plugin";

#[derive(Debug, Clone)]
pub struct LocalPluginStore {
    dir: PathBuf,
}

impl LocalPluginStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Locate the executable for `name`, if installed.
    pub fn find_executable(&self, name: &str, info: Option<&PluginInfo>) -> Option<PathBuf> {
        let base = self.install_dir(name);
        let candidates: Vec<PathBuf> = match info.and_then(|i| i.path.as_deref()) {
            Some(path) => vec![base.join(path)],
            None => vec![base.join(name), base.join(FALLBACK_EXECUTABLE)],
        };
        candidates.into_iter().find(|p| p.is_file())
    }

    /// Names of installed plugin directories, sorted.
    pub fn installed(&self) -> std::io::Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl PluginStore for LocalPluginStore {
    fn install_dir(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn is_installed(&self, name: &str, info: Option<&PluginInfo>) -> bool {
        self.find_executable(name, info).is_some()
    }

    async fn load(&self, name: &str, info: Option<&PluginInfo>) -> Result<Option<PluginHandle>, PluginError> {
        let Some(executable) = self.find_executable(name, info) else {
            return Ok(None);
        };
        ensure_executable(name, &executable)?;
        let plugin = SubprocessPlugin::load(name, executable).await?;
        Ok(Some(PluginHandle::new(plugin)))
    }
}

#[cfg(unix)]
fn ensure_executable(name: &str, path: &Path) -> Result<(), PluginError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o111 == 0 {
        return Err(PluginError::Invalid {
            name: name.to_string(),
            message: format!("{} is not executable", path.display()),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_name: &str, _path: &Path) -> Result<(), PluginError> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn install(dir: &Path, rel: &str, mode: u32) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "#!/bin/sh\necho '{}'\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn info(name: &str, path: Option<&str>) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            repository: "https://example.com".to_string(),
            version: "v1".to_string(),
            path: path.map(str::to_string),
            sha256: None,
        }
    }

    #[tokio::test]
    async fn test_load_missing_plugin_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = LocalPluginStore::new(tmp.path());
        assert!(store.load("k8s", None).await.unwrap().is_none());
        assert!(store.installed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_executable_lookup_order() {
        let tmp = TempDir::new().unwrap();
        install(tmp.path(), "k8s/plugin", 0o755);
        install(tmp.path(), "helm/bin/helm-plugin", 0o755);
        let store = LocalPluginStore::new(tmp.path());

        assert_eq!(
            store.find_executable("k8s", None),
            Some(tmp.path().join("k8s/plugin"))
        );
        assert!(store.find_executable("helm", None).is_none());
        assert_eq!(
            store.find_executable("helm", Some(&info("helm", Some("bin/helm-plugin")))),
            Some(tmp.path().join("helm/bin/helm-plugin"))
        );

        let handle = store.load("k8s", None).await.unwrap().unwrap();
        assert_eq!(handle.name(), "k8s");
        assert_eq!(store.installed().unwrap(), vec!["helm", "k8s"]);
    }

    #[test]
    fn test_is_installed_does_not_run_the_plugin() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("ran");
        let path = tmp.path().join("k8s/k8s");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\ntouch {}\necho '{{}}'\n", marker.display())).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let store = LocalPluginStore::new(tmp.path());

        assert!(store.is_installed("k8s", None));
        assert!(!store.is_installed("helm", None));
        assert!(!store.is_installed("k8s", Some(&info("k8s", Some("bin/other")))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_non_executable_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        install(tmp.path(), "k8s/k8s", 0o644);
        let store = LocalPluginStore::new(tmp.path());
        let err = store.load("k8s", None).await.unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }
}
