//! Plugin manifest parsing and release URL construction.

use flowrig_types::plugin::{PluginInfo, PluginManifest};

use super::PluginError;

/// Parse and check a `plugins.yaml` document.
///
/// Every entry needs a name, repository, and version, and names must be
/// unique. Versions that are not semver (with or without a leading `v`)
/// are accepted with a warning.
pub fn parse_manifest(yaml: &str) -> Result<PluginManifest, PluginError> {
    let manifest: PluginManifest =
        serde_yaml_ng::from_str(yaml).map_err(|e| PluginError::Invalid {
            name: "plugins.yaml".to_string(),
            message: e.to_string(),
        })?;

    let mut seen = std::collections::HashSet::new();
    for info in &manifest.plugins {
        let invalid = |message: &str| PluginError::Invalid {
            name: info.name.clone(),
            message: message.to_string(),
        };
        if info.name.trim().is_empty() {
            return Err(invalid("manifest entry has an empty name"));
        }
        if info.repository.trim().is_empty() {
            return Err(invalid("repository must not be empty"));
        }
        if info.version.trim().is_empty() {
            return Err(invalid("version must not be empty"));
        }
        if !seen.insert(info.name.as_str()) {
            return Err(invalid("declared more than once"));
        }
        let bare = info.version.strip_prefix('v').unwrap_or(&info.version);
        if semver::Version::parse(bare).is_err() {
            tracing::warn!(plugin = %info.name, version = %info.version, "plugin version is not semver");
        }
    }
    Ok(manifest)
}

/// Release archive URL for a manifest entry.
///
/// GitHub repositories use the release-asset layout; anything else is
/// treated as a plain `<repository>/<version>/` directory.
pub fn download_url(info: &PluginInfo) -> String {
    let repo = info.repository.trim_end_matches('/');
    if is_github(repo) {
        format!(
            "{repo}/releases/download/{}/{}.tar.gz",
            info.version, info.name
        )
    } else {
        format!("{repo}/{}/{}.tar.gz", info.version, info.name)
    }
}

fn is_github(repo: &str) -> bool {
    let host = repo
        .split_once("://")
        .map_or(repo, |(_, rest)| rest)
        .split('/')
        .next()
        .unwrap_or_default();
    host == "github.com" || host == "www.github.com"
}
