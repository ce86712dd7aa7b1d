//! HTTP artifact fetcher for plugin releases.
//!
//! Downloads a `.tar.gz` archive, optionally verifies its SHA-256 digest,
//! and unpacks it into the plugin's install directory. Extraction happens in
//! a staging directory that replaces the install directory only on success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use flate2::read::GzDecoder;
use flowrig_core::plugin::{ArtifactFetcher, PluginError};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    /// Fails when the client cannot honor the configuration, e.g. a user
    /// agent that is not a valid header value.
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .with_context(|| format!("failed to build HTTP client (user agent {user_agent:?})"))?;
        Ok(Self { http })
    }

    async fn download(&self, name: &str, url: &str) -> Result<(Vec<u8>, String), PluginError> {
        let failed = |message: String| PluginError::Download {
            name: name.to_string(),
            url: url.to_string(),
            message,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP status {}", response.status())));
        }

        let content_length = response.content_length();
        tracing::debug!(plugin = %name, content_length = ?content_length, "download started");

        let mut hasher = Sha256::new();
        let mut body = Vec::with_capacity(content_length.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            hasher.update(&chunk);
            body.extend_from_slice(&chunk);
        }

        let digest = to_hex(&hasher.finalize());
        tracing::info!(plugin = %name, bytes = body.len(), sha256 = %digest, "download complete");
        Ok((body, digest))
    }
}

impl ArtifactFetcher for HttpFetcher {
    async fn fetch(
        &self,
        name: &str,
        url: &str,
        dest: &Path,
        sha256: Option<&str>,
    ) -> Result<(), PluginError> {
        let (archive, digest) = self.download(name, url).await?;

        if let Some(expected) = sha256 {
            if !expected.trim().eq_ignore_ascii_case(&digest) {
                return Err(PluginError::Checksum {
                    name: name.to_string(),
                    expected: expected.trim().to_lowercase(),
                    actual: digest,
                });
            }
        }

        let name_owned = name.to_string();
        let dest_owned = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack(&name_owned, &archive, &dest_owned))
            .await
            .map_err(|e| PluginError::Extraction {
                name: name.to_string(),
                message: e.to_string(),
            })??;

        tracing::info!(plugin = %name, dest = %dest.display(), "plugin extracted");
        Ok(())
    }
}

/// Unpack a gzip tarball into `dest`, replacing any previous contents.
fn unpack(name: &str, archive: &[u8], dest: &Path) -> Result<(), PluginError> {
    let extraction = |message: String| PluginError::Extraction {
        name: name.to_string(),
        message,
    };

    let staging = staging_dir(dest);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.set_preserve_permissions(true);
    if let Err(e) = tar.unpack(&staging) {
        std::fs::remove_dir_all(&staging).ok();
        return Err(extraction(e.to_string()));
    }

    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(&staging, dest).map_err(|e| extraction(e.to_string()))
}

fn staging_dir(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tarball(files: &[(&str, &str, u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, body, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new("flowrig-test", Duration::from_secs(10)).unwrap()
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        to_hex(&Sha256::digest(bytes))
    }

    async fn serve(body: Vec<u8>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0.0/k8s.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_extracts_archive() {
        let archive = tarball(&[("k8s", "#!/bin/sh\necho '{}'\n", 0o755), ("README", "docs", 0o644)]);
        let digest = sha256_hex(&archive);
        let server = serve(archive).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("k8s");

        let url = format!("{}/v1.0.0/k8s.tar.gz", server.uri());
        fetcher()
            .fetch("k8s", &url, &dest, Some(&digest.to_uppercase()))
            .await
            .unwrap();

        assert!(dest.join("k8s").is_file());
        assert_eq!(std::fs::read_to_string(dest.join("README")).unwrap(), "docs");
        assert!(!staging_dir(&dest).exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("k8s")).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_nothing_installed() {
        let server = serve(tarball(&[("k8s", "x", 0o755)])).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("k8s");

        let url = format!("{}/v1.0.0/k8s.tar.gz", server.uri());
        let err = fetcher()
            .fetch("k8s", &url, &dest, Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Checksum { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_error_status_is_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let tmp = TempDir::new().unwrap();

        let url = format!("{}/v9/missing.tar.gz", server.uri());
        let err = fetcher()
            .fetch("missing", &url, &tmp.path().join("missing"), None)
            .await
            .unwrap_err();
        match err {
            PluginError::Download { message, .. } => assert!(message.contains("404")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_extraction_error() {
        let server = serve(b"definitely not gzip".to_vec()).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("k8s");

        let url = format!("{}/v1.0.0/k8s.tar.gz", server.uri());
        let err = fetcher().fetch("k8s", &url, &dest, None).await.unwrap_err();
        assert!(matches!(err, PluginError::Extraction { .. }));
        assert!(!dest.exists());
        assert!(!staging_dir(&dest).exists());
    }

    #[test]
    fn test_invalid_user_agent_is_an_error() {
        let err = HttpFetcher::new("flowrig\nbroken", Duration::from_secs(10)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to build HTTP client"));
    }
}
