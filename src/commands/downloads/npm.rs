//! Fetching the latest tarball of a package from an npm registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::process::ProgressSlot;

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(@[a-z0-9-~][a-z0-9-._~]*/)?[a-z0-9-~][a-z0-9-._~]*$")
        .expect("package name pattern is valid")
});

#[derive(Error, Debug)]
pub enum NpmError {
    #[error("`{0}` is not a valid npm package name.")]
    InvalidName(String),

    #[error("Package `{0}` not found on npm.")]
    NotFound(String),

    #[error("Failed to fetch package info from npm. Status: {0}")]
    Status(u16),

    #[error("Could not find the latest version for package `{0}`.")]
    NoLatestVersion(String),

    #[error("Could not find a download URL for package `{0}`.")]
    NoTarball(String),

    #[error("An error occurred: {0}")]
    Request(#[from] reqwest::Error),

    #[error("An error occurred: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, VersionDocument>,
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    dist: Option<DistDocument>,
}

#[derive(Debug, Deserialize)]
struct DistDocument {
    tarball: Option<String>,
}

/// The latest published version of a package and where its tarball lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpmRelease {
    pub package: String,
    pub version: String,
    pub tarball_url: String,
}

impl NpmRelease {
    /// `@scope/name` becomes `@scope-name-<version>.tgz`.
    pub fn file_name(&self) -> String {
        format!("{}-{}.tgz", self.package.replacen('/', "-", 1), self.version)
    }
}

pub fn validate_package_name(name: &str) -> Result<&str, NpmError> {
    let name = name.trim();
    if PACKAGE_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(NpmError::InvalidName(name.to_string()))
    }
}

/// Looks up `dist-tags.latest` and the matching tarball URL.
pub async fn fetch_latest(
    client: &reqwest::Client,
    registry_url: &str,
    package: &str,
) -> Result<NpmRelease, NpmError> {
    let package = validate_package_name(package)?;
    let url = format!(
        "{}/{}",
        registry_url.trim_end_matches('/'),
        package.replacen('/', "%2F", 1)
    );
    debug!("Fetching npm metadata from {}", url);

    let response = client.get(&url).send().await?;
    match response.status() {
        StatusCode::NOT_FOUND => return Err(NpmError::NotFound(package.to_string())),
        status if !status.is_success() => return Err(NpmError::Status(status.as_u16())),
        _ => {}
    }

    let document: PackageDocument = response.json().await?;
    let version = document
        .dist_tags
        .get("latest")
        .cloned()
        .ok_or_else(|| NpmError::NoLatestVersion(package.to_string()))?;
    let tarball_url = document
        .versions
        .get(&version)
        .and_then(|v| v.dist.as_ref())
        .and_then(|d| d.tarball.clone())
        .ok_or_else(|| NpmError::NoTarball(package.to_string()))?;

    Ok(NpmRelease {
        package: package.to_string(),
        version,
        tarball_url,
    })
}

/// Progress text for `downloaded` bytes out of `total`, when the size is known.
pub fn tarball_progress(downloaded: u64, total: Option<u64>) -> String {
    match total {
        Some(total) if total > 0 => format!(
            "{}% ({}/{} bytes)",
            downloaded.saturating_mul(100) / total,
            downloaded,
            total
        ),
        _ => format!("{} bytes", downloaded),
    }
}

/// Streams the release tarball into `dir`, keeping `progress` current. Returns
/// the written path. A partial file is removed on failure.
pub async fn download_tarball(
    client: &reqwest::Client,
    release: &NpmRelease,
    dir: &Path,
    progress: ProgressSlot,
) -> Result<PathBuf, NpmError> {
    let mut response = client.get(&release.tarball_url).send().await?;
    if !response.status().is_success() {
        return Err(NpmError::Status(response.status().as_u16()));
    }
    let total = response.content_length();

    let path = dir.join(release.file_name());
    let written = async {
        let mut file = tokio::fs::File::create(&path).await?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            *progress.lock() = Some(tarball_progress(downloaded, total));
        }
        file.flush().await?;
        Ok::<_, NpmError>(downloaded)
    }
    .await;

    match written {
        Ok(downloaded) => {
            info!(
                "Saved {}@{} ({} bytes) to {}",
                release.package,
                release.version,
                downloaded,
                path.display()
            );
            Ok(path)
        }
        Err(e) => {
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!("Could not remove partial download {}: {}", path.display(), remove);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn registry_with_left_pad() -> MockServer {
        let server = MockServer::start().await;
        let tarball = format!("{}/left-pad/-/left-pad-1.3.0.tgz", server.uri());
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "left-pad",
                "dist-tags": { "latest": "1.3.0" },
                "versions": {
                    "1.2.0": { "dist": { "tarball": "unused" } },
                    "1.3.0": { "dist": { "tarball": tarball } }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/left-pad/-/left-pad-1.3.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tarball-bytes".to_vec()))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_and_download_latest() {
        let server = registry_with_left_pad().await;
        let client = reqwest::Client::new();

        let release = fetch_latest(&client, &server.uri(), "left-pad").await.unwrap();
        assert_eq!(release.version, "1.3.0");
        assert_eq!(release.file_name(), "left-pad-1.3.0.tgz");

        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressSlot::default();
        let written = download_tarball(&client, &release, dir.path(), progress.clone())
            .await
            .unwrap();
        assert_eq!(written, dir.path().join("left-pad-1.3.0.tgz"));
        assert_eq!(std::fs::read(&written).unwrap(), b"tarball-bytes");
        assert_eq!(progress.lock().as_deref(), Some("100% (13/13 bytes)"));
    }

    #[tokio::test]
    async fn test_failed_tarball_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let release = NpmRelease {
            package: "left-pad".to_string(),
            version: "1.3.0".to_string(),
            tarball_url: format!("{}/left-pad-1.3.0.tgz", server.uri()),
        };

        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressSlot::default();
        let err = download_tarball(&reqwest::Client::new(), &release, dir.path(), progress.clone())
            .await
            .unwrap_err();
        assert_matches!(err, NpmError::Status(500));
        assert!(!dir.path().join("left-pad-1.3.0.tgz").exists());
        assert!(progress.lock().is_none());
    }

    #[test_case(0, Some(200), "0% (0/200 bytes)" ; "start")]
    #[test_case(50, Some(200), "25% (50/200 bytes)" ; "quarter")]
    #[test_case(200, Some(200), "100% (200/200 bytes)" ; "done")]
    #[test_case(4096, None, "4096 bytes" ; "unknown size")]
    fn test_tarball_progress(downloaded: u64, total: Option<u64>, expected: &str) {
        assert_eq!(tarball_progress(downloaded, total), expected);
    }

    #[tokio::test]
    async fn test_unknown_package() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/no-such-pkg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetch_latest(&reqwest::Client::new(), &server.uri(), "no-such-pkg")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Package `no-such-pkg` not found on npm.");
    }

    #[tokio::test]
    async fn test_registry_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetch_latest(&reqwest::Client::new(), &server.uri(), "left-pad")
            .await
            .unwrap_err();
        assert_matches!(err, NpmError::Status(503));
    }

    #[tokio::test]
    async fn test_missing_latest_tag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/unpublished"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "unpublished" })))
            .mount(&server)
            .await;

        let err = fetch_latest(&reqwest::Client::new(), &server.uri(), "unpublished")
            .await
            .unwrap_err();
        assert_matches!(err, NpmError::NoLatestVersion(_));
    }

    #[test]
    fn test_scoped_file_name() {
        let release = NpmRelease {
            package: "@types/node".to_string(),
            version: "20.1.0".to_string(),
            tarball_url: String::new(),
        };
        assert_eq!(release.file_name(), "@types-node-20.1.0.tgz");
    }

    #[test_case("left-pad", true ; "plain")]
    #[test_case("@types/node", true ; "scoped")]
    #[test_case("../etc", false ; "traversal")]
    #[test_case("Upper", false ; "uppercase")]
    #[test_case("a/b", false ; "unscoped slash")]
    fn test_validate_package_name(name: &str, valid: bool) {
        assert_eq!(validate_package_name(name).is_ok(), valid);
    }
}
