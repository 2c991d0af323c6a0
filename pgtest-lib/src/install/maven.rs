//! The Maven acquisition strategy: download a prebuilt
//! `embedded-postgres-binaries-<os>-<arch>-<version>.jar` and unpack its
//! embedded payload. Grounded on `examples/original_source/postgres.go`'s
//! `download()`/`unpack()` pair, generalized over [`Downloader`].

use std::path::{Path, PathBuf};

use crate::collaborators::Downloader;
use crate::install::download::{download, DownloadError};
use crate::install::extract::{extract_archive, ExtractError};
use crate::platform::Platform;

const MAVEN_REPOSITORY: &str = "https://repo1.maven.org/maven2";
const GROUP_PATH: &str = "io/zonky/test/postgres";
const INNER_PAYLOAD_NAMES: &[&str] = &["postgres.txz", "postgres.tar.xz"];

#[derive(thiserror::Error, Debug)]
pub enum MavenError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

fn artifact_coordinates(platform: Platform, version: &str) -> (String, String) {
    let artifact = format!("embedded-postgres-binaries-{}-{}", platform.os, platform.arch);
    let filename = format!("{artifact}-{version}.jar");
    let url = format!("{MAVEN_REPOSITORY}/{GROUP_PATH}/{artifact}/{version}/{filename}");
    (url, filename)
}

/// Download and unpack the platform/version-matched binaries jar under
/// `work_dir`, returning the directory the `bin/`, `lib/`, and `share/`
/// trees were unpacked into.
pub fn acquire(
    downloader: &dyn Downloader,
    work_dir: &Path,
    platform: Platform,
    version: &str,
) -> Result<PathBuf, MavenError> {
    let (url, filename) = artifact_coordinates(platform, version);
    let download_dir = work_dir.join("download");
    let archive_path = download(downloader, &download_dir, &url, &filename)?;

    let unpacked = work_dir.join("unpacked");
    extract_archive(&archive_path, &unpacked, INNER_PAYLOAD_NAMES)?;
    Ok(unpacked)
}
