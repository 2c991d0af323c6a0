//! The installer: produce a [`Config`] pointing at a cached PostgreSQL
//! binary installation and a pre-initialized cluster snapshot, trying the
//! Nix strategy first and falling back to Maven.

pub mod download;
pub mod extract;
pub mod maven;
pub mod nix;

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::atomic::{atomic_operation, AtomicError};
use crate::collaborators::{Downloader, SystemDownloader};
use crate::config::Config;
use crate::platform::{self, Platform, UnsupportedPlatform};

#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
    #[error("both acquisition strategies failed (nix: {nix_error}; maven: {maven_error})")]
    BothStrategiesFailed { nix_error: String, maven_error: String },
    #[error(transparent)]
    Atomic(#[from] AtomicError),
    #[error("initdb exited unsuccessfully: {stderr}")]
    InitDb { stderr: String },
    #[error("could not run initdb")]
    SpawnInitDb(#[source] std::io::Error),
    #[error("could not locate a usable binary directory under the acquired installation")]
    NoBinaryDirectory,
}

/// Where an installation root lives by default: `$PGTEST_ROOT`, or
/// `$HOME/.cache/pgtest` otherwise.
pub fn default_root() -> PathBuf {
    if let Ok(root) = env::var("PGTEST_ROOT") {
        if !root.trim().is_empty() {
            return PathBuf::from(root);
        }
    }
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    Path::new(&home).join(".cache").join("pgtest")
}

pub struct Installer {
    root: PathBuf,
    downloader: Box<dyn Downloader>,
    force_maven: bool,
}

impl Installer {
    pub fn new(root: PathBuf) -> Self {
        let force_maven = env::var("PGTEST_FORCE_MAVEN").map(|v| v == "1").unwrap_or(false);
        Self { root, downloader: Box::new(SystemDownloader), force_maven }
    }

    /// Override the downloader, for tests that must not make real network
    /// calls.
    pub fn with_downloader(mut self, downloader: Box<dyn Downloader>) -> Self {
        self.downloader = downloader;
        self
    }

    /// Acquire a binary installation and an initialized snapshot cluster
    /// for `version` (or the resolved default), returning a [`Config`]
    /// that uniquely identifies this (binary, snapshot) pair.
    pub fn install(&self, version: Option<&str>) -> Result<Config, InstallError> {
        let version = platform::resolve_version(version);
        let platform = Platform::host()?;
        let major = platform::major_version(&version).to_owned();

        // Nix realizes into the (already content-addressed, already cached)
        // Nix store: it needs none of our own atomic-directory bookkeeping,
        // so it's tried outside `atomic_operation` entirely. Only the Maven
        // fallback, which downloads into a directory of our own choosing,
        // needs the atomic build-once protocol.
        let gc_root = self.root.join("nix-roots").join(&version);
        let install_root = if self.force_maven {
            self.acquire_via_maven(platform, &version, "skipped (PGTEST_FORCE_MAVEN=1)".to_owned())?
        } else {
            match nix::acquire(&major, &gc_root) {
                Ok(store_path) => store_path,
                Err(nix_error) => {
                    log::info!("nix acquisition failed, falling back to maven: {nix_error}");
                    self.acquire_via_maven(platform, &version, nix_error.to_string())?
                }
            }
        };
        let binary_path = find_bin_dir(&install_root).ok_or(InstallError::NoBinaryDirectory)?;

        let snapshot_root = self
            .root
            .join("snapshots")
            .join(&version)
            .join(format!("{}-{}", platform.os, platform.arch));
        atomic_operation(&snapshot_root, {
            let binary_path = binary_path.clone();
            move |scratch| {
                run_initdb(&binary_path, scratch)
                    .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
            }
        })?;

        // Scoped per version so two `Process`es serving different
        // PostgreSQL versions can never pick the same sequential data
        // directory or contend on the same `snapshots.lock`.
        let workdir_path = self.root.join("work").join(&version);
        std::fs::create_dir_all(&workdir_path).ok();

        Ok(Config::new(binary_path, snapshot_root.join("data"), workdir_path))
    }

    /// Acquire the binaries via Maven under the atomic-directory protocol,
    /// returning the unpacked `bin`/`lib`/`share` tree's final location
    /// (i.e. under the renamed target, never the transient scratch path).
    fn acquire_via_maven(
        &self,
        platform: Platform,
        version: &str,
        nix_error: String,
    ) -> Result<PathBuf, InstallError> {
        let binary_root = self
            .root
            .join("installs")
            .join(version)
            .join(format!("{}-{}", platform.os, platform.arch));
        let downloader = &*self.downloader;
        atomic_operation(&binary_root, move |scratch| {
            maven::acquire(downloader, scratch, platform, version)
                .map(|_| ())
                .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
        })
        .map_err(|atomic_error| {
            InstallError::BothStrategiesFailed { nix_error: nix_error.clone(), maven_error: atomic_error.to_string() }
        })?;
        Ok(binary_root.join("unpacked"))
    }
}

/// Find the directory under an acquired installation tree that holds
/// `initdb`/`postgres` executables. Maven artifacts nest these under
/// `bin/`; Nix store paths do too.
fn find_bin_dir(install_root: &Path) -> Option<PathBuf> {
    let direct = install_root.join("bin");
    if direct.join("initdb").is_file() {
        return Some(direct);
    }
    for entry in std::fs::read_dir(install_root).ok()?.flatten() {
        let candidate = entry.path().join("bin");
        if candidate.join("initdb").is_file() {
            return Some(candidate);
        }
    }
    None
}

fn run_initdb(bin_dir: &Path, scratch: &Path) -> Result<(), InstallError> {
    let data_dir = scratch.join("data");
    let output = Command::new(bin_dir.join("initdb"))
        .arg("-U")
        .arg("postgres")
        .arg("-D")
        .arg(&data_dir)
        .arg("--no-sync")
        .output()
        .map_err(InstallError::SpawnInitDb)?;
    if !output.status.success() {
        return Err(InstallError::InitDb { stderr: String::from_utf8_lossy(&output.stderr).into_owned() });
    }
    Ok(())
}
