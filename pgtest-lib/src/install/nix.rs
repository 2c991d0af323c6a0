//! The Nix acquisition strategy: realize `postgresql_<major>` from
//! `<nixpkgs>` via `nix-instantiate` + `nix-store --realize`, grounded on
//! `pgdo_lib::runtime::strategy`'s chain-of-responsibility shape (try each
//! strategy in turn; this one is preferred, falling back to
//! [`super::maven`] on any failure).

use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum NixError {
    #[error("nix-instantiate is not on PATH")]
    NotOnPath(#[source] std::io::Error),
    #[error("nix-instantiate failed for postgresql_{major}: {stderr}")]
    Instantiate { major: String, stderr: String },
    #[error("nix-store --realize failed for {drv}: {stderr}")]
    Realize { drv: String, stderr: String },
    #[error("nix-instantiate produced no derivation path")]
    NoDerivationPath,
}

/// Realize `postgresql_<major>` and return the path to its store output
/// (a directory containing `bin/postgres`, `bin/initdb`, and friends).
/// Pins the result against garbage collection with an indirect GC root at
/// `gc_root`, the same way `nix-build` leaves a `result` symlink behind.
pub fn acquire(major_version: &str, gc_root: &Path) -> Result<PathBuf, NixError> {
    if Command::new("nix-instantiate").arg("--version").output().is_err() {
        return Err(NixError::NotOnPath(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "nix-instantiate not found",
        )));
    }

    let expr = format!("(import <nixpkgs> {{}}).postgresql_{major_version}");
    let instantiate = Command::new("nix-instantiate")
        .arg("-E")
        .arg(&expr)
        .output()
        .map_err(NixError::NotOnPath)?;
    if !instantiate.status.success() {
        return Err(NixError::Instantiate {
            major: major_version.to_owned(),
            stderr: String::from_utf8_lossy(&instantiate.stderr).into_owned(),
        });
    }
    let drv_path = String::from_utf8_lossy(&instantiate.stdout).trim().to_owned();
    if drv_path.is_empty() {
        return Err(NixError::NoDerivationPath);
    }

    if let Some(parent) = gc_root.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let realize = Command::new("nix-store")
        .arg("--realize")
        .arg(&drv_path)
        .arg("--add-root")
        .arg(gc_root)
        .arg("--indirect")
        .output()
        .map_err(|source| NixError::Realize { drv: drv_path.clone(), stderr: source.to_string() })?;
    if !realize.status.success() {
        return Err(NixError::Realize {
            drv: drv_path,
            stderr: String::from_utf8_lossy(&realize.stderr).into_owned(),
        });
    }
    let store_path = String::from_utf8_lossy(&realize.stdout).trim().to_owned();
    if store_path.is_empty() {
        return Err(NixError::NoDerivationPath);
    }
    Ok(Path::new(&store_path).to_owned())
}
