//! The archive extractor.
//!
//! Maven's `embedded-postgres-binaries-*.jar` artifacts are themselves zip
//! archives (a compound archive) that embed a single `postgres.txz` /
//! `postgres.tar.xz` payload alongside metadata the installer doesn't care
//! about. This picks that inner payload out of the outer zip and unpacks
//! it as a `tar` stream compressed with `xz`.
//!
//! Selects the entry whose name ends with one of a caller-supplied list of
//! preferred names if present; otherwise falls back to the single largest
//! entry, but only if it exceeds [`FALLBACK_MIN_SIZE`] — small archives
//! with no name match are rejected outright rather than risking unpacking a
//! metadata/license file as if it were the payload.

use std::io::Read;
use std::path::Path;

/// The fallback heuristic (largest entry) only trusts its pick once it
/// clears this size: metadata and license files in these archives are
/// reliably much smaller than the actual payload, but a match this small
/// is more likely a malformed or unexpected archive than a tiny payload.
const FALLBACK_MIN_SIZE: u64 = 4 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("could not open archive {path}")]
    OpenArchive { path: std::path::PathBuf, #[source] source: std::io::Error },
    #[error("could not read archive {path}")]
    ReadArchive { path: std::path::PathBuf, #[source] source: zip::result::ZipError },
    #[error("no payload entry found in {path} (checked {checked} entries)")]
    NoPayloadEntry { path: std::path::PathBuf, checked: usize },
    #[error("largest entry in {path} is only {size} bytes, below the {FALLBACK_MIN_SIZE} byte fallback threshold")]
    PayloadTooSmall { path: std::path::PathBuf, size: u64 },
    #[error("could not read entry {name} from {path}")]
    ReadEntry { path: std::path::PathBuf, name: String, #[source] source: std::io::Error },
    #[error("could not unpack tar stream")]
    Unpack(#[source] std::io::Error),
}

/// Find the name of the payload entry inside `archive`, per the heuristic
/// above. Does not read entry bodies.
fn locate_payload_entry(
    archive: &mut zip::ZipArchive<std::fs::File>,
    path: &Path,
    preferred_names: &[&str],
) -> Result<String, ExtractError> {
    let mut best: Option<(String, u64)> = None;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|source| ExtractError::ReadArchive { path: path.to_owned(), source })?;
        let name = entry.name().to_owned();
        if preferred_names.iter().any(|preferred| name.ends_with(preferred)) {
            return Ok(name);
        }
        // No name match: remember the largest remaining entry. These
        // artifacts pair one sizeable payload with small metadata/license
        // files, so the largest entry is the payload.
        let size = entry.size();
        let is_largest_so_far = match &best {
            Some((_, best_size)) => size > *best_size,
            None => true,
        };
        if is_largest_so_far {
            best = Some((name, size));
        }
    }
    let (name, size) = best.ok_or_else(|| ExtractError::NoPayloadEntry { path: path.to_owned(), checked: archive.len() })?;
    if size <= FALLBACK_MIN_SIZE {
        return Err(ExtractError::PayloadTooSmall { path: path.to_owned(), size });
    }
    Ok(name)
}

/// Extract the payload entry found inside the outer zip at `archive_path`
/// (preferring an entry whose name ends with one of `preferred_names`),
/// unpacking its contents into `dest`.
pub fn extract_archive(archive_path: &Path, dest: &Path, preferred_names: &[&str]) -> Result<(), ExtractError> {
    let file = std::fs::File::open(archive_path)
        .map_err(|source| ExtractError::OpenArchive { path: archive_path.to_owned(), source })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|source| ExtractError::ReadArchive { path: archive_path.to_owned(), source })?;

    let payload_name = locate_payload_entry(&mut archive, archive_path, preferred_names)?;

    let mut payload = Vec::new();
    {
        let mut entry = archive
            .by_name(&payload_name)
            .map_err(|source| ExtractError::ReadArchive { path: archive_path.to_owned(), source })?;
        entry
            .read_to_end(&mut payload)
            .map_err(|source| ExtractError::ReadEntry {
                path: archive_path.to_owned(),
                name: payload_name.clone(),
                source,
            })?;
    }

    std::fs::create_dir_all(dest).map_err(ExtractError::Unpack)?;
    let decompressed = xz2::read::XzDecoder::new(payload.as_slice());
    let mut tar = tar::Archive::new(decompressed);
    tar.unpack(dest).map_err(ExtractError::Unpack)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar_xz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, *body).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 0);
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn write_zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, body) in entries {
                writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
                writer.write_all(body).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    /// Deterministic, low-compressibility filler bytes: xorshift64 output,
    /// used so the fallback-heuristic fixtures below have an uncompressed
    /// size safely past [`FALLBACK_MIN_SIZE`] without a real multi-megabyte
    /// binary checked into the tree.
    fn filler_bytes(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x9E3779B97F4A7C15;
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            out.extend_from_slice(&state.to_le_bytes());
        }
        out.truncate(len);
        out
    }

    const PREFERRED: &[&str] = &["postgres.txz", "postgres.tar.xz"];

    #[test]
    fn prefers_exact_filename_match_over_larger_entries() -> Result<(), Box<dyn std::error::Error>> {
        let payload = write_tar_xz(&[("bin/postgres", b"binary-contents")]);
        let noise = filler_bytes(payload.len() + 1024);
        let zip_bytes = write_zip_with(&[("license.txt", &noise), ("postgres.txz", &payload)]);

        let dir = tempfile::tempdir()?;
        let archive_path = dir.path().join("bundle.jar");
        std::fs::write(&archive_path, zip_bytes)?;

        let dest = dir.path().join("unpacked");
        extract_archive(&archive_path, &dest, PREFERRED)?;
        assert_eq!(std::fs::read(dest.join("bin/postgres"))?, b"binary-contents");
        Ok(())
    }

    #[test]
    fn falls_back_to_largest_entry_when_no_name_matches() -> Result<(), Box<dyn std::error::Error>> {
        let payload = write_tar_xz(&[("bin/postgres", &filler_bytes(6 * 1024 * 1024))]);
        let small = vec![0_u8; 16];
        let zip_bytes = write_zip_with(&[("metadata.json", &small), ("data.bin", &payload)]);

        let dir = tempfile::tempdir()?;
        let archive_path = dir.path().join("bundle.jar");
        std::fs::write(&archive_path, zip_bytes)?;

        let dest = dir.path().join("unpacked");
        extract_archive(&archive_path, &dest, PREFERRED)?;
        assert_eq!(std::fs::read(dest.join("bin/postgres"))?, filler_bytes(6 * 1024 * 1024));
        Ok(())
    }

    #[test]
    fn fallback_rejects_a_largest_entry_below_the_size_threshold() -> Result<(), Box<dyn std::error::Error>> {
        let payload = write_tar_xz(&[("bin/postgres", b"binary-contents")]);
        let small = vec![0_u8; 16];
        let zip_bytes = write_zip_with(&[("metadata.json", &small), ("data.bin", &payload)]);

        let dir = tempfile::tempdir()?;
        let archive_path = dir.path().join("bundle.jar");
        std::fs::write(&archive_path, zip_bytes)?;

        let dest = dir.path().join("unpacked");
        let result = extract_archive(&archive_path, &dest, PREFERRED);
        assert!(matches!(result, Err(ExtractError::PayloadTooSmall { .. })));
        Ok(())
    }
}
