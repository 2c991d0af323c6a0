//! The downloader: one HTTP GET wrapped in an [atomic
//! operation][`crate::atomic::atomic_operation`].

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::atomic::{atomic_operation, AtomicError};
use crate::collaborators::Downloader;

/// Size of the copy buffer used to stream the downloaded body to disk.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Atomic(#[from] AtomicError),
    #[error("request to {url} failed")]
    Request { url: String, #[source] source: std::io::Error },
}

/// Download `url` into `<dir>/<filename>`, publishing it atomically.
/// Returns the path to the downloaded file. If the directory already
/// exists this is a no-op (a previous invocation already succeeded) and
/// the downloader is not invoked at all.
pub fn download(
    downloader: &dyn Downloader,
    dir: &Path,
    url: &str,
    filename: &str,
) -> Result<PathBuf, DownloadError> {
    let url_owned = url.to_owned();
    let filename_owned = filename.to_owned();
    atomic_operation(dir, move |scratch| {
        let mut body = downloader
            .get(&url_owned)
            .map_err(|source| Box::new(DownloadError::Request { url: url_owned.clone(), source }) as _)?;
        let mut file = std::fs::File::create(scratch.join(&filename_owned))
            .map_err(|source| Box::new(source) as Box<dyn std::error::Error + Send + Sync>)?;
        let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
        loop {
            let read = body
                .read(&mut buffer)
                .map_err(|source| Box::new(source) as Box<dyn std::error::Error + Send + Sync>)?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|source| Box::new(source) as Box<dyn std::error::Error + Send + Sync>)?;
        }
        Ok(())
    })?;
    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Downloader;
    use std::io;

    #[derive(Debug)]
    struct StaticBody(&'static [u8]);

    impl Downloader for StaticBody {
        fn get(&self, _url: &str) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(self.0))
        }
    }

    #[derive(Debug)]
    struct AlwaysFails;

    impl Downloader for AlwaysFails {
        fn get(&self, _url: &str) -> io::Result<Box<dyn Read + Send>> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no route"))
        }
    }

    #[test]
    fn downloads_body_into_named_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("download");
        let path = download(&StaticBody(b"payload"), &target, "http://example/x", "archive.jar")?;
        assert_eq!(std::fs::read(path)?, b"payload");
        Ok(())
    }

    #[test]
    fn failed_request_leaves_no_download_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("download");
        let result = download(&AlwaysFails, &target, "http://example/x", "archive.jar");
        assert!(result.is_err());
        assert!(!target.exists());
    }
}
