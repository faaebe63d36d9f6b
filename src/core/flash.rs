//! Whole-file copy of a bootloader image onto a mounted bootloader volume.
//!
//! Bootloaders such as the UF2 loaders on nice!nano boards reboot into the new
//! firmware as soon as the image is written, which makes the volume vanish
//! under the writer. An I/O error of the "device removed" class on the
//! destination side is therefore reported as [`CopyOutcome::DeviceRemoved`]
//! rather than as a failure.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::workflow::KeyboardHalfRole;

/// Buffer size for file I/O operations. Bootloader images are small, one or
/// two reads is typical.
const BUFFER_SIZE: usize = 128 * 1024;

/// A single copy task for one half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub role: KeyboardHalfRole,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Every byte was written and synced.
    Written { bytes: u64 },
    /// The volume disappeared while or after the image was written.
    DeviceRemoved { bytes: u64 },
    /// Nothing was touched.
    DryRun,
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("failed to read {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Destination {
        path: PathBuf,
        bytes_written: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {} for writing: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Copy the bootloader image described by `req`.
///
/// In dry-run mode this returns immediately without opening either file.
pub async fn flash_bootloader(req: &CopyRequest) -> Result<CopyOutcome, CopyError> {
    if req.dry_run {
        info!(
            role = %req.role,
            source = %req.source.display(),
            destination = %req.destination.display(),
            "Dry run, skipping copy"
        );
        return Ok(CopyOutcome::DryRun);
    }

    let source = req.source.clone();
    let destination = req.destination.clone();
    let role = req.role;

    let start_time = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || copy_file(&source, &destination)).await??;

    match outcome {
        CopyOutcome::Written { bytes } => info!(
            role = %role,
            bytes,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Bootloader copied"
        ),
        CopyOutcome::DeviceRemoved { bytes } => info!(
            role = %role,
            bytes,
            "Bootloader volume disappeared after write, treating as flashed"
        ),
        CopyOutcome::DryRun => {}
    }

    Ok(outcome)
}

fn copy_file(source: &Path, destination: &Path) -> Result<CopyOutcome, CopyError> {
    let reader = File::open(source).map_err(|e| CopyError::Source {
        path: source.to_path_buf(),
        source: e,
    })?;

    let file = File::create(destination).map_err(|e| CopyError::Create {
        path: destination.to_path_buf(),
        source: e,
    })?;

    debug!(
        source = %source.display(),
        destination = %destination.display(),
        "Copying bootloader"
    );

    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let result = copy_stream(
        BufReader::with_capacity(BUFFER_SIZE, reader),
        &mut writer,
        source,
        destination,
    )
    .and_then(|bytes| {
        // Flushed inside copy_stream, so into_inner cannot lose data here.
        let file = writer.into_inner().map_err(|e| CopyError::Destination {
            path: destination.to_path_buf(),
            bytes_written: bytes,
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| CopyError::Destination {
            path: destination.to_path_buf(),
            bytes_written: bytes,
            source: e,
        })?;
        Ok(bytes)
    });

    resolve_copy_result(result)
}

/// Stream `reader` into `writer`, flushing at the end. Errors are tagged with
/// the side they happened on.
fn copy_stream<R: Read, W: Write>(
    mut reader: R,
    writer: &mut W,
    source: &Path,
    destination: &Path,
) -> Result<u64, CopyError> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    let destination_error = |e: io::Error, bytes_written: u64| CopyError::Destination {
        path: destination.to_path_buf(),
        bytes_written,
        source: e,
    };

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| CopyError::Source {
            path: source.to_path_buf(),
            source: e,
        })?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| destination_error(e, bytes_written))?;

        bytes_written += bytes_read as u64;
    }

    writer
        .flush()
        .map_err(|e| destination_error(e, bytes_written))?;

    Ok(bytes_written)
}

/// Turn a destination-side "device removed" error into a successful outcome.
fn resolve_copy_result(result: Result<u64, CopyError>) -> Result<CopyOutcome, CopyError> {
    match result {
        Ok(bytes) => Ok(CopyOutcome::Written { bytes }),
        Err(CopyError::Destination {
            bytes_written,
            source,
            path,
        }) => {
            if is_device_removed_error(&source) {
                debug!(
                    destination = %path.display(),
                    error = %source,
                    "Ignoring I/O error from vanished bootloader volume"
                );
                Ok(CopyOutcome::DeviceRemoved {
                    bytes: bytes_written,
                })
            } else {
                warn!(destination = %path.display(), error = %source, "Copy failed");
                Err(CopyError::Destination {
                    path,
                    bytes_written,
                    source,
                })
            }
        }
        Err(e) => Err(e),
    }
}

/// Check if an I/O error indicates the bootloader volume went away.
///
/// Only EIO and ENODEV qualify. NotFound and friends are real failures here
/// because they also describe a wrong mount point.
pub fn is_device_removed_error(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::EIO) | Some(libc::ENODEV))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Accepts every byte, then fails the flush like a volume that just
    /// rebooted into new firmware.
    struct VanishingWriter {
        written: Vec<u8>,
        error: fn() -> io::Error,
    }

    impl Write for VanishingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err((self.error)())
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(libc::EIO))
        }
    }

    fn request(source: PathBuf, destination: PathBuf, dry_run: bool) -> CopyRequest {
        CopyRequest {
            role: KeyboardHalfRole::Central,
            source,
            destination,
            dry_run,
        }
    }

    #[test]
    fn test_is_device_removed_error_eio() {
        let error = io::Error::from_raw_os_error(libc::EIO);
        assert!(is_device_removed_error(&error));
    }

    #[test]
    fn test_is_device_removed_error_enodev() {
        let error = io::Error::from_raw_os_error(libc::ENODEV);
        assert!(is_device_removed_error(&error));
    }

    #[test]
    fn test_is_device_removed_error_not_found() {
        let error = io::Error::new(io::ErrorKind::NotFound, "not found");
        assert!(!is_device_removed_error(&error));
    }

    #[test]
    fn test_is_device_removed_error_permission_denied() {
        let error = io::Error::from_raw_os_error(libc::EACCES);
        assert!(!is_device_removed_error(&error));
    }

    #[test]
    fn test_vanishing_volume_after_full_write_is_success() {
        let payload = b"UF2 image payload".to_vec();
        let mut writer = VanishingWriter {
            written: Vec::new(),
            error: || io::Error::from_raw_os_error(libc::EIO),
        };

        let result = copy_stream(
            payload.as_slice(),
            &mut writer,
            Path::new("left.uf2"),
            Path::new("/mnt/left/left.uf2"),
        );
        let outcome = resolve_copy_result(result).unwrap();

        assert_eq!(writer.written, payload);
        assert_eq!(
            outcome,
            CopyOutcome::DeviceRemoved {
                bytes: payload.len() as u64
            }
        );
    }

    #[test]
    fn test_other_destination_errors_fail() {
        let mut writer = VanishingWriter {
            written: Vec::new(),
            error: || io::Error::from_raw_os_error(libc::ENOSPC),
        };

        let result = copy_stream(
            b"data".as_slice(),
            &mut writer,
            Path::new("left.uf2"),
            Path::new("/mnt/left/left.uf2"),
        );

        let err = resolve_copy_result(result).unwrap_err();
        assert!(matches!(err, CopyError::Destination { bytes_written: 4, .. }));
    }

    #[test]
    fn test_source_side_eio_is_not_suppressed() {
        let mut sink = Vec::new();
        let result = copy_stream(
            FailingReader,
            &mut sink,
            Path::new("left.uf2"),
            Path::new("/mnt/left/left.uf2"),
        );

        let err = resolve_copy_result(result).unwrap_err();
        assert!(matches!(err, CopyError::Source { .. }));
    }

    #[tokio::test]
    async fn test_flash_bootloader_copies_content() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("zmk_left.uf2");
        let mount = temp.path().join("mnt");
        fs::create_dir(&mount).unwrap();
        fs::write(&source, b"firmware bytes").unwrap();

        let destination = mount.join("zmk_left.uf2");
        let outcome = flash_bootloader(&request(source, destination.clone(), false))
            .await
            .unwrap();

        assert_eq!(outcome, CopyOutcome::Written { bytes: 14 });
        assert_eq!(fs::read(&destination).unwrap(), b"firmware bytes");
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let temp = tempdir().unwrap();
        let mount = temp.path().join("mnt");
        fs::create_dir(&mount).unwrap();

        // The source does not even exist: dry run must not open it.
        let outcome = flash_bootloader(&request(
            temp.path().join("missing.uf2"),
            mount.join("missing.uf2"),
            true,
        ))
        .await
        .unwrap();

        assert_eq!(outcome, CopyOutcome::DryRun);
        assert_eq!(fs::read_dir(&mount).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let temp = tempdir().unwrap();
        let result = flash_bootloader(&request(
            temp.path().join("missing.uf2"),
            temp.path().join("out.uf2"),
            false,
        ))
        .await;

        assert!(matches!(result, Err(CopyError::Source { .. })));
    }

    #[tokio::test]
    async fn test_missing_mount_point_fails() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("zmk_right.uf2");
        fs::write(&source, b"x").unwrap();

        let result = flash_bootloader(&request(
            source,
            temp.path().join("not-mounted/zmk_right.uf2"),
            false,
        ))
        .await;

        assert!(matches!(result, Err(CopyError::Create { .. })));
    }
}
