//! Resolution of the bootloader files given on the command line.
//!
//! Whatever form the operator used, the result is one existing file per half.
//! Archives are unpacked into a temporary directory that lives as long as the
//! returned [`ResolvedSources`].

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no bootloader file given")]
    NoSource,

    #[error("Left bootloader file does not exist: {}", .0.display())]
    LeftMissing(PathBuf),

    #[error("Right bootloader file does not exist: {}", .0.display())]
    RightMissing(PathBuf),

    #[error("failed to read archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("expected exactly one file name containing '{side}' in the archive, found {count}")]
    ArchiveMatches { side: &'static str, count: usize },

    #[error("failed to extract {}: {source}", .path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How the operator named the bootloader files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    Separate { left: PathBuf, right: PathBuf },
    Both(PathBuf),
    Zip(PathBuf),
}

impl SourceSelection {
    /// Build a selection from the raw flags. Empty values count as absent;
    /// exclusivity is enforced by the argument parser.
    pub fn from_flags(
        left: Option<PathBuf>,
        right: Option<PathBuf>,
        both: Option<PathBuf>,
        zip: Option<PathBuf>,
    ) -> Result<Self, SourceError> {
        let given = |p: Option<PathBuf>| p.filter(|p| !p.as_os_str().is_empty());

        if let Some(archive) = given(zip) {
            return Ok(Self::Zip(archive));
        }
        if let Some(file) = given(both) {
            return Ok(Self::Both(file));
        }
        match (given(left), given(right)) {
            (Some(left), Some(right)) => Ok(Self::Separate { left, right }),
            _ => Err(SourceError::NoSource),
        }
    }

    pub fn resolve(self) -> Result<ResolvedSources, SourceError> {
        let resolved = match self {
            Self::Separate { left, right } => ResolvedSources {
                central: left,
                peripheral: right,
                extracted: None,
            },
            Self::Both(file) => ResolvedSources {
                central: file.clone(),
                peripheral: file,
                extracted: None,
            },
            Self::Zip(archive) => extract_halves(&archive)?,
        };

        if !resolved.central.is_file() {
            return Err(SourceError::LeftMissing(resolved.central));
        }
        if !resolved.peripheral.is_file() {
            return Err(SourceError::RightMissing(resolved.peripheral));
        }

        info!(
            central = %resolved.central.display(),
            peripheral = %resolved.peripheral.display(),
            "Resolved bootloader files"
        );
        Ok(resolved)
    }
}

/// Existing bootloader file per half. The central half is the left one.
#[derive(Debug)]
pub struct ResolvedSources {
    pub central: PathBuf,
    pub peripheral: PathBuf,
    /// Removed on drop.
    extracted: Option<TempDir>,
}

#[cfg(test)]
impl ResolvedSources {
    fn extracted_dir(&self) -> Option<&Path> {
        self.extracted.as_ref().map(TempDir::path)
    }
}

fn extract_halves(archive_path: &Path) -> Result<ResolvedSources, SourceError> {
    let archive_err = |source: zip::result::ZipError| SourceError::Archive {
        path: archive_path.to_path_buf(),
        source,
    };

    let file = File::open(archive_path).map_err(|e| archive_err(e.into()))?;
    let mut archive = ZipArchive::new(file).map_err(archive_err)?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(archive_err)?;
        if entry.is_dir() {
            continue;
        }
        // Entries with unsafe paths (absolute, `..`) have no enclosed name.
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            continue;
        };
        entries.push((i, name));
    }

    let left = single_match(&entries, "left")?;
    let right = single_match(&entries, "right")?;

    let dir = tempfile::Builder::new()
        .prefix("zmk-flasher-")
        .tempdir()
        .map_err(|e| SourceError::Extract {
            path: std::env::temp_dir(),
            source: e,
        })?;

    let central = extract_entry(&mut archive, left, dir.path())?;
    let peripheral = extract_entry(&mut archive, right, dir.path())?;

    debug!(archive = %archive_path.display(), dir = %dir.path().display(), "Extracted bootloader archive");

    Ok(ResolvedSources {
        central,
        peripheral,
        extracted: Some(dir),
    })
}

fn single_match<'a>(
    entries: &'a [(usize, String)],
    side: &'static str,
) -> Result<&'a (usize, String), SourceError> {
    let matches: Vec<_> = entries
        .iter()
        .filter(|(_, name)| name.to_lowercase().contains(side))
        .collect();

    match matches[..] {
        [only] => Ok(only),
        _ => Err(SourceError::ArchiveMatches {
            side,
            count: matches.len(),
        }),
    }
}

fn extract_entry(
    archive: &mut ZipArchive<File>,
    (index, name): &(usize, String),
    dir: &Path,
) -> Result<PathBuf, SourceError> {
    let destination = dir.join(name);
    let extract_err = |source: io::Error| SourceError::Extract {
        path: destination.clone(),
        source,
    };

    let mut entry = archive
        .by_index(*index)
        .map_err(|e| extract_err(io::Error::other(e)))?;
    let mut out = File::create(&destination).map_err(extract_err)?;
    io::copy(&mut entry, &mut out).map_err(extract_err)?;

    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_from_flags_treats_empty_as_absent() {
        let selection = SourceSelection::from_flags(
            Some(PathBuf::from("")),
            Some(PathBuf::from("")),
            Some(PathBuf::from("both.uf2")),
            None,
        )
        .unwrap();
        assert_eq!(selection, SourceSelection::Both(PathBuf::from("both.uf2")));

        let none = SourceSelection::from_flags(Some(PathBuf::from("")), None, None, None);
        assert!(matches!(none, Err(SourceError::NoSource)));
    }

    #[test]
    fn test_separate_files() {
        let temp = tempdir().unwrap();
        let left = temp.path().join("left.uf2");
        let right = temp.path().join("right.uf2");
        std::fs::write(&left, b"L").unwrap();
        std::fs::write(&right, b"R").unwrap();

        let resolved = SourceSelection::Separate {
            left: left.clone(),
            right: right.clone(),
        }
        .resolve()
        .unwrap();

        assert_eq!(resolved.central, left);
        assert_eq!(resolved.peripheral, right);
        assert!(resolved.extracted_dir().is_none());
    }

    #[test]
    fn test_missing_files_are_reported_per_side() {
        let temp = tempdir().unwrap();
        let present = temp.path().join("present.uf2");
        std::fs::write(&present, b"x").unwrap();

        let err = SourceSelection::Separate {
            left: temp.path().join("gone.uf2"),
            right: present.clone(),
        }
        .resolve()
        .unwrap_err();
        assert!(err.to_string().starts_with("Left bootloader file does not exist"));

        let err = SourceSelection::Separate {
            left: present,
            right: temp.path().join("gone.uf2"),
        }
        .resolve()
        .unwrap_err();
        assert!(err.to_string().starts_with("Right bootloader file does not exist"));
    }

    #[test]
    fn test_one_file_for_both_halves() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("settings_reset.uf2");
        std::fs::write(&file, b"reset").unwrap();

        let resolved = SourceSelection::Both(file.clone()).resolve().unwrap();
        assert_eq!(resolved.central, file);
        assert_eq!(resolved.peripheral, file);
    }

    #[test]
    fn test_zip_is_split_by_name() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("firmware.zip");
        write_zip(
            &archive,
            &[
                ("build/corne_left-nice_nano_v2-zmk.uf2", "LEFT"),
                ("build/corne_right-nice_nano_v2-zmk.uf2", "RIGHT"),
                ("README.txt", "notes"),
            ],
        );

        let resolved = SourceSelection::Zip(archive).resolve().unwrap();
        let dir = resolved.extracted_dir().unwrap().to_path_buf();

        assert_eq!(resolved.central, dir.join("corne_left-nice_nano_v2-zmk.uf2"));
        assert_eq!(std::fs::read(&resolved.central).unwrap(), b"LEFT");
        assert_eq!(std::fs::read(&resolved.peripheral).unwrap(), b"RIGHT");

        drop(resolved);
        assert!(!dir.exists());
    }

    #[test]
    fn test_zip_with_two_left_files_is_rejected() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("firmware.zip");
        write_zip(
            &archive,
            &[
                ("a_left.uf2", "1"),
                ("b_left.uf2", "2"),
                ("c_right.uf2", "3"),
            ],
        );

        let err = SourceSelection::Zip(archive).resolve().unwrap_err();
        assert!(matches!(err, SourceError::ArchiveMatches { side: "left", count: 2 }));
    }

    #[test]
    fn test_zip_without_right_file_is_rejected() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("firmware.zip");
        write_zip(&archive, &[("only_left.uf2", "1")]);

        let err = SourceSelection::Zip(archive).resolve().unwrap_err();
        assert!(matches!(err, SourceError::ArchiveMatches { side: "right", count: 0 }));
    }

    #[test]
    fn test_not_a_zip() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("firmware.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let err = SourceSelection::Zip(archive).resolve().unwrap_err();
        assert!(matches!(err, SourceError::Archive { .. }));
    }
}
