//! Archive verification and extraction. Blocking; run on the blocking pool.

use flate2::read::GzDecoder;
use hoard_schema::{Integrity, IntegrityHasher};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::FetchError;
use crate::paths::is_contained;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check a downloaded archive against the integrity its resolution pins.
pub(crate) fn verify_archive(
    path: &Path,
    expected: &Integrity,
    package_id: &str,
) -> Result<(), FetchError> {
    let mut file = File::open(path)?;
    let mut hasher = IntegrityHasher::new(expected.algorithm());
    let mut buffer = [0u8; 65536];
    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    let actual = hasher.finalize();
    if &actual != expected {
        return Err(FetchError::IntegrityMismatch {
            package_id: package_id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Unpack a (optionally gzipped) tarball into `dest`, dropping the archive's
/// top-level directory the way registry tarballs expect.
///
/// Returns the sorted, `/`-separated relative paths of every regular file.
/// Links and entries that would land outside `dest` are skipped.
pub(crate) fn extract_tarball(
    archive: &Path,
    dest: &Path,
    package_id: &str,
) -> Result<Vec<String>, FetchError> {
    let corrupt = |message: String| FetchError::CorruptArchive {
        package_id: package_id.to_string(),
        message,
    };

    let mut magic = [0u8; 2];
    let is_gzip = File::open(archive)?.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(File::open(archive)?)))
    } else {
        Box::new(BufReader::new(File::open(archive)?))
    };

    fs::create_dir_all(dest)?;
    let mut tar = tar::Archive::new(reader);
    let mut filenames = Vec::new();

    for entry in tar.entries().map_err(|e| corrupt(e.to_string()))? {
        let mut entry = entry.map_err(|e| corrupt(e.to_string()))?;
        let raw_path = entry.path().map_err(|e| corrupt(e.to_string()))?.into_owned();
        let Some(relative) = strip_top_level(&raw_path) else {
            continue;
        };
        if !is_contained(&relative) {
            tracing::warn!(
                "Skipping entry outside package root in {package_id}: {}",
                raw_path.display()
            );
            continue;
        }

        let target = dest.join(&relative);
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry
                .unpack(&target)
                .map_err(|e| corrupt(format!("{}: {e}", relative.display())))?;
            filenames.push(to_slash(&relative));
        } else {
            tracing::trace!("Skipping non-regular entry {}", raw_path.display());
        }
    }

    filenames.sort();
    filenames.dedup();
    if filenames.is_empty() {
        return Err(corrupt("archive contains no files".to_string()));
    }
    Ok(filenames)
}

fn strip_top_level(path: &Path) -> Option<PathBuf> {
    let mut components = path
        .components()
        .skip_while(|c| matches!(c, Component::CurDir));
    components.next()?;
    let rest: PathBuf = components.collect();
    (!rest.as_os_str().is_empty()).then_some(rest)
}

/// Relative path with `/` separators on every platform.
pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
