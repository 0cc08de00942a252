//! Materialize store content into a project's dependency tree.
//!
//! Files are hard-linked from the store (copied when the destination sits on
//! another volume) into a staging directory next to the destination, which
//! is then renamed into place. A failed import never leaves a half-written
//! package behind.

use hoard_schema::PackageFilesResponse;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::ImportError;
use crate::fetch::to_slash;
use crate::paths::{StoreLayout, is_contained};

/// Options for one import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// What the fetch reported for this package.
    pub files_response: PackageFilesResponse,
    /// Rewrite the destination even if it already matches.
    pub force: bool,
    /// Engine whose side-effects build may be substituted.
    pub target_engine: Option<String>,
    /// Whether built output from the side-effects cache may be used.
    pub side_effects_cache_read: bool,
}

/// Which copy of the package ended up in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSource {
    /// Pristine files as extracted from the archive.
    Pristine,
    /// A previously uploaded build for the target engine.
    SideEffectsCache,
}

/// Result of [`import_package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The destination already held this content; nothing was written.
    Skipped,
    /// The destination was (re)written.
    Imported {
        /// Where the files came from.
        source: ImportSource,
        /// Number of files written.
        files: usize,
    },
}

/// Import the package stored at `from` (an entry's `in_store_location`) into `to`.
///
/// # Errors
///
/// Returns an [`ImportError`] on any filesystem failure. The destination is
/// left as it was.
pub async fn import_package(
    from: &Path,
    to: &Path,
    opts: ImportOptions,
) -> Result<ImportOutcome, ImportError> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || import_blocking(&from, &to, &opts))
        .await
        .map_err(|e| ImportError::Join(e.to_string()))?
}

fn import_blocking(
    entry_dir: &Path,
    to: &Path,
    opts: &ImportOptions,
) -> Result<ImportOutcome, ImportError> {
    let (source_dir, filenames, source) = pick_source(entry_dir, opts)?;

    if let Some(unsafe_name) = filenames.iter().find(|n| !is_contained(Path::new(n))) {
        return Err(ImportError::UnsafePath(unsafe_name.clone()));
    }

    if opts.files_response.from_store
        && !opts.force
        && destination_matches(&source_dir, to, &filenames)
    {
        tracing::debug!("{} is up to date", to.display());
        return Ok(ImportOutcome::Skipped);
    }

    let parent = to
        .parent()
        .ok_or_else(|| ImportError::UnsafePath(to.display().to_string()))?;
    fs::create_dir_all(parent).map_err(|e| ImportError::io(parent, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".import-")
        .tempdir_in(parent)
        .map_err(|e| ImportError::io(parent, e))?;

    for name in &filenames {
        let src = source_dir.join(name);
        if !src.is_file() {
            return Err(ImportError::MissingFile {
                name: name.clone(),
                from: source_dir.clone(),
            });
        }
        link_or_copy(&src, &staging.path().join(name))?;
    }

    remove_existing(to)?;
    fs::rename(staging.path(), to).map_err(|e| ImportError::io(to, e))?;

    tracing::debug!(
        "Imported {} files into {} ({source:?})",
        filenames.len(),
        to.display()
    );
    Ok(ImportOutcome::Imported {
        source,
        files: filenames.len(),
    })
}

fn pick_source(
    entry_dir: &Path,
    opts: &ImportOptions,
) -> Result<(PathBuf, Vec<String>, ImportSource), ImportError> {
    let engine = opts
        .target_engine
        .as_deref()
        .filter(|_| opts.side_effects_cache_read);
    if let Some(engine) = engine {
        let built = StoreLayout::side_effects_dir(entry_dir, engine);
        if built.is_dir() {
            let filenames = list_files(&built)?;
            return Ok((built, filenames, ImportSource::SideEffectsCache));
        }
    }
    Ok((
        StoreLayout::content_dir(entry_dir),
        opts.files_response.filenames.clone(),
        ImportSource::Pristine,
    ))
}

/// Sorted `/`-separated relative paths of every regular file under `root`.
pub(crate) fn list_files(root: &Path) -> Result<Vec<String>, ImportError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            ImportError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            names.push(to_slash(relative));
        }
    }
    names.sort();
    Ok(names)
}

fn destination_matches(source_dir: &Path, to: &Path, filenames: &[String]) -> bool {
    filenames.iter().all(|name| {
        let (Ok(src), Ok(dst)) = (
            fs::metadata(source_dir.join(name)),
            fs::metadata(to.join(name)),
        ) else {
            return false;
        };
        dst.is_file() && src.len() == dst.len()
    })
}

fn link_or_copy(src: &Path, dst: &Path) -> Result<(), ImportError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| ImportError::io(parent, e))?;
    }
    if fs::hard_link(src, dst).is_err() {
        fs::copy(src, dst).map_err(|e| ImportError::io(dst, e))?;
    }
    Ok(())
}

fn remove_existing(to: &Path) -> Result<(), ImportError> {
    let Ok(meta) = fs::symlink_metadata(to) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(to)
    } else {
        fs::remove_file(to)
    };
    result.map_err(|e| ImportError::io(to, e))
}
