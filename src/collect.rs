//! File Collection - Deterministic Enumeration
//!
//! Every listing is sorted by the canonical path with separators normalized
//! to `/`, compared byte-wise, so directory iteration order never reaches the
//! archive.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::compiler::CompileError;
use crate::config::{ResourceSet, SourceSet, VendorSet};

/// Version-control metadata directories never descended into.
pub const VCS_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    "CVS",
    "_darcs",
    ".arch-params",
    ".monotone",
];

/// A file selected for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Location on disk.
    pub path: PathBuf,
    /// Entry name inside the archive.
    pub relative: String,
    /// Byte-wise sort key.
    pub sort_key: String,
}

impl SourceFile {
    pub fn file_name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }
}

/// Resolves files against one project root.
pub struct FileCollector {
    root: PathBuf,
    real_root: PathBuf,
}

impl FileCollector {
    pub fn new(root: &Path) -> Result<Self, CompileError> {
        let real_root = fs::canonicalize(root).map_err(|source| CompileError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root: root.to_path_buf(), real_root })
    }

    /// First-party source files.
    pub fn sources(&self, set: &SourceSet) -> Result<Vec<SourceFile>, CompileError> {
        self.walk(&set.dirs, &[], |entry| {
            has_extension(entry, &set.extensions)
                && !set.exclude_names.iter().any(|n| entry.file_name() == n.as_str())
        })
    }

    /// Resource files copied verbatim.
    pub fn resources(&self, set: &ResourceSet) -> Result<Vec<SourceFile>, CompileError> {
        self.walk(&set.dirs, &[], |entry| has_extension(entry, &set.extensions))
    }

    /// Third-party library and license files.
    pub fn vendor(&self, set: &VendorSet) -> Result<Vec<SourceFile>, CompileError> {
        self.walk(&set.roots, &set.exclude_dirs, |entry| {
            has_extension(entry, &set.extensions)
                || set.include_names.iter().any(|n| entry.file_name() == n.as_str())
        })
    }

    /// One named file, which must exist.
    pub fn named(&self, relative: &str) -> Result<SourceFile, CompileError> {
        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(CompileError::MissingFile(path));
        }
        self.describe(path)
    }

    fn walk<F>(&self, dirs: &[String], exclude_dirs: &[String], accept: F) -> Result<Vec<SourceFile>, CompileError>
    where
        F: Fn(&DirEntry) -> bool,
    {
        let mut files = Vec::new();
        for dir in dirs {
            let base = self.root.join(dir);
            if !base.is_dir() {
                debug!(dir = %base.display(), "skipping missing directory");
                continue;
            }

            let walker = WalkDir::new(&base).follow_links(true).into_iter().filter_entry(|e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !is_excluded_dir(e.file_name().to_str().unwrap_or_default(), exclude_dirs)
            });
            for entry in walker {
                let entry = entry.map_err(|e| CompileError::Walk(e.to_string()))?;
                if entry.file_type().is_file() && accept(&entry) {
                    files.push(self.describe(entry.into_path())?);
                }
            }
        }
        sort_files(&mut files);
        Ok(files)
    }

    fn describe(&self, path: PathBuf) -> Result<SourceFile, CompileError> {
        let real = fs::canonicalize(&path).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?;
        let relative = match real.strip_prefix(&self.real_root) {
            Ok(rel) => normalize_separators(&rel.to_string_lossy()),
            // Outside the root (symlinked package): fall back to the lexical path.
            Err(_) => match path.strip_prefix(&self.root) {
                Ok(rel) => normalize_separators(&rel.to_string_lossy()),
                Err(_) => normalize_separators(&real.to_string_lossy()),
            },
        };
        Ok(SourceFile {
            sort_key: normalize_separators(&real.to_string_lossy()),
            relative,
            path,
        })
    }
}

fn is_excluded_dir(name: &str, exclude_dirs: &[String]) -> bool {
    VCS_DIRS.contains(&name) || exclude_dirs.iter().any(|d| d == name)
}

fn has_extension(entry: &DirEntry, extensions: &[String]) -> bool {
    entry
        .path()
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x == ext))
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Byte-wise order on the normalized real path.
pub fn sort_files(files: &mut [SourceFile]) {
    files.sort_by(|a, b| a.sort_key.as_bytes().cmp(b.sort_key.as_bytes()));
}
