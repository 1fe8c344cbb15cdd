use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use tempfile::NamedTempFile;
use zip::ZipArchive;

use crate::error::GearError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Extracts `archive` into `target_dir` unless `dry_run` is set.
pub fn unzip_archive(archive: &Path, target_dir: &Path, dry_run: bool) -> Result<(), GearError> {
    if dry_run {
        return Ok(());
    }
    match ArchiveKind::detect(archive) {
        Some(ArchiveKind::Zip) => extract_zip(archive, target_dir),
        Some(ArchiveKind::TarGz) => extract_tar_gz(archive, target_dir),
        None => Err(GearError::UnsupportedArchive(archive.to_path_buf())),
    }
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), GearError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| GearError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GearError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GearError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(GearError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| GearError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| GearError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| GearError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| GearError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn extract_tar_gz(tar_path: &Path, target_dir: &Path) -> Result<(), GearError> {
    let file = fs::File::open(tar_path)
        .map_err(|err| GearError::Filesystem(format!("open tar {}: {err}", tar_path.display())))?;
    fs::create_dir_all(target_dir).map_err(|err| GearError::Filesystem(err.to_string()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(target_dir)
        .map_err(|err| GearError::Filesystem(format!("unpack {}: {err}", tar_path.display())))
}

#[derive(Debug, Clone, Default)]
pub struct ZipListing {
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

pub fn list_zip(zip_path: &Path) -> Result<ZipListing, GearError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| GearError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GearError::Filesystem(err.to_string()))?;

    let mut listing = ZipListing::default();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| GearError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            listing.dirs.push(entry.name().to_string());
        } else {
            listing.files.push(entry.name().to_string());
        }
    }
    Ok(listing)
}

/// Copies a file or a whole directory tree to `dest`.
pub fn copy_path(source: &Path, dest: &Path) -> Result<(), GearError> {
    if source.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| GearError::Filesystem(err.to_string()))?;
        }
        fs::copy(source, dest).map_err(|err| GearError::Filesystem(err.to_string()))?;
        return Ok(());
    }

    fs::create_dir_all(dest).map_err(|err| GearError::Filesystem(err.to_string()))?;
    for entry in walk_dir(source)? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| GearError::Filesystem(err.to_string()))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| GearError::Filesystem(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| GearError::Filesystem(err.to_string()))?;
            }
            fs::copy(&entry, &target).map_err(|err| GearError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

pub fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, GearError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| GearError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| GearError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

/// Immediate children of `dir`, sorted by name.
pub fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, GearError> {
    let mut items = fs::read_dir(dir)
        .map_err(|err| GearError::Filesystem(format!("read {}: {err}", dir.display())))?
        .map(|entry| {
            entry
                .map(|entry| entry.path())
                .map_err(|err| GearError::Filesystem(err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    items.sort();
    Ok(items)
}

/// Writes `value` as 2-space indented JSON with sorted keys, replacing
/// `path` through a temporary file in the same directory.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), GearError> {
    let parent = path
        .parent()
        .ok_or_else(|| GearError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| GearError::Filesystem(err.to_string()))?;
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| GearError::Filesystem(err.to_string()))?;
    let temp = NamedTempFile::new_in(parent).map_err(|err| GearError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), &content).map_err(|err| GearError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| GearError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Streams `reader` into `path`; the file only appears once the stream ends
/// cleanly.
pub fn write_stream_atomic<R: io::Read>(reader: &mut R, path: &Path) -> Result<(), GearError> {
    let parent = path
        .parent()
        .ok_or_else(|| GearError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| GearError::Filesystem(err.to_string()))?;
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|err| GearError::Filesystem(err.to_string()))?;
    io::copy(reader, temp.as_file_mut())
        .map_err(|err| GearError::Filesystem(format!("write {}: {err}", path.display())))?;
    temp.persist(path)
        .map_err(|err| GearError::Filesystem(err.to_string()))?;
    Ok(())
}
