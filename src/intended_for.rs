//! Rewrites the `IntendedFor` field of fieldmap sidecars.
//!
//! Sidecars stored on the platform do not carry `IntendedFor`; the list lives
//! in the file's metadata instead, or is derived from what ended up on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::domain::RemoteFile;
use crate::error::GearError;
use crate::fs_util::{list_dir, write_json_atomic};
use crate::progress::ProgressSink;

pub const FMAP_FOLDER: &str = "fmap";
const INTENDED_FOR: &str = "IntendedFor";

pub fn is_nifti(path: &str) -> bool {
    path.ends_with(".nii") || path.ends_with(".nii.gz")
}

/// Keeps the NIfTI entries of `entries`, preserving their order.
pub fn filter_nifti<'a, I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    entries
        .into_iter()
        .filter(|entry| is_nifti(entry))
        .map(str::to_string)
        .collect()
}

/// Copies the NIfTI entries of the remote file's `IntendedFor` metadata into
/// the downloaded sidecar, replacing whatever was there.
pub fn populate_intended_for(
    file: &RemoteFile,
    sidecar: &Path,
    sink: &dyn ProgressSink,
) -> Result<Vec<String>, GearError> {
    sink.debug(format!("Populating IntendedFor of: {}", sidecar.display()));

    let original: Vec<&str> = file
        .intended_for()
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if original.is_empty() {
        sink.warn("Original IntendedFor field in metadata empty".to_string());
        sink.warn(format!("file: {}", file.name));
    }

    let intended_for = filter_nifti(original);
    if intended_for.is_empty() {
        sink.warn("Filtered IntendedFor field empty".to_string());
    }

    rewrite_sidecar(sidecar, &intended_for)?;
    Ok(intended_for)
}

/// Fills every `fmap/*.json` sidecar under `subject_dir` with all NIfTI files
/// found in the `modalities` folders of the same session.
///
/// Sessions are the `ses-*` directories, or the subject directory itself when
/// there are none. Entries are relative to the session root and sorted. Any
/// existing `IntendedFor` content is discarded. Returns the number of sidecars
/// rewritten.
pub fn post_populate_intended_for(
    subject_dir: &Path,
    modalities: &[String],
    sink: &dyn ProgressSink,
) -> Result<usize, GearError> {
    sink.info(format!(
        "Post populating fmap IntendedFor fields with all files from: {modalities:?}"
    ));
    if !subject_dir.is_dir() {
        sink.warn(format!(
            "Subject directory does not exist: {}",
            subject_dir.display()
        ));
        return Ok(0);
    }

    let mut sessions: Vec<PathBuf> = list_dir(subject_dir)?
        .into_iter()
        .filter(|path| path.is_dir() && file_name(path).starts_with("ses-"))
        .collect();
    if sessions.is_empty() {
        sessions.push(subject_dir.to_path_buf());
    }

    let mut rewritten = 0;
    for session in &sessions {
        let intended_for = collect_session_niftis(session, modalities, sink)?;
        if intended_for.is_empty() {
            sink.warn("Filtered IntendedFor field empty".to_string());
        }

        let fmap_dir = session.join(FMAP_FOLDER);
        if !fmap_dir.is_dir() {
            continue;
        }
        for sidecar in list_dir(&fmap_dir)? {
            let is_json = sidecar.extension().map(|ext| ext == "json").unwrap_or(false);
            if !sidecar.is_file() || !is_json {
                continue;
            }
            sink.debug(format!("Editing sidecar: {}", sidecar.display()));
            rewrite_sidecar(&sidecar, &intended_for)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

fn collect_session_niftis(
    session: &Path,
    modalities: &[String],
    sink: &dyn ProgressSink,
) -> Result<Vec<String>, GearError> {
    let mut intended_for = Vec::new();
    for folder in list_dir(session)? {
        let folder_name = file_name(&folder);
        if !folder.is_dir()
            || folder_name == FMAP_FOLDER
            || !modalities.iter().any(|modality| *modality == folder_name)
        {
            continue;
        }
        for image in list_dir(&folder)? {
            let image_name = file_name(&image);
            if image.is_file() && image_name.contains(".nii") {
                let relative = format!("{folder_name}/{image_name}");
                sink.debug(format!("Located {relative}"));
                intended_for.push(relative);
            }
        }
    }
    intended_for.sort();
    Ok(intended_for)
}

fn rewrite_sidecar(sidecar: &Path, intended_for: &[String]) -> Result<(), GearError> {
    let content = fs::read_to_string(sidecar)
        .map_err(|err| GearError::Filesystem(format!("read {}: {err}", sidecar.display())))?;
    let mut decoded: Value =
        serde_json::from_str(&content).map_err(|err| GearError::InvalidJson {
            path: sidecar.to_path_buf(),
            message: err.to_string(),
        })?;
    let Some(fields) = decoded.as_object_mut() else {
        return Err(GearError::InvalidJson {
            path: sidecar.to_path_buf(),
            message: "sidecar is not a JSON object".to_string(),
        });
    };
    fields.insert(
        INTENDED_FOR.to_string(),
        Value::from(intended_for.to_vec()),
    );
    write_json_atomic(sidecar, &decoded)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
