use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Value, json};

use crate::config::GearManifest;
use crate::domain::Subject;
use crate::error::GearError;
use crate::platform::PlatformClient;
use crate::progress::ProgressSink;

const BIDS_DIR: &str = "bids";
const DESCRIPTION_FILE: &str = "dataset_description.json";
const README_FILE: &str = "README";
const README_LINES: usize = 150;

/// Paths inside a gear's work directory.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    work_dir: Utf8PathBuf,
}

impl WorkLayout {
    pub fn new(work_dir: Utf8PathBuf) -> Self {
        Self { work_dir }
    }

    pub fn from_path(work_dir: &Path) -> Result<Self, GearError> {
        let work_dir = Utf8PathBuf::from_path_buf(work_dir.to_path_buf())
            .map_err(|_| GearError::Filesystem("invalid work directory path".to_string()))?;
        Ok(Self { work_dir })
    }

    pub fn work_dir(&self) -> &Utf8Path {
        &self.work_dir
    }

    pub fn bids_root(&self) -> Utf8PathBuf {
        self.work_dir.join(BIDS_DIR)
    }

    pub fn subject_dir(&self, subject_label: &str) -> Utf8PathBuf {
        self.bids_root().join(format!("sub-{subject_label}"))
    }

    pub fn session_dir(&self, subject_label: &str, session_label: &str) -> Utf8PathBuf {
        self.subject_dir(subject_label)
            .join(format!("ses-{session_label}"))
    }

    pub fn deriv_dir(&self, pipeline: &str, subject_label: &str) -> Utf8PathBuf {
        self.work_dir
            .join(pipeline)
            .join(format!("sub-{subject_label}"))
    }
}

/// Creates `bids/sub-<subject>/ses-<session>/<modality>` for every session of
/// the subject and returns the BIDS root.
pub fn create_bids_dir(
    client: &dyn PlatformClient,
    subject: &Subject,
    modalities: &[String],
    layout: &WorkLayout,
    add_description: bool,
    sink: &dyn ProgressSink,
) -> Result<Utf8PathBuf, GearError> {
    sink.info("Creating bids directory structure...".to_string());
    let sessions = client.sessions(subject)?;
    sink.info(format!("Subject contains {} sessions", sessions.len()));

    for session in &sessions {
        let session_dir = layout.session_dir(&subject.label, &session.label);
        for modality in modalities {
            create_dir(&session_dir.join(modality))?;
        }
    }
    let bids_root = layout.bids_root();
    create_dir(&bids_root)?;
    sink.info(format!("BIDS directory structure created in {}", layout.work_dir()));

    if add_description {
        add_dataset_description(&bids_root, sink)?;
    }
    Ok(bids_root)
}

/// Writes a placeholder `dataset_description.json` (unless one exists) and a
/// filler `README` so BIDS validation passes.
pub fn add_dataset_description(bids_dir: &Utf8Path, sink: &dyn ProgressSink) -> Result<(), GearError> {
    let description_path = bids_dir.join(DESCRIPTION_FILE);
    if !description_path.exists() {
        sink.info(format!("Adding {DESCRIPTION_FILE}"));
        let description = placeholder_description();
        let mut content = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut content, PrettyFormatter::with_indent(b"    "));
        description
            .serialize(&mut serializer)
            .map_err(|err| GearError::Filesystem(err.to_string()))?;
        fs::write(&description_path, content)
            .map_err(|err| GearError::Filesystem(format!("write {description_path}: {err}")))?;
    }

    let readme_path = bids_dir.join(README_FILE);
    fs::write(&readme_path, "Lorem ipsum\n".repeat(README_LINES))
        .map_err(|err| GearError::Filesystem(format!("write {readme_path}: {err}")))?;
    Ok(())
}

fn placeholder_description() -> Value {
    json!({
        "Acknowledgements": "",
        "Authors": ["dummy", "authors"],
        "BIDSVersion": "1.2.0",
        "DatasetDOI": "",
        "Funding": [],
        "HowToAcknowledge": "",
        "License": "",
        "Name": "dummy",
        "ReferencesAndLinks": [],
        "template": "project"
    })
}

/// Where platform versioning sits inside a gear version such as
/// `3.14.2_0.11.0` (`<algorithm>_<wrapper>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPosition {
    /// Wrapper version first: `0.11.0_3.14.2` keeps `3.14.2`.
    First,
    /// Wrapper version second: `3.14.2_0.11.0` keeps `3.14.2`.
    Second,
    /// A single version number; kept as is.
    Single,
    /// Drop the version entirely.
    None,
}

/// Name of the derivative directory for a gear, `<label>-v<version>` with the
/// wrapper version removed according to `position`.
pub fn derivative_name(
    manifest: &GearManifest,
    position: VersionPosition,
) -> Result<String, GearError> {
    let label = &manifest.label;
    let version = &manifest.version;
    let full_name = format!("{label}-v{version}");
    let not_found = || GearError::VersionNotFound(full_name.clone());

    let stripped = match position {
        VersionPosition::None => return Ok(label.clone()),
        VersionPosition::Single => {
            if !version_pattern(r"\d{1,3}\.\d{1,3}\.\d{1,3}")?.is_match(version) {
                return Err(not_found());
            }
            version.clone()
        }
        VersionPosition::First => {
            let wrapper = version_pattern(r"^\d{1,3}\.\d{1,3}\.\d{1,3}_")?;
            let found = wrapper.find(version).ok_or_else(not_found)?;
            version[found.end()..].to_string()
        }
        VersionPosition::Second => {
            let wrapper = version_pattern(r"_\d{1,3}\.\d{1,3}\.\d{1,3}$")?;
            let found = wrapper.find(version).ok_or_else(not_found)?;
            version[..found.start()].to_string()
        }
    };
    Ok(format!("{label}-v{stripped}"))
}

/// Creates `<work_dir>/<derivative_name>/sub-<subject>`.
pub fn create_deriv_dir(
    layout: &WorkLayout,
    manifest: &GearManifest,
    subject_label: &str,
    position: VersionPosition,
    sink: &dyn ProgressSink,
) -> Result<Utf8PathBuf, GearError> {
    let name = match derivative_name(manifest, position) {
        Ok(name) => name,
        Err(err) => {
            sink.error(
                "Could not isolate platform versioning in gear name when stripping it for the BIDS derivative directory"
                    .to_string(),
            );
            return Err(err);
        }
    };
    let deriv_dir = layout.deriv_dir(&name, subject_label);
    create_dir(&deriv_dir)?;
    sink.debug(format!("Derivative directory: {deriv_dir}"));
    Ok(deriv_dir)
}

fn version_pattern(pattern: &str) -> Result<Regex, GearError> {
    Regex::new(pattern).map_err(|err| GearError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

fn create_dir(path: &Utf8Path) -> Result<(), GearError> {
    fs::create_dir_all(path).map_err(|err| GearError::Filesystem(format!("create {path}: {err}")))
}
