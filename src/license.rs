use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::domain::Project;
use crate::error::GearError;
use crate::progress::ProgressSink;

pub const LICENSE_INFO_KEY: &str = "FREESURFER_LICENSE";
pub const FREESURFER_HOME_ENV: &str = "FREESURFER_HOME";
const LICENSE_FILE: &str = "license.txt";

/// License text stored in the project's custom information, one token per
/// line as FreeSurfer expects it.
pub fn license_text(project: &Project) -> Option<String> {
    let raw = project.info.get(LICENSE_INFO_KEY).and_then(Value::as_str)?;
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join("\n"))
}

/// Writes the project's FreeSurfer license to `<freesurfer_home>/license.txt`.
pub fn install_freesurfer_license(
    project: &Project,
    freesurfer_home: &Path,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, GearError> {
    let Some(license) = license_text(project) else {
        sink.error("Could not locate FreeSurfer license in project metadata".to_string());
        return Err(GearError::LicenseNotFound);
    };
    sink.info("Using FreeSurfer license in project info".to_string());

    fs::create_dir_all(freesurfer_home)
        .map_err(|err| GearError::Filesystem(format!("create {}: {err}", freesurfer_home.display())))?;
    let license_path = freesurfer_home.join(LICENSE_FILE);
    fs::write(&license_path, license)
        .map_err(|err| GearError::Filesystem(format!("write {}: {err}", license_path.display())))?;
    sink.debug(format!("Wrote license to {}", license_path.display()));
    Ok(license_path)
}

/// Reads `FREESURFER_HOME` from the environment.
pub fn freesurfer_home() -> Result<PathBuf, GearError> {
    std::env::var_os(FREESURFER_HOME_ENV)
        .map(PathBuf::from)
        .ok_or_else(|| GearError::MissingEnv(FREESURFER_HOME_ENV.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn license_tokens_one_per_line() {
        let project = Project {
            info: json!({ "FREESURFER_LICENSE": "user@example.org 12345 *Abc  FSxyz" }),
            ..Project::default()
        };
        assert_eq!(
            license_text(&project).as_deref(),
            Some("user@example.org\n12345\n*Abc\nFSxyz")
        );
    }

    #[test]
    fn blank_license_counts_as_missing() {
        let project = Project {
            info: json!({ "FREESURFER_LICENSE": "   " }),
            ..Project::default()
        };
        assert!(license_text(&project).is_none());
        assert!(license_text(&Project::default()).is_none());
    }
}
