//! Fetching outputs of earlier gear runs and project attachments.

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::domain::{Analysis, Project, RemoteFile, Subject};
use crate::error::GearError;
use crate::fs_util::{ArchiveKind, list_zip, unzip_archive};
use crate::platform::PlatformClient;
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Default)]
pub struct ResultQuery {
    /// Substring of the producing gear's name.
    pub gear_name: String,
    /// Regex matched against output file names.
    pub filename: String,
    /// Job tag a run must carry. Empty means any run.
    pub tag: String,
}

/// Downloads an output of the latest completed run of `query.gear_name` on the
/// subject, extracting it when it is a zip.
///
/// Runs whose job config has a `gear-export` flag different from
/// `export_gear` are skipped. Ties on `created` go to the later listing entry.
pub fn download_previous_result(
    client: &dyn PlatformClient,
    subject: &Subject,
    query: &ResultQuery,
    work_dir: &Path,
    export_gear: bool,
    dry_run: bool,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, GearError> {
    sink.info(format!("Attempting to find previous {} result", query.gear_name));

    let analyses = client.analyses(subject)?;
    let mut runs: Vec<&Analysis> = analyses
        .iter()
        .filter(|analysis| is_completed_run(analysis, &query.gear_name, export_gear))
        .collect();
    if runs.is_empty() {
        sink.error(format!("No successful {} runs were found!", query.gear_name));
        return Err(GearError::NoSuccessfulRuns(query.gear_name.clone()));
    }
    sink.debug(format!("Found {} successful gear runs", runs.len()));

    if !query.tag.is_empty() {
        sink.debug(format!("Filtering runs with tag: {}", query.tag));
        runs.retain(|analysis| {
            analysis
                .job
                .as_ref()
                .map(|job| job.tags.iter().any(|tag| *tag == query.tag))
                .unwrap_or(false)
        });
        if runs.is_empty() {
            sink.error(format!(
                "No successful {} runs found with tag {}",
                query.gear_name, query.tag
            ));
            return Err(GearError::NoTaggedRuns {
                gear: query.gear_name.clone(),
                tag: query.tag.clone(),
            });
        }
    }

    for run in &runs {
        sink.debug(format!(
            "{} {} created {}",
            run.gear_name(),
            run.gear_version(),
            run.created
        ));
    }
    let Some(latest) = runs.into_iter().max_by_key(|analysis| analysis.created) else {
        return Err(GearError::NoSuccessfulRuns(query.gear_name.clone()));
    };
    sink.info(format!("Download results from {}", latest.gear_version()));
    sink.info(format!("Job id for previous results: {}", latest.id));

    fetch_output(client, &latest.files, &query.filename, work_dir, dry_run, sink)
}

fn is_completed_run(analysis: &Analysis, gear_name: &str, export_gear: bool) -> bool {
    let Some(job) = &analysis.job else {
        return false;
    };
    if job.export_flag().is_some_and(|flag| flag != export_gear) {
        return false;
    }
    analysis.gear_name().contains(gear_name) && job.state == "complete"
}

/// Downloads the first output of `analysis` matching `filename`.
pub fn download_specific_result(
    client: &dyn PlatformClient,
    analysis: &Analysis,
    filename: &str,
    work_dir: &Path,
    dry_run: bool,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, GearError> {
    if analysis.files.is_empty() {
        sink.error(format!("Analysis {} has no output files", analysis.id));
        return Err(GearError::MissingRequiredFile(format!(
            "outputs of analysis {}",
            analysis.id
        )));
    }
    fetch_output(client, &analysis.files, filename, work_dir, dry_run, sink)
}

fn fetch_output(
    client: &dyn PlatformClient,
    files: &[RemoteFile],
    filename: &str,
    work_dir: &Path,
    dry_run: bool,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, GearError> {
    let pattern = single_pattern(filename)?;
    let Some(output) = files.iter().find(|file| pattern.is_match(&file.name)) else {
        sink.error("Could not locate requested file.".to_string());
        return Err(GearError::MissingRequiredFile(filename.to_string()));
    };
    sink.info(format!("Found: {}", output.name));

    let path = work_dir.join(&output.name);
    download_once(client, output, &path, sink)?;

    if output.name.ends_with(".zip") {
        unzip_result(&path, work_dir, dry_run, sink)
    } else {
        Ok(path)
    }
}

/// Extracts a result zip into `work_dir` and returns the directory it
/// produced. Nothing is extracted when that directory already exists.
pub fn unzip_result(
    zip: &Path,
    work_dir: &Path,
    dry_run: bool,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, GearError> {
    let listing = list_zip(zip)?;
    if listing.dirs.is_empty() && listing.files.is_empty() {
        sink.error("Zip file is empty!".to_string());
        return Err(GearError::EmptyArchive(zip.to_path_buf()));
    }

    let base = listing
        .dirs
        .iter()
        .chain(listing.files.iter().filter(|name| name.contains('/')))
        .find_map(|entry| first_component(entry))
        .unwrap_or_else(|| name_before_subject(zip));
    let result_dir = work_dir.join(base);

    if result_dir.exists() {
        sink.debug(format!(
            "Unzipped result already exists: {}",
            result_dir.display()
        ));
    } else {
        unzip_archive(zip, work_dir, dry_run)?;
        sink.info(format!("Unzipped {} to {}", zip.display(), work_dir.display()));
    }
    Ok(result_dir)
}

fn first_component(entry: &str) -> Option<String> {
    match Path::new(entry).components().next()? {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }
}

fn name_before_subject(zip: &Path) -> String {
    let name = zip
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find("_sub-") {
        Some(index) => name[..index].to_string(),
        None => name.trim_end_matches(".zip").to_string(),
    }
}

/// Downloads the first project file matching `pattern`, extracting zip and
/// tar.gz archives into `work_dir`.
pub fn download_attachment(
    client: &dyn PlatformClient,
    project: &Project,
    pattern: &str,
    work_dir: &Path,
    dry_run: bool,
    sink: &dyn ProgressSink,
) -> Result<PathBuf, GearError> {
    let regex = single_pattern(pattern)?;
    let Some(attachment) = project.files.iter().find(|file| regex.is_match(&file.name)) else {
        sink.error(format!("Could not locate file using search term: {pattern}"));
        return Err(GearError::MissingRequiredFile(pattern.to_string()));
    };
    sink.info(format!("Located: {}", attachment.name));

    let path = work_dir.join(&attachment.name);
    download_once(client, attachment, &path, sink)?;

    if ArchiveKind::detect(&path).is_some() {
        unzip_archive(&path, work_dir, dry_run)?;
    } else if attachment.name.ends_with(".bz2") {
        sink.warn(format!("bz2 archives are not extracted: {}", attachment.name));
    }
    Ok(path)
}

fn download_once(
    client: &dyn PlatformClient,
    file: &RemoteFile,
    path: &Path,
    sink: &dyn ProgressSink,
) -> Result<(), GearError> {
    if path.is_file() {
        sink.debug(format!("File already downloaded: {}", path.display()));
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| GearError::Filesystem(format!("create {}: {err}", parent.display())))?;
    }
    sink.info(format!("Downloading: {}", file.name));
    client.download(file, path)?;
    sink.info("Successfully downloaded".to_string());
    Ok(())
}

fn single_pattern(pattern: &str) -> Result<Regex, GearError> {
    Regex::new(pattern).map_err(|err| GearError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_name_up_to_subject_label() {
        assert_eq!(
            name_before_subject(Path::new("/w/freesurfer_sub-01_abc.zip")),
            "freesurfer"
        );
        assert_eq!(name_before_subject(Path::new("/w/results.zip")), "results");
    }

    #[test]
    fn first_component_of_entry() {
        assert_eq!(first_component("fmriprep/sub-01/").as_deref(), Some("fmriprep"));
        assert_eq!(first_component("../escape"), None);
    }
}
