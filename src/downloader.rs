//! Walks a subject's sessions and acquisitions and fetches the files a gear
//! needs: BIDS files by modality or filename, and raw DICOM series.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::classify::{BidsTarget, Classifier, ClassifierRules, IgnorePrecedence};
use crate::domain::{Acquisition, RemoteFile, Subject};
use crate::error::GearError;
use crate::fs_util::{ArchiveKind, copy_path, unzip_archive};
use crate::intended_for::{FMAP_FOLDER, populate_intended_for, post_populate_intended_for};
use crate::naming::dicom_unzip_name;
use crate::platform::PlatformClient;
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Default)]
pub struct BidsDownloadOptions {
    pub dry_run: bool,
    /// Modalities whose images fill every fieldmap's `IntendedFor` once the
    /// walk is over. Replaces the per-file population from metadata.
    pub post_populate: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub located: usize,
    pub downloaded: Vec<PathBuf>,
}

pub struct Downloader<C: PlatformClient> {
    client: C,
    classifier: Classifier,
}

impl<C: PlatformClient> Downloader<C> {
    pub fn new(client: C, rules: ClassifierRules) -> Self {
        Self {
            client,
            classifier: Classifier::new(rules),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn download_by_modality(
        &self,
        subject: &Subject,
        modalities: &[String],
        bids_dir: &Path,
        options: &BidsDownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadSummary, GearError> {
        if options.dry_run {
            sink.info("Dry run: data will not be downloaded".to_string());
        } else {
            sink.info(format!("Attempting to download modalities: {modalities:?}"));
        }

        let populate_each = options.post_populate.is_none();
        let summary = self.walk_bids(
            subject,
            bids_dir,
            options.dry_run,
            populate_each,
            |target| modalities.iter().any(|modality| *modality == target.folder),
            sink,
        )?;

        if let Some(post_modalities) = &options.post_populate {
            let subject_dir = bids_dir.join(subject.bids_label());
            post_populate_intended_for(&subject_dir, post_modalities, sink)?;
        }

        sink.info("Finished downloading modalities".to_string());
        Ok(summary)
    }

    pub fn download_by_filename(
        &self,
        subject: &Subject,
        patterns: &[String],
        bids_dir: &Path,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadSummary, GearError> {
        let patterns = compile_patterns(patterns)?;
        if dry_run {
            sink.info("Dry run: data will not be downloaded".to_string());
        }

        let summary = self.walk_bids(
            subject,
            bids_dir,
            dry_run,
            true,
            |target| patterns.iter().any(|pattern| pattern.is_match(&target.filename)),
            sink,
        )?;

        sink.info("Finished downloading individual files".to_string());
        Ok(summary)
    }

    fn walk_bids<F>(
        &self,
        subject: &Subject,
        bids_dir: &Path,
        dry_run: bool,
        populate_fmaps: bool,
        wanted: F,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadSummary, GearError>
    where
        F: Fn(&BidsTarget) -> bool,
    {
        let sessions = self.client.sessions(subject)?;
        sink.info(format!("Found {} sessions", sessions.len()));

        let mut summary = DownloadSummary::default();
        for session in &sessions {
            sink.debug(format!("--- Searching through session: {} ---", session.label));
            for acquisition in self.client.acquisitions(session)? {
                for file in self.client.files(&acquisition)? {
                    let Some(target) = self
                        .classifier
                        .classify(&file, &acquisition, sink)
                        .accepted()
                    else {
                        continue;
                    };
                    if !wanted(&target) {
                        continue;
                    }

                    summary.located += 1;
                    sink.debug(format!("Located: {}", target.filename));
                    let destination = bids_dir.join(&target.path).join(&target.filename);
                    if dry_run || destination.is_file() {
                        continue;
                    }

                    self.fetch(&file, &destination)?;
                    sink.debug(format!("Downloaded: {}", destination.display()));
                    if populate_fmaps && is_fmap_sidecar(&target) {
                        populate_intended_for(&file, &destination, sink)?;
                    }
                    summary.downloaded.push(destination);
                }
            }
        }
        Ok(summary)
    }

    /// Fetches the DICOM series whose number matches a BIDS file named by one
    /// of `targets`, stopping once every target has a series.
    pub fn download_matching_series(
        &self,
        subject: &Subject,
        targets: &[String],
        work_dir: &Path,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<PathBuf>, GearError> {
        let patterns = compile_patterns(targets)?;
        sink.info("Downloading specific DICOM series".to_string());

        let mut found = Vec::new();
        'sessions: for session in self.client.sessions(subject)? {
            for acquisition in self.client.acquisitions(&session)? {
                if self.acquisition_ignored(&acquisition) {
                    sink.debug(format!(
                        "Ignore field True at acquisition level: {}",
                        acquisition.label
                    ));
                    continue;
                }

                let files = self.client.files(&acquisition)?;
                let Some((filename, series)) =
                    self.find_series_key(&files, &acquisition, &patterns, sink)
                else {
                    continue;
                };
                sink.info(format!("Located: {filename}"));

                let Some(dicom) = files
                    .iter()
                    .find(|file| file.is_dicom() && file.series_number() == Some(series))
                else {
                    sink.debug(format!(
                        "No DICOM with series number {series} in {}",
                        acquisition.label
                    ));
                    continue;
                };

                found.push(self.fetch_series(dicom, work_dir, work_dir, dry_run, sink)?);
                if found.len() == targets.len() {
                    break 'sessions;
                }
            }
        }

        if found.len() < targets.len() {
            sink.warn("Could not find all the requested DICOM series".to_string());
            sink.warn(format!("Only {}/{} downloaded", found.len(), targets.len()));
            sink.warn(format!("Provided strings: {targets:?}"));
        }
        Ok(found)
    }

    fn find_series_key(
        &self,
        files: &[RemoteFile],
        acquisition: &Acquisition,
        patterns: &[Regex],
        sink: &dyn ProgressSink,
    ) -> Option<(String, i64)> {
        for file in files {
            let Some(target) = self.classifier.classify(file, acquisition, sink).accepted() else {
                continue;
            };
            if !patterns.iter().any(|pattern| pattern.is_match(&target.filename)) {
                continue;
            }
            match file.series_number() {
                Some(series) => return Some((target.filename, series)),
                None => sink.warn(format!("No SeriesNumber found for {}", target.filename)),
            }
        }
        None
    }

    /// Fetches every DICOM series of the subject except those whose
    /// acquisition label or file name contains one of `ignore`.
    pub fn download_all_series(
        &self,
        subject: &Subject,
        ignore: &[String],
        work_dir: &Path,
        dicom_dir: &Path,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<PathBuf>, GearError> {
        sink.info("Downloading multiple DICOM series".to_string());
        let ignore: Vec<String> = ignore.iter().map(|item| item.to_lowercase()).collect();
        let ignored = |name: &str| {
            let name = name.to_lowercase();
            ignore.iter().any(|item| name.contains(item.as_str()))
        };

        let mut series_dirs = Vec::new();
        for session in self.client.sessions(subject)? {
            for acquisition in self.client.acquisitions(&session)? {
                if ignored(&acquisition.label) {
                    sink.debug(format!("Will not download: {}", acquisition.label));
                    continue;
                }
                if self.acquisition_ignored(&acquisition) {
                    sink.debug(format!(
                        "Ignore field True at acquisition level: {}",
                        acquisition.label
                    ));
                    continue;
                }

                for file in self.client.files(&acquisition)? {
                    if !file.is_dicom() {
                        continue;
                    }
                    if ignored(&file.name) {
                        sink.debug(format!("Will not download: {}", file.name));
                        continue;
                    }
                    sink.info(format!("Found: {}", file.name));
                    series_dirs.push(self.fetch_series(&file, work_dir, dicom_dir, dry_run, sink)?);
                }
            }
        }
        Ok(series_dirs)
    }

    fn acquisition_ignored(&self, acquisition: &Acquisition) -> bool {
        self.classifier.rules().acquisition_ignore == IgnorePrecedence::AcquisitionOverrides
            && acquisition.bids_ignore()
    }

    /// Downloads a series into `download_dir` and unpacks or copies it to
    /// `<series_root>/<dicom_unzip_name>`.
    fn fetch_series(
        &self,
        dicom: &RemoteFile,
        download_dir: &Path,
        series_root: &Path,
        dry_run: bool,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf, GearError> {
        let download_path = download_dir.join(&dicom.name);
        let series_dir = series_root.join(dicom_unzip_name(&dicom.name));
        if dry_run {
            sink.debug(format!("Would download: {}", dicom.name));
            return Ok(series_dir);
        }

        if !download_path.is_file() {
            self.fetch(dicom, &download_path)?;
            sink.debug(format!("Downloaded: {}", download_path.display()));
        }
        if series_dir == download_path || series_dir.exists() {
            return Ok(series_dir);
        }
        if dicom.is_enhanced_dicom() {
            sink.debug("Working with an enhanced DICOM".to_string());
        } else {
            sink.debug("Working with a classic DICOM".to_string());
        }

        // The series directory only appears once fully unpacked.
        fs::create_dir_all(series_root).map_err(|err| {
            GearError::Filesystem(format!("create {}: {err}", series_root.display()))
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".series-")
            .tempdir_in(series_root)
            .map_err(|err| GearError::Filesystem(err.to_string()))?;
        let staged = staging.path().join("series");
        if ArchiveKind::detect(&download_path) == Some(ArchiveKind::Zip) {
            unzip_archive(&download_path, &staged, false)?;
        } else {
            copy_path(&download_path, &staged)?;
        }
        fs::rename(&staged, &series_dir).map_err(|err| {
            GearError::Filesystem(format!("move {}: {err}", series_dir.display()))
        })?;
        sink.debug(format!("Unpacked to: {}", series_dir.display()));
        Ok(series_dir)
    }

    fn fetch(&self, file: &RemoteFile, destination: &Path) -> Result<(), GearError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                GearError::Filesystem(format!("create {}: {err}", parent.display()))
            })?;
        }
        self.client.download(file, destination)
    }
}

fn is_fmap_sidecar(target: &BidsTarget) -> bool {
    target.folder == FMAP_FOLDER && target.filename.ends_with(".json")
}

pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, GearError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| GearError::InvalidPattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })
        })
        .collect()
}
