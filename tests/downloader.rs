mod common;

use std::fs;
use std::path::Path;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use gear_utils::classify::{ClassifierRules, IgnorePrecedence};
use gear_utils::domain::RemoteFile;
use gear_utils::downloader::{BidsDownloadOptions, Downloader};
use gear_utils::error::GearError;
use gear_utils::progress::Level;

use common::{MockPlatform, RecordingSink, acquisition, bids_file, dicom_file, subject, zip_bytes};

const ANAT: &str = "sub-101101_ses-baseline_T1w.nii.gz";
const BOLD: &str = "sub-101101_ses-baseline_task-rest_bold.nii.gz";
const PHASEDIFF: &str = "sub-101101_ses-followup_phasediff.json";

fn fmap_sidecar() -> RemoteFile {
    let mut file = bids_file(PHASEDIFF, "fmap", "sub-101101/ses-followup/fmap");
    file.info["IntendedFor"] = json!([
        "ses-followup/func/sub-101101_ses-followup_task-rest_bold.nii.gz",
        "ses-followup/func/sub-101101_ses-followup_task-rest_bold.json"
    ]);
    file
}

fn two_session_platform() -> MockPlatform {
    MockPlatform::default()
        .with_session("s1", "baseline")
        .with_session("s2", "followup")
        .with_acquisition("s1", acquisition("a1", "T1w"))
        .with_acquisition("s1", acquisition("a2", "rest"))
        .with_acquisition("s1", acquisition("a3", "dicoms"))
        .with_acquisition("s2", acquisition("a4", "fieldmap"))
        .with_file("a1", bids_file(ANAT, "anat", "sub-101101/ses-baseline/anat"))
        .with_file("a2", bids_file(BOLD, "func", "sub-101101/ses-baseline/func"))
        .with_file("a3", dicom_file("4 - T1w.dicom.zip", 4))
        .with_file("a4", fmap_sidecar())
        .with_content(PHASEDIFF, br#"{"EchoTime1": 0.0049}"#.to_vec())
}

fn modalities(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn dry_run_reports_milestones_without_downloading() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(two_session_platform(), ClassifierRules::default());
    let sink = RecordingSink::default();
    let options = BidsDownloadOptions {
        dry_run: true,
        post_populate: None,
    };

    let summary = downloader
        .download_by_modality(
            &subject(),
            &modalities(&["anat", "func"]),
            temp.path(),
            &options,
            &sink,
        )
        .unwrap();

    assert_eq!(summary.located, 2);
    assert!(summary.downloaded.is_empty());
    assert!(downloader.client().downloaded().is_empty());
    assert_eq!(
        sink.messages(Level::Info),
        vec![
            "Dry run: data will not be downloaded",
            "Found 2 sessions",
            "Finished downloading modalities"
        ]
    );
    assert!(sink.messages(Level::Warn).is_empty());
    assert!(fs::read_dir(temp.path()).unwrap().next().is_none());
}

#[test]
fn downloads_requested_modalities_and_fills_fieldmaps() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(two_session_platform(), ClassifierRules::default());
    let sink = RecordingSink::default();

    let summary = downloader
        .download_by_modality(
            &subject(),
            &modalities(&["anat", "fmap"]),
            temp.path(),
            &BidsDownloadOptions::default(),
            &sink,
        )
        .unwrap();

    assert_eq!(downloader.client().downloaded(), vec![ANAT, PHASEDIFF]);
    assert_eq!(summary.located, 2);
    let anat = temp.path().join("sub-101101/ses-baseline/anat").join(ANAT);
    let sidecar = temp.path().join("sub-101101/ses-followup/fmap").join(PHASEDIFF);
    assert_eq!(summary.downloaded, vec![anat.clone(), sidecar.clone()]);
    assert!(anat.is_file());

    assert_eq!(
        read_json(&sidecar),
        json!({
            "EchoTime1": 0.0049,
            "IntendedFor": ["ses-followup/func/sub-101101_ses-followup_task-rest_bold.nii.gz"]
        })
    );
    assert_eq!(
        sink.messages(Level::Info)[0],
        "Attempting to download modalities: [\"anat\", \"fmap\"]"
    );
}

#[test]
fn files_already_present_are_not_downloaded_again() {
    let temp = tempfile::tempdir().unwrap();
    let existing = temp.path().join("sub-101101/ses-baseline/anat").join(ANAT);
    fs::create_dir_all(existing.parent().unwrap()).unwrap();
    fs::write(&existing, b"local copy").unwrap();

    let downloader = Downloader::new(two_session_platform(), ClassifierRules::default());
    let summary = downloader
        .download_by_modality(
            &subject(),
            &modalities(&["anat"]),
            temp.path(),
            &BidsDownloadOptions::default(),
            &RecordingSink::default(),
        )
        .unwrap();

    assert_eq!(summary.located, 1);
    assert!(summary.downloaded.is_empty());
    assert!(downloader.client().downloaded().is_empty());
    assert_eq!(fs::read(&existing).unwrap(), b"local copy");
}

#[test]
fn post_population_uses_files_on_disk() {
    let temp = tempfile::tempdir().unwrap();
    let bids_dir = temp.path().join("bids");
    let mut sidecar = bids_file(
        "sub-101101_ses-baseline_phasediff.json",
        "fmap",
        "sub-101101/ses-baseline/fmap",
    );
    sidecar.info["IntendedFor"] = json!(["ses-baseline/anat/stale.nii.gz"]);
    let platform = MockPlatform::default()
        .with_session("s1", "baseline")
        .with_acquisition("s1", acquisition("a1", "rest"))
        .with_acquisition("s1", acquisition("a2", "fieldmap"))
        .with_file("a1", bids_file(BOLD, "func", "sub-101101/ses-baseline/func"))
        .with_file("a2", sidecar)
        .with_content("sub-101101_ses-baseline_phasediff.json", b"{}".to_vec());
    let downloader = Downloader::new(platform, ClassifierRules::default());
    let options = BidsDownloadOptions {
        dry_run: false,
        post_populate: Some(modalities(&["func"])),
    };

    downloader
        .download_by_modality(
            &subject(),
            &modalities(&["func", "fmap"]),
            &bids_dir,
            &options,
            &RecordingSink::default(),
        )
        .unwrap();

    let written = read_json(
        &bids_dir.join("sub-101101/ses-baseline/fmap/sub-101101_ses-baseline_phasediff.json"),
    );
    assert_eq!(written, json!({ "IntendedFor": [format!("func/{BOLD}")] }));
}

#[test]
fn filename_patterns_select_files() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(two_session_platform(), ClassifierRules::default());
    let sink = RecordingSink::default();

    let summary = downloader
        .download_by_filename(
            &subject(),
            &modalities(&[r"_T1w\.nii"]),
            temp.path(),
            false,
            &sink,
        )
        .unwrap();

    assert_eq!(summary.located, 1);
    assert_eq!(downloader.client().downloaded(), vec![ANAT]);
    assert_eq!(
        sink.messages(Level::Info).last().map(String::as_str),
        Some("Finished downloading individual files")
    );
}

#[test]
fn invalid_filename_pattern_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(two_session_platform(), ClassifierRules::default());
    let err = downloader
        .download_by_filename(
            &subject(),
            &modalities(&["(unclosed"]),
            temp.path(),
            false,
            &RecordingSink::default(),
        )
        .unwrap_err();
    assert_matches!(err, GearError::InvalidPattern { pattern, .. } if pattern == "(unclosed");
}

#[test]
fn acquisition_ignore_can_defer_to_file_flags() {
    let temp = tempfile::tempdir().unwrap();
    let mut ignored = acquisition("a1", "T1w");
    ignored.info = json!({"BIDS": {"ignore": true}});
    let platform = || {
        MockPlatform::default()
            .with_session("s1", "baseline")
            .with_acquisition("s1", ignored.clone())
            .with_file("a1", bids_file(ANAT, "anat", "sub-101101/ses-baseline/anat"))
    };

    let strict = Downloader::new(platform(), ClassifierRules::default());
    let summary = strict
        .download_by_modality(
            &subject(),
            &modalities(&["anat"]),
            temp.path(),
            &BidsDownloadOptions::default(),
            &RecordingSink::default(),
        )
        .unwrap();
    assert_eq!(summary.located, 0);

    let lenient = Downloader::new(
        platform(),
        ClassifierRules {
            check_valid: false,
            acquisition_ignore: IgnorePrecedence::FileOnly,
        },
    );
    let summary = lenient
        .download_by_modality(
            &subject(),
            &modalities(&["anat"]),
            temp.path(),
            &BidsDownloadOptions::default(),
            &RecordingSink::default(),
        )
        .unwrap();
    assert_eq!(summary.located, 1);
}

fn series_platform() -> MockPlatform {
    let mut t1w = bids_file("sub-101101_T1w.nii.gz", "anat", "sub-101101/anat");
    t1w.info["SeriesNumber"] = json!(4);
    let mut bold = bids_file("sub-101101_task-rest_bold.nii.gz", "func", "sub-101101/func");
    bold.info["SeriesNumber"] = json!(5);

    MockPlatform::default()
        .with_session("s1", "baseline")
        .with_acquisition("s1", acquisition("a1", "T1w MPRAGE"))
        .with_acquisition("s1", acquisition("a2", "rest"))
        .with_file("a1", dicom_file("3 - localizer.dicom.zip", 3))
        .with_file("a1", t1w)
        .with_file("a1", dicom_file("4 - T1w MPRAGE.dicom.zip", 4))
        .with_file("a2", bold)
        .with_file("a2", dicom_file("5 - rest.dicom.zip", 5))
        .with_content(
            "4 - T1w MPRAGE.dicom.zip",
            zip_bytes(&[("1.dcm", "slice one"), ("2.dcm", "slice two")]),
        )
}

#[test]
fn matching_series_fetches_dicom_with_same_series_number() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(series_platform(), ClassifierRules::default());
    let sink = RecordingSink::default();

    let found = downloader
        .download_matching_series(&subject(), &modalities(&["T1w"]), temp.path(), false, &sink)
        .unwrap();

    let series_dir = temp.path().join("4-T1w_MPRAGE");
    assert_eq!(found, vec![series_dir.clone()]);
    assert_eq!(downloader.client().downloaded(), vec!["4 - T1w MPRAGE.dicom.zip"]);
    assert_eq!(fs::read(series_dir.join("2.dcm")).unwrap(), b"slice two");
    assert!(sink.messages(Level::Warn).is_empty());
    assert!(sink
        .messages(Level::Debug)
        .contains(&"Working with a classic DICOM".to_string()));
}

#[test]
fn missing_series_are_reported() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(series_platform(), ClassifierRules::default());
    let sink = RecordingSink::default();

    let found = downloader
        .download_matching_series(
            &subject(),
            &modalities(&["T1w", "FLAIR"]),
            temp.path(),
            false,
            &sink,
        )
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(
        sink.messages(Level::Warn),
        vec![
            "Could not find all the requested DICOM series",
            "Only 1/2 downloaded",
            "Provided strings: [\"T1w\", \"FLAIR\"]"
        ]
    );
}

#[test]
fn series_without_matching_dicom_is_not_downloaded() {
    let temp = tempfile::tempdir().unwrap();
    let mut t1w = bids_file("sub-101101_T1w.nii.gz", "anat", "sub-101101/anat");
    t1w.info["SeriesNumber"] = json!(4);
    let platform = MockPlatform::default()
        .with_session("s1", "baseline")
        .with_acquisition("s1", acquisition("a1", "T1w"))
        .with_file("a1", t1w)
        .with_file("a1", dicom_file("6 - other.dicom.zip", 6));
    let downloader = Downloader::new(platform, ClassifierRules::default());
    let sink = RecordingSink::default();

    let found = downloader
        .download_matching_series(&subject(), &modalities(&["T1w"]), temp.path(), false, &sink)
        .unwrap();

    assert!(found.is_empty());
    assert!(downloader.client().downloaded().is_empty());
    assert_eq!(
        sink.messages(Level::Warn),
        vec![
            "Could not find all the requested DICOM series",
            "Only 0/1 downloaded",
            "Provided strings: [\"T1w\"]"
        ]
    );
}

#[test]
fn failed_extraction_leaves_no_series_directory() {
    let temp = tempfile::tempdir().unwrap();
    let platform = series_platform().with_content(
        "4 - T1w MPRAGE.dicom.zip",
        zip_bytes(&[("1.dcm", "slice one"), ("1.dcm/2.dcm", "slice two")]),
    );
    let downloader = Downloader::new(platform, ClassifierRules::default());

    let err = downloader
        .download_matching_series(
            &subject(),
            &modalities(&["T1w"]),
            temp.path(),
            false,
            &RecordingSink::default(),
        )
        .unwrap_err();

    assert_matches!(err, GearError::Filesystem(_));
    assert!(temp.path().join("4 - T1w MPRAGE.dicom.zip").is_file());
    let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec!["4 - T1w MPRAGE.dicom.zip"]);
}

#[test]
fn matching_series_dry_run_reports_paths_only() {
    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(series_platform(), ClassifierRules::default());

    let found = downloader
        .download_matching_series(
            &subject(),
            &modalities(&["T1w"]),
            temp.path(),
            true,
            &RecordingSink::default(),
        )
        .unwrap();

    assert_eq!(found, vec![temp.path().join("4-T1w_MPRAGE")]);
    assert!(downloader.client().downloaded().is_empty());
    assert!(!temp.path().join("4-T1w_MPRAGE").exists());
}

#[test]
fn all_series_skips_ignored_labels() {
    let temp = tempfile::tempdir().unwrap();
    let dicom_dir = temp.path().join("dicoms");
    let mut skipped = acquisition("a3", "excluded");
    skipped.info = json!({"BIDS": {"ignore": true}});
    let platform = MockPlatform::default()
        .with_session("s1", "baseline")
        .with_acquisition("s1", acquisition("a1", "AAHead_Scout localizer"))
        .with_acquisition("s1", acquisition("a2", "T1w"))
        .with_acquisition("s1", skipped)
        .with_file("a1", dicom_file("1 - localizer.dicom.zip", 1))
        .with_file("a2", dicom_file("4 - T1w.dicom.zip", 4))
        .with_file("a2", bids_file("sub-101101_T1w.nii.gz", "anat", "sub-101101/anat"))
        .with_file("a3", dicom_file("7 - excluded.dicom.zip", 7))
        .with_content("4 - T1w.dicom.zip", zip_bytes(&[("1.dcm", "dcm")]));
    let downloader = Downloader::new(platform, ClassifierRules::default());

    let series = downloader
        .download_all_series(
            &subject(),
            &modalities(&["LOCALIZER"]),
            temp.path(),
            &dicom_dir,
            false,
            &RecordingSink::default(),
        )
        .unwrap();

    assert_eq!(series, vec![dicom_dir.join("4-T1w")]);
    assert_eq!(downloader.client().downloaded(), vec!["4 - T1w.dicom.zip"]);
    assert!(dicom_dir.join("4-T1w/1.dcm").is_file());
}
