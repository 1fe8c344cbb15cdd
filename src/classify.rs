//! Decides whether a remote file is a downloadable BIDS file and where it
//! belongs inside a BIDS tree.

use crate::domain::{Acquisition, RemoteFile};
use crate::progress::ProgressSink;

const SOURCEDATA_FOLDER: &str = "sourcedata";

/// How an acquisition-level `BIDS.ignore` flag interacts with file-level flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IgnorePrecedence {
    /// Only the file's own flag is consulted.
    FileOnly,
    /// An ignored acquisition rejects every file it contains.
    #[default]
    AcquisitionOverrides,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierRules {
    /// Reject files whose `valid` flag is false or absent.
    pub check_valid: bool,
    pub acquisition_ignore: IgnorePrecedence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsTarget {
    pub folder: String,
    pub path: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingBidsInfo,
    NotBidsified { error_message: Option<String> },
    SourceData,
    Ignored,
    AcquisitionIgnored,
    Invalid,
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(BidsTarget),
    Rejected(Rejection),
}

impl Classification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Classification::Accepted(_))
    }

    pub fn accepted(self) -> Option<BidsTarget> {
        match self {
            Classification::Accepted(target) => Some(target),
            Classification::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    rules: ClassifierRules,
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> ClassifierRules {
        self.rules
    }

    pub fn classify(
        &self,
        file: &RemoteFile,
        acquisition: &Acquisition,
        sink: &dyn ProgressSink,
    ) -> Classification {
        let Some(bids) = file.bids() else {
            sink.debug(format!("Not properly BIDSified data: {}", acquisition.label));
            return Classification::Rejected(Rejection::MissingBidsInfo);
        };
        let Some(folder) = bids.folder() else {
            sink.debug(format!("Not properly BIDSified data: {}", acquisition.label));
            return Classification::Rejected(Rejection::MissingBidsInfo);
        };

        if folder.is_empty() {
            sink.debug(format!("Not properly BIDSified data: {}", acquisition.label));
            let error_message = bids.error_message().map(str::to_string);
            if let Some(message) = &error_message {
                sink.debug(format!("BIDS error message: {message}"));
            }
            return Classification::Rejected(Rejection::NotBidsified { error_message });
        }

        // Dicoms are routinely filed under sourcedata; not worth a log line.
        if folder == SOURCEDATA_FOLDER {
            return Classification::Rejected(Rejection::SourceData);
        }

        if bids.ignore() == Some(true) {
            sink.debug(format!("Ignore field True: {}", acquisition.label));
            return Classification::Rejected(Rejection::Ignored);
        }
        if self.rules.acquisition_ignore == IgnorePrecedence::AcquisitionOverrides
            && acquisition.bids_ignore()
        {
            sink.debug(format!(
                "Ignore field True at acquisition level: {}",
                acquisition.label
            ));
            return Classification::Rejected(Rejection::AcquisitionIgnored);
        }

        if self.rules.check_valid && bids.valid() == Some(false) {
            sink.debug(format!("Invalid BIDS data: {}", acquisition.label));
            return Classification::Rejected(Rejection::Invalid);
        }

        if bids.ignore().is_none() {
            sink.debug(format!("No ignore field: {}", acquisition.label));
            return Classification::Rejected(Rejection::MissingField("ignore"));
        }
        if self.rules.check_valid && bids.valid().is_none() {
            sink.debug(format!("No valid field: {}", acquisition.label));
            return Classification::Rejected(Rejection::MissingField("valid"));
        }

        let Some(filename) = bids.filename() else {
            sink.debug(format!("No Filename field: {}", acquisition.label));
            return Classification::Rejected(Rejection::MissingField("Filename"));
        };
        let Some(path) = bids.path() else {
            sink.debug(format!("No Path field: {}", acquisition.label));
            return Classification::Rejected(Rejection::MissingField("Path"));
        };

        Classification::Accepted(BidsTarget {
            folder: folder.to_string(),
            path: path.to_string(),
            filename: filename.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{Value, json};

    use super::*;
    use crate::progress::{Level, ProgressEvent};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for Recorder {
        fn event(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn messages(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|event| event.message.clone())
                .collect()
        }
    }

    fn acquisition() -> Acquisition {
        Acquisition {
            id: "acq".to_string(),
            label: "mock_label".to_string(),
            info: Value::Null,
        }
    }

    fn scan(bids: Value) -> RemoteFile {
        RemoteFile {
            name: "scan.nii.gz".to_string(),
            file_type: Some("nifti".to_string()),
            info: json!({ "BIDS": bids }),
            ..RemoteFile::default()
        }
    }

    fn complete(folder: &str) -> Value {
        json!({
            "Folder": folder,
            "Filename": "sub-101101_ses-101101_echo-5_part-mag_MEGRE.nii.gz",
            "Path": "sub-101101/ses-101101/anat",
            "ignore": false,
        })
    }

    #[test]
    fn accepts_bidsified_file() {
        let sink = Recorder::default();
        let result = Classifier::default().classify(&scan(complete("anat")), &acquisition(), &sink);
        assert_eq!(
            result,
            Classification::Accepted(BidsTarget {
                folder: "anat".to_string(),
                path: "sub-101101/ses-101101/anat".to_string(),
                filename: "sub-101101_ses-101101_echo-5_part-mag_MEGRE.nii.gz".to_string(),
            })
        );
    }

    #[test]
    fn empty_folder_rejected_regardless_of_other_fields() {
        let sink = Recorder::default();
        let mut bids = complete("");
        bids["error_message"] = json!("mocked ERROR");
        bids["valid"] = json!(true);
        let result = Classifier::default().classify(&scan(bids), &acquisition(), &sink);
        assert_eq!(
            result,
            Classification::Rejected(Rejection::NotBidsified {
                error_message: Some("mocked ERROR".to_string())
            })
        );
        assert_eq!(
            sink.messages(),
            vec![
                "Not properly BIDSified data: mock_label",
                "BIDS error message: mocked ERROR"
            ]
        );
    }

    #[test]
    fn missing_bids_info() {
        let sink = Recorder::default();
        let file = RemoteFile {
            name: "bad".to_string(),
            info: json!(""),
            ..RemoteFile::default()
        };
        let result = Classifier::default().classify(&file, &acquisition(), &sink);
        assert_eq!(result, Classification::Rejected(Rejection::MissingBidsInfo));
        assert_eq!(sink.messages(), vec!["Not properly BIDSified data: mock_label"]);
    }

    #[test]
    fn sourcedata_rejected_silently() {
        let sink = Recorder::default();
        let result =
            Classifier::default().classify(&scan(complete("sourcedata")), &acquisition(), &sink);
        assert_eq!(result, Classification::Rejected(Rejection::SourceData));
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn ignore_flag_logs_acquisition_label() {
        let sink = Recorder::default();
        let mut bids = complete("anat");
        bids["ignore"] = json!(true);
        let result = Classifier::default().classify(&scan(bids), &acquisition(), &sink);
        assert_eq!(result, Classification::Rejected(Rejection::Ignored));
        assert_eq!(sink.messages(), vec!["Ignore field True: mock_label"]);
        assert!(
            sink.events
                .lock()
                .unwrap()
                .iter()
                .all(|event| event.level == Level::Debug)
        );
    }

    #[test]
    fn absent_ignore_is_distinct_from_false() {
        let sink = Recorder::default();
        let result = Classifier::default().classify(
            &scan(json!({"Folder": "anat", "Filename": "a.nii.gz", "Path": "p"})),
            &acquisition(),
            &sink,
        );
        assert_eq!(result, Classification::Rejected(Rejection::MissingField("ignore")));
        assert_eq!(sink.messages(), vec!["No ignore field: mock_label"]);
    }

    #[test]
    fn valid_field_rules() {
        let rules = ClassifierRules {
            check_valid: true,
            ..ClassifierRules::default()
        };
        let classifier = Classifier::new(rules);
        let sink = Recorder::default();

        let mut invalid = complete("func");
        invalid["valid"] = json!(false);
        assert_eq!(
            classifier.classify(&scan(invalid), &acquisition(), &sink),
            Classification::Rejected(Rejection::Invalid)
        );
        assert_eq!(
            classifier.classify(&scan(complete("func")), &acquisition(), &sink),
            Classification::Rejected(Rejection::MissingField("valid"))
        );

        let mut valid = complete("func");
        valid["valid"] = json!(true);
        assert!(classifier.classify(&scan(valid), &acquisition(), &sink).is_accepted());

        // Without the rule the field is not consulted.
        let mut unchecked = complete("func");
        unchecked["valid"] = json!(false);
        assert!(
            Classifier::default()
                .classify(&scan(unchecked), &acquisition(), &sink)
                .is_accepted()
        );
    }

    #[test]
    fn acquisition_ignore_precedence() {
        let sink = Recorder::default();
        let ignored = Acquisition {
            info: json!({"BIDS": {"ignore": true}}),
            ..acquisition()
        };
        assert_eq!(
            Classifier::default().classify(&scan(complete("anat")), &ignored, &sink),
            Classification::Rejected(Rejection::AcquisitionIgnored)
        );

        let file_only = Classifier::new(ClassifierRules {
            acquisition_ignore: IgnorePrecedence::FileOnly,
            ..ClassifierRules::default()
        });
        assert!(
            file_only
                .classify(&scan(complete("anat")), &ignored, &sink)
                .is_accepted()
        );
    }
}
