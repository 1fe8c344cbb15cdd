#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::{Value, json};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use gear_utils::domain::{
    Acquisition, Analysis, Destination, Project, RemoteFile, Session, Subject,
};
use gear_utils::error::GearError;
use gear_utils::platform::PlatformClient;
use gear_utils::progress::{Level, ProgressEvent, ProgressSink};

/// In-memory platform tree. Downloads write the bytes registered under the
/// file name (or a placeholder) and are recorded in call order.
#[derive(Default)]
pub struct MockPlatform {
    pub sessions: Vec<Session>,
    pub acquisitions: BTreeMap<String, Vec<Acquisition>>,
    pub files: BTreeMap<String, Vec<RemoteFile>>,
    pub analyses: Vec<Analysis>,
    pub projects: BTreeMap<String, Project>,
    pub destinations: BTreeMap<String, Destination>,
    pub subjects: BTreeMap<String, Subject>,
    pub contents: BTreeMap<String, Vec<u8>>,
    pub downloads: Mutex<Vec<String>>,
    pub tags: Mutex<Vec<String>>,
}

impl MockPlatform {
    pub fn with_session(mut self, id: &str, label: &str) -> Self {
        self.sessions.push(Session {
            id: id.to_string(),
            label: label.to_string(),
        });
        self
    }

    pub fn with_acquisition(mut self, session_id: &str, acquisition: Acquisition) -> Self {
        self.acquisitions
            .entry(session_id.to_string())
            .or_default()
            .push(acquisition);
        self
    }

    pub fn with_file(mut self, acquisition_id: &str, file: RemoteFile) -> Self {
        self.files
            .entry(acquisition_id.to_string())
            .or_default()
            .push(file);
        self
    }

    pub fn with_content(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.contents.insert(name.to_string(), bytes);
        self
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

impl PlatformClient for MockPlatform {
    fn destination(&self, id: &str) -> Result<Destination, GearError> {
        self.destinations
            .get(id)
            .cloned()
            .ok_or_else(|| GearError::PlatformStatus {
                status: 404,
                message: format!("container {id} not found"),
            })
    }

    fn subject(&self, id: &str) -> Result<Subject, GearError> {
        self.subjects
            .get(id)
            .cloned()
            .ok_or_else(|| GearError::PlatformStatus {
                status: 404,
                message: format!("subject {id} not found"),
            })
    }

    fn sessions(&self, _subject: &Subject) -> Result<Vec<Session>, GearError> {
        Ok(self.sessions.clone())
    }

    fn acquisitions(&self, session: &Session) -> Result<Vec<Acquisition>, GearError> {
        Ok(self.acquisitions.get(&session.id).cloned().unwrap_or_default())
    }

    fn files(&self, acquisition: &Acquisition) -> Result<Vec<RemoteFile>, GearError> {
        let mut files = self.files.get(&acquisition.id).cloned().unwrap_or_default();
        for file in &mut files {
            file.parent = acquisition.container();
        }
        Ok(files)
    }

    fn analysis(&self, id: &str) -> Result<Analysis, GearError> {
        self.analyses
            .iter()
            .find(|analysis| analysis.id == id)
            .cloned()
            .ok_or_else(|| GearError::PlatformStatus {
                status: 404,
                message: format!("analysis {id} not found"),
            })
    }

    fn analyses(&self, _subject: &Subject) -> Result<Vec<Analysis>, GearError> {
        Ok(self.analyses.clone())
    }

    fn project(&self, id: &str) -> Result<Project, GearError> {
        self.projects
            .get(id)
            .cloned()
            .ok_or_else(|| GearError::PlatformStatus {
                status: 404,
                message: format!("project {id} not found"),
            })
    }

    fn download(&self, file: &RemoteFile, destination: &Path) -> Result<(), GearError> {
        let bytes = self
            .contents
            .get(&file.name)
            .cloned()
            .unwrap_or_else(|| b"data".to_vec());
        fs::write(destination, bytes).map_err(|err| GearError::Filesystem(err.to_string()))?;
        self.downloads.lock().unwrap().push(file.name.clone());
        Ok(())
    }

    fn add_subject_tag(&self, _subject: &Subject, tag: &str) -> Result<(), GearError> {
        self.tags.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .map(|event| event.message)
            .collect()
    }
}

pub fn subject() -> Subject {
    Subject {
        id: "sub-id".to_string(),
        label: "101101".to_string(),
        tags: Vec::new(),
    }
}

pub fn acquisition(id: &str, label: &str) -> Acquisition {
    Acquisition {
        id: id.to_string(),
        label: label.to_string(),
        info: Value::Null,
    }
}

/// A BIDS-curated file destined for `<path>/<name>`.
pub fn bids_file(name: &str, folder: &str, path: &str) -> RemoteFile {
    RemoteFile {
        name: name.to_string(),
        file_type: Some("nifti".to_string()),
        info: json!({
            "BIDS": {
                "Folder": folder,
                "Path": path,
                "Filename": name,
                "ignore": false,
                "valid": true
            }
        }),
        ..RemoteFile::default()
    }
}

pub fn dicom_file(name: &str, series: i64) -> RemoteFile {
    RemoteFile {
        name: name.to_string(),
        file_type: Some("dicom".to_string()),
        info: json!({
            "header": {"dicom": {"SeriesNumber": series}},
            "BIDS": {"Folder": "sourcedata"}
        }),
        ..RemoteFile::default()
    }
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
