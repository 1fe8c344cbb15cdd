use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Project,
    Subject,
    Session,
    #[default]
    Acquisition,
    Analysis,
}

impl ContainerKind {
    /// Collection segment used by the platform REST routes.
    pub fn route(&self) -> &'static str {
        match self {
            ContainerKind::Project => "projects",
            ContainerKind::Subject => "subjects",
            ContainerKind::Session => "sessions",
            ContainerKind::Acquisition => "acquisitions",
            ContainerKind::Analysis => "analyses",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Project => write!(f, "project"),
            ContainerKind::Subject => write!(f, "subject"),
            ContainerKind::Session => write!(f, "session"),
            ContainerKind::Acquisition => write!(f, "acquisition"),
            ContainerKind::Analysis => write!(f, "analysis"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub id: String,
}

/// Metadata keys where the scanner series number may live, in lookup order.
pub const SERIES_NUMBER_PATHS: &[&[&str]] = &[&["SeriesNumber"], &["header", "dicom", "SeriesNumber"]];

const PULSE_SEQUENCE_PATHS: &[&[&str]] = &[
    &["header", "dicom", "PulseSequenceName"],
    &["PulseSequenceName"],
];

/// Returns the value at the first path that resolves, or `None`.
pub fn lookup<'a>(value: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        path.iter()
            .try_fold(value, |current, key| current.as_object()?.get(*key))
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    #[serde(rename = "type", default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub info: Value,
    #[serde(skip)]
    pub parent: ContainerRef,
}

impl RemoteFile {
    pub fn bids(&self) -> Option<BidsInfo<'_>> {
        self.info
            .get("BIDS")
            .and_then(Value::as_object)
            .map(|raw| BidsInfo { raw })
    }

    pub fn is_dicom(&self) -> bool {
        self.file_type
            .as_deref()
            .map(|kind| kind.eq_ignore_ascii_case("dicom"))
            .unwrap_or(false)
    }

    pub fn series_number(&self) -> Option<i64> {
        match lookup(&self.info, SERIES_NUMBER_PATHS)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Enhanced DICOMs carry a `PulseSequenceName`; classic ones do not.
    pub fn is_enhanced_dicom(&self) -> bool {
        lookup(&self.info, PULSE_SEQUENCE_PATHS)
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn intended_for(&self) -> Option<&Vec<Value>> {
        self.info.get("IntendedFor").and_then(Value::as_array)
    }
}

/// Read-only view over a file's `info.BIDS` mapping.
#[derive(Debug, Clone, Copy)]
pub struct BidsInfo<'a> {
    raw: &'a Map<String, Value>,
}

impl<'a> BidsInfo<'a> {
    pub fn folder(&self) -> Option<&'a str> {
        self.raw.get("Folder").and_then(Value::as_str)
    }

    pub fn filename(&self) -> Option<&'a str> {
        self.raw.get("Filename").and_then(Value::as_str)
    }

    pub fn path(&self) -> Option<&'a str> {
        self.raw.get("Path").and_then(Value::as_str)
    }

    pub fn ignore(&self) -> Option<bool> {
        self.raw.get("ignore").and_then(Value::as_bool)
    }

    pub fn valid(&self) -> Option<bool> {
        self.raw.get("valid").and_then(Value::as_bool)
    }

    pub fn error_message(&self) -> Option<&'a str> {
        self.raw
            .get("error_message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Acquisition {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub info: Value,
}

impl Acquisition {
    pub fn container(&self) -> ContainerRef {
        ContainerRef {
            kind: ContainerKind::Acquisition,
            id: self.id.clone(),
        }
    }

    pub fn bids_ignore(&self) -> bool {
        lookup(&self.info, &[&["BIDS", "ignore"]])
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Subject {
    /// Directory name of the subject inside a BIDS tree.
    pub fn bids_label(&self) -> String {
        format!("sub-{}", self.label)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GearInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config: Value,
}

impl Job {
    /// The `gear-export` flag from the job's gear configuration, if set.
    pub fn export_flag(&self) -> Option<bool> {
        lookup(&self.config, &[&["config", "gear-export"]]).and_then(Value::as_bool)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub gear_info: Option<GearInfo>,
    #[serde(default)]
    pub job: Option<Job>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

impl Analysis {
    pub fn container(&self) -> ContainerRef {
        ContainerRef {
            kind: ContainerKind::Analysis,
            id: self.id.clone(),
        }
    }

    pub fn gear_name(&self) -> &str {
        self.gear_info
            .as_ref()
            .map(|info| info.name.as_str())
            .unwrap_or("")
    }

    pub fn gear_version(&self) -> &str {
        self.gear_info
            .as_ref()
            .map(|info| info.version.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

impl Project {
    pub fn container(&self) -> ContainerRef {
        ContainerRef {
            kind: ContainerKind::Project,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parents {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

/// The container a gear run writes into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub container_type: String,
    pub parent: ContainerRef,
    #[serde(default)]
    pub parents: Parents,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
