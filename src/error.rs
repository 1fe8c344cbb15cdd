use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GearError {
    #[error("platform request failed: {0}")]
    PlatformHttp(String),

    #[error("platform returned status {status}: {message}")]
    PlatformStatus { status: u16, message: String },

    #[error("invalid api key: {0}")]
    InvalidApiKey(String),

    #[error("missing config file config.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("could not query system resources: {0}")]
    Resources(String),

    #[error("invalid JSON in {path}: {message}")]
    InvalidJson { path: PathBuf, message: String },

    #[error("invalid search pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("could not locate required file: {0}")]
    #[diagnostic(help("check the search term against the file names on the platform"))]
    MissingRequiredFile(String),

    #[error("no successful {0} runs were found")]
    NoSuccessfulRuns(String),

    #[error("no successful {gear} runs survived tag filtering with '{tag}'")]
    NoTaggedRuns { gear: String, tag: String },

    #[error("archive is empty: {0}")]
    EmptyArchive(PathBuf),

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("could not isolate platform versioning in gear name: {0}")]
    VersionNotFound(String),

    #[error("FreeSurfer license could not be located in project info")]
    #[diagnostic(help(
        "add FREESURFER_LICENSE to the project's custom information with the contents of license.txt"
    ))]
    LicenseNotFound,

    #[error("environment variable not set: {0}")]
    MissingEnv(String),

    #[error("destination {0} does not point to a valid container")]
    InvalidDestination(String),

    #[error("destination is a {found} container, expected {expected}")]
    WrongContainerType { expected: String, found: String },

    #[error("destination parent is a {found}, expected {expected}")]
    WrongRunLevel { expected: String, found: String },
}
