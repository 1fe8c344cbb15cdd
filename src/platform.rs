use std::path::Path;

use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::{
    Acquisition, Analysis, ContainerRef, Destination, Project, RemoteFile, Session, Subject,
};
use crate::error::GearError;
use crate::fs_util::write_stream_atomic;
use crate::progress::ProgressSink;

/// The remote research data platform, reduced to the calls the gears make.
///
/// Listings are returned in the order the platform reports them. File
/// listings are fetched fresh on every call.
pub trait PlatformClient: Send + Sync {
    fn destination(&self, id: &str) -> Result<Destination, GearError>;
    fn subject(&self, id: &str) -> Result<Subject, GearError>;
    fn sessions(&self, subject: &Subject) -> Result<Vec<Session>, GearError>;
    fn acquisitions(&self, session: &Session) -> Result<Vec<Acquisition>, GearError>;
    fn files(&self, acquisition: &Acquisition) -> Result<Vec<RemoteFile>, GearError>;
    fn analysis(&self, id: &str) -> Result<Analysis, GearError>;
    fn analyses(&self, subject: &Subject) -> Result<Vec<Analysis>, GearError>;
    fn project(&self, id: &str) -> Result<Project, GearError>;
    fn download(&self, file: &RemoteFile, destination: &Path) -> Result<(), GearError>;
    fn add_subject_tag(&self, subject: &Subject, tag: &str) -> Result<(), GearError>;
}

#[derive(Clone)]
pub struct PlatformHttpClient {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct FileListing {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

impl PlatformHttpClient {
    /// Builds a client from an api key of the form `<host>[:<port>]:<secret>`.
    pub fn new(api_key: &str) -> Result<Self, GearError> {
        let (host, _secret) = api_key
            .rsplit_once(':')
            .filter(|(host, secret)| !host.is_empty() && !secret.is_empty())
            .ok_or_else(|| GearError::InvalidApiKey("expected <host>:<key>".to_string()))?;
        let base_url = Url::parse(&format!("https://{host}/api/"))
            .map_err(|err| GearError::InvalidApiKey(err.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gear-utils/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GearError::PlatformHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&format!("scitran-user {api_key}"))
            .map_err(|err| GearError::InvalidApiKey(err.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| GearError::PlatformHttp(err.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GearError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GearError::PlatformHttp("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn handle_status(response: Response) -> Result<Response, GearError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "platform request failed".to_string());
        Err(GearError::PlatformStatus { status, message })
    }

    fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, GearError> {
        let url = self.endpoint(segments)?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| GearError::PlatformHttp(err.to_string()))?;
        Self::handle_status(response)?
            .json()
            .map_err(|err| GearError::PlatformHttp(err.to_string()))
    }
}

fn adopt_files(files: &mut [RemoteFile], parent: ContainerRef) {
    for file in files {
        file.parent = parent.clone();
    }
}

impl PlatformClient for PlatformHttpClient {
    fn destination(&self, id: &str) -> Result<Destination, GearError> {
        self.get_json(&["containers", id])
    }

    fn subject(&self, id: &str) -> Result<Subject, GearError> {
        self.get_json(&["subjects", id])
    }

    fn sessions(&self, subject: &Subject) -> Result<Vec<Session>, GearError> {
        self.get_json(&["subjects", &subject.id, "sessions"])
    }

    fn acquisitions(&self, session: &Session) -> Result<Vec<Acquisition>, GearError> {
        self.get_json(&["sessions", &session.id, "acquisitions"])
    }

    fn files(&self, acquisition: &Acquisition) -> Result<Vec<RemoteFile>, GearError> {
        let mut listing: FileListing = self.get_json(&["acquisitions", &acquisition.id])?;
        adopt_files(&mut listing.files, acquisition.container());
        Ok(listing.files)
    }

    fn analysis(&self, id: &str) -> Result<Analysis, GearError> {
        let mut analysis: Analysis = self.get_json(&["analyses", id])?;
        let parent = analysis.container();
        adopt_files(&mut analysis.files, parent);
        Ok(analysis)
    }

    fn analyses(&self, subject: &Subject) -> Result<Vec<Analysis>, GearError> {
        let mut analyses: Vec<Analysis> = self.get_json(&["subjects", &subject.id, "analyses"])?;
        for analysis in &mut analyses {
            let parent = analysis.container();
            adopt_files(&mut analysis.files, parent);
        }
        Ok(analyses)
    }

    fn project(&self, id: &str) -> Result<Project, GearError> {
        let mut project: Project = self.get_json(&["projects", id])?;
        let parent = project.container();
        adopt_files(&mut project.files, parent);
        Ok(project)
    }

    fn download(&self, file: &RemoteFile, destination: &Path) -> Result<(), GearError> {
        let url = self.endpoint(&[
            file.parent.kind.route(),
            &file.parent.id,
            "files",
            &file.name,
        ])?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| GearError::PlatformHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;

        write_stream_atomic(&mut response, destination)
    }

    fn add_subject_tag(&self, subject: &Subject, tag: &str) -> Result<(), GearError> {
        let url = self.endpoint(&["subjects", &subject.id, "tags"])?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "value": tag }))
            .send()
            .map_err(|err| GearError::PlatformHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }
}

/// Confirms the gear writes into a `gear_type` container whose parent is a
/// `which_level` container.
pub fn check_run_level(
    client: &dyn PlatformClient,
    destination_id: &str,
    which_level: &str,
    gear_type: &str,
    sink: &dyn ProgressSink,
) -> Result<Destination, GearError> {
    let destination = match client.destination(destination_id) {
        Ok(destination) => destination,
        Err(err) => {
            sink.error(format!(
                "The destination id does not point to a valid {gear_type} container"
            ));
            sink.error(err.to_string());
            return Err(GearError::InvalidDestination(destination_id.to_string()));
        }
    };

    if destination.container_type != gear_type {
        sink.error(format!(
            "The destination ID does not point to a valid {gear_type} container"
        ));
        return Err(GearError::WrongContainerType {
            expected: gear_type.to_string(),
            found: destination.container_type,
        });
    }

    let parent_kind = destination.parent.kind.to_string();
    if parent_kind != which_level {
        sink.error(format!("Destination type is {parent_kind}"));
        sink.error(format!("Expected {which_level}"));
        return Err(GearError::WrongRunLevel {
            expected: which_level.to_string(),
            found: parent_kind,
        });
    }

    Ok(destination)
}

/// The subject the destination container hangs off.
pub fn get_subject(
    client: &dyn PlatformClient,
    destination_id: &str,
    sink: &dyn ProgressSink,
) -> Result<Subject, GearError> {
    let destination = client.destination(destination_id)?;
    let subject = client.subject(&destination.parent.id)?;
    sink.info(format!("Subject {} retrieved", subject.label));
    Ok(subject)
}

/// The project a destination belongs to.
pub fn get_project(
    client: &dyn PlatformClient,
    destination_id: &str,
) -> Result<Project, GearError> {
    let destination = client.destination(destination_id)?;
    let project_id = destination
        .parents
        .project
        .ok_or_else(|| GearError::InvalidDestination(destination_id.to_string()))?;
    client.project(&project_id)
}
