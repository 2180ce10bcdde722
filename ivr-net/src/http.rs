// ivr-net/src/http.rs
// Remote repository with the filesystem layout served over HTTP. Revisions
// are listed from `<org>/<module>/revisions.json`, a JSON array of strings,
// and modules from `modules.json` at the root, an array of `org#name`.

use std::time::Duration;

use async_trait::async_trait;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, error};
use url::Url;

use crate::fetcher::{parse_fetched_descriptor, select_revision, Fetcher};
use crate::filesystem::DESCRIPTOR_FILENAME;
use crate::validation::validate_url;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "ivr dependency manager (Rust)";
const REVISIONS_FILENAME: &str = "revisions.json";
const MODULES_FILENAME: &str = "modules.json";

pub fn build_http_client(request_timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| IvrError::Network(format!("Failed to build HTTP client: {e}")))
}

#[derive(Debug, Clone)]
pub struct HttpRepository {
    base: Url,
    client: Client,
    name: String,
}

impl HttpRepository {
    pub fn new(base: &str, client: Client) -> Result<Self> {
        let base = validate_url(base)?;
        let name = base.to_string();
        Ok(Self { base, client, name })
    }

    fn url(&self, relative: &str) -> Result<Url> {
        self.base
            .join(relative)
            .map_err(|e| IvrError::Config(format!("cannot build URL for '{relative}': {e}")))
    }

    fn revision_path(module: &ModuleRevision) -> String {
        format!(
            "{}/{}/{}",
            module.id.organisation, module.id.name, module.revision
        )
    }

    /// GET returning the body, `None` on 404.
    async fn get_bytes(&self, url: Url) -> Result<Option<Vec<u8>>> {
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            IvrError::Network(format!("HTTP request failed for {url}: {e}"))
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);

        match status {
            s if s.is_success() => {
                let body = response.bytes().await.map_err(|e| {
                    IvrError::Network(format!("Failed to read response body from {url}: {e}"))
                })?;
                Ok(Some(body.to_vec()))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            s => {
                let body_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Failed to read response body".to_string());
                error!("HTTP error {} for URL {}: {}", s, url, body_text);
                Err(IvrError::Network(format!("HTTP error {s} for URL {url}")))
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_modules(&self) -> Result<Vec<ModuleId>> {
        let url = self.url(MODULES_FILENAME)?;
        let Some(body) = self.get_bytes(url).await? else {
            return Ok(Vec::new());
        };
        parse_module_list(&body)
    }

    async fn list_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        let url = self.url(&format!(
            "{}/{}/{REVISIONS_FILENAME}",
            id.organisation, id.name
        ))?;
        let Some(body) = self.get_bytes(url).await? else {
            return Ok(Vec::new());
        };
        let names: Vec<String> = serde_json::from_slice(&body)
            .map_err(|e| IvrError::Network(format!("invalid revision list for {id}: {e}")))?;
        let mut revisions: Vec<Revision> = names.into_iter().map(Revision::new).collect();
        revisions.sort();
        Ok(revisions)
    }

    async fn fetch_descriptor(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<(Descriptor, Vec<u8>)> {
        let revision = select_revision(self, id, constraint).await?;
        let module = id.revision(revision);
        let url = self.url(&format!(
            "{}/{DESCRIPTOR_FILENAME}",
            Self::revision_path(&module)
        ))?;
        let bytes = self
            .get_bytes(url)
            .await?
            .ok_or_else(|| IvrError::NotFound(format!("{module} not found in {}", self.name)))?;
        let descriptor = parse_fetched_descriptor(&module, &bytes)?;
        Ok((descriptor, bytes))
    }

    async fn fetch_artifact(
        &self,
        module: &ModuleRevision,
        artifact: &ArtifactSpec,
    ) -> Result<Vec<u8>> {
        let url = self.url(&format!(
            "{}/{}-{}.{}",
            Self::revision_path(module),
            artifact.name,
            module.revision,
            artifact.ext
        ))?;
        self.get_bytes(url).await?.ok_or_else(|| {
            IvrError::NotFound(format!(
                "artifact {} of {module} not found in {}",
                artifact.file_name(),
                self.name
            ))
        })
    }
}

fn parse_module_list(body: &[u8]) -> Result<Vec<ModuleId>> {
    let names: Vec<String> = serde_json::from_slice(body)
        .map_err(|e| IvrError::Network(format!("invalid module list: {e}")))?;
    let mut modules = names
        .iter()
        .map(|name| ModuleId::parse(name))
        .collect::<Result<Vec<_>>>()?;
    modules.sort();
    modules.dedup();
    Ok(modules)
}
