//! GitHub Actions self-hosted runner API.

use crate::config::{GitHubConfig, Scope};
use async_trait::async_trait;
use flotilla_core::control_plane::{
    ControlPlaneRunner, DownloadAsset, RegistrationToken, RunnerGroup, RunnerGroupSpec,
};
use flotilla_core::ports::ControlPlane;
use flotilla_core::{Error, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const PER_PAGE: usize = 100;
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct RunnerPage {
    total_count: usize,
    runners: Vec<WireRunner>,
}

#[derive(Debug, Deserialize)]
struct WireRunner {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    busy: bool,
    #[serde(default)]
    labels: Vec<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct WireLabel {
    name: String,
}

impl From<WireRunner> for ControlPlaneRunner {
    fn from(r: WireRunner) -> Self {
        ControlPlaneRunner {
            id: r.id,
            name: r.name,
            status: r.status.into(),
            busy: r.busy,
            labels: r.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunnerGroupPage {
    total_count: usize,
    runner_groups: Vec<RunnerGroup>,
}

/// Map a response status onto the error taxonomy.
pub(crate) async fn check(res: Response, what: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let message = format!("{} returned {}: {}", what, status, body.trim());

    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::Registration(message)
        }
        _ => Error::TransientApi(message),
    })
}

fn transport(what: &str, e: reqwest::Error) -> Error {
    Error::TransientApi(format!("{} failed: {}", what, e))
}

pub struct GitHubClient {
    client: Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(concat!("flotilla/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let res = req.send().await.map_err(|e| transport(what, e))?;
        check(res, what)
            .await?
            .json()
            .await
            .map_err(|e| Error::TransientApi(format!("{} returned an unreadable body: {}", what, e)))
    }

    fn runners_path(&self) -> String {
        match self.config.scope() {
            Scope::Organization(org) => format!("/orgs/{}/actions/runners", org),
            Scope::Repository(owner, repo) => format!("/repos/{}/{}/actions/runners", owner, repo),
        }
    }

    fn groups_path(&self) -> Result<String> {
        match self.config.scope() {
            Scope::Organization(org) => Ok(format!("/orgs/{}/actions/runner-groups", org)),
            Scope::Repository(..) => Err(Error::Config(
                "runner groups require an organization-scoped control plane".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ControlPlane for GitHubClient {
    async fn list_runners(&self) -> Result<Vec<ControlPlaneRunner>> {
        let path = self.runners_path();
        let mut runners = Vec::new();
        let mut page = 1;

        loop {
            let req = self
                .request(Method::GET, &path)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let body: RunnerPage = self.send(req, "list runners").await?;

            let fetched = body.runners.len();
            runners.extend(body.runners.into_iter().map(ControlPlaneRunner::from));

            if fetched < PER_PAGE || runners.len() >= body.total_count {
                break;
            }
            page += 1;
        }

        debug!(count = runners.len(), pages = page, "Listed control-plane runners");
        Ok(runners)
    }

    async fn create_registration_token(&self) -> Result<RegistrationToken> {
        let path = format!("{}/registration-token", self.runners_path());
        self.send(self.request(Method::POST, &path), "create registration token")
            .await
    }

    async fn force_delete_runner(&self, id: u64) -> Result<()> {
        let path = format!("{}/{}", self.runners_path(), id);
        let res = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| transport("delete runner", e))?;
        check(res, "delete runner").await?;
        debug!(registration_id = id, "Registration deleted");
        Ok(())
    }

    async fn get_download_asset(&self, os: &str, arch: &str) -> Result<DownloadAsset> {
        let path = format!("{}/downloads", self.runners_path());
        let assets: Vec<DownloadAsset> = self
            .send(self.request(Method::GET, &path), "list runner downloads")
            .await?;

        assets
            .into_iter()
            .find(|a| a.os == os && a.architecture == arch)
            .ok_or_else(|| Error::NotFound(format!("no runner download for {}/{}", os, arch)))
    }

    fn registration_url(&self) -> String {
        let web = self.config.web_url.trim_end_matches('/');
        match self.config.scope() {
            Scope::Organization(org) => format!("{}/{}", web, org),
            Scope::Repository(owner, repo) => format!("{}/{}/{}", web, owner, repo),
        }
    }

    async fn list_runner_groups(&self) -> Result<Vec<RunnerGroup>> {
        let path = self.groups_path()?;
        let mut groups = Vec::new();
        let mut page = 1;

        loop {
            let req = self
                .request(Method::GET, &path)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let body: RunnerGroupPage = self.send(req, "list runner groups").await?;

            let fetched = body.runner_groups.len();
            groups.extend(body.runner_groups);

            if fetched < PER_PAGE || groups.len() >= body.total_count {
                break;
            }
            page += 1;
        }
        Ok(groups)
    }

    async fn create_runner_group(&self, spec: &RunnerGroupSpec) -> Result<RunnerGroup> {
        let path = self.groups_path()?;
        self.send(
            self.request(Method::POST, &path).json(spec),
            "create runner group",
        )
        .await
    }

    async fn update_runner_group(&self, id: u64, spec: &RunnerGroupSpec) -> Result<RunnerGroup> {
        let path = format!("{}/{}", self.groups_path()?, id);
        self.send(
            self.request(Method::PATCH, &path).json(spec),
            "update runner group",
        )
        .await
    }

    async fn delete_runner_group(&self, id: u64) -> Result<()> {
        let path = format!("{}/{}", self.groups_path()?, id);
        let res = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| transport("delete runner group", e))?;
        check(res, "delete runner group").await?;
        Ok(())
    }
}
