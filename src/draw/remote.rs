use super::{PostInfo, Seed};
use crate::error::{DropError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteUser {
    pub username: String,
    /// Empty when the candidate has no address yet.
    pub publickey: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDrawRequest {
    pub users: Vec<RemoteUser>,
    pub exclude_users: Vec<String>,
    pub draw_count: usize,
    pub seed: Seed,
    pub environment: String,
    pub post_info: Option<PostInfo>,
}

/// Winners come back either as bare usernames or as user records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RemoteWinner {
    Name(String),
    Entry {
        username: String,
        #[serde(default, alias = "address")]
        publickey: Option<String>,
    },
}

impl RemoteWinner {
    pub fn username(&self) -> &str {
        match self {
            RemoteWinner::Name(name) => name,
            RemoteWinner::Entry { username, .. } => username,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            RemoteWinner::Name(_) => None,
            RemoteWinner::Entry { publickey, .. } => publickey.as_deref().filter(|a| !a.is_empty()),
        }
    }
}

/// Where the remote service published the draw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubCommit {
    pub repository: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDrawResponse {
    pub success: bool,
    #[serde(default)]
    pub winners: Vec<RemoteWinner>,
    #[serde(default)]
    pub github_commit: Option<GithubCommit>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    success: bool,
}

/// A service that can run the draw on our behalf.
#[allow(async_fn_in_trait)]
pub trait RemoteDraw {
    async fn is_live(&self) -> Result<bool>;

    async fn draw(&self, request: &RemoteDrawRequest) -> Result<RemoteDrawResponse>;
}

/// No remote service configured; every draw runs locally.
pub struct NoRemote;

impl RemoteDraw for NoRemote {
    async fn is_live(&self) -> Result<bool> {
        Ok(false)
    }

    async fn draw(&self, _request: &RemoteDrawRequest) -> Result<RemoteDrawResponse> {
        Err(DropError::RemoteDraw("no remote draw service configured".into()))
    }
}

pub struct HttpDrawService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDrawService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DropError::RemoteDraw(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl RemoteDraw for HttpDrawService {
    async fn is_live(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| DropError::RemoteDraw(format!("status probe failed: {}", e)))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| DropError::RemoteDraw(format!("malformed status response: {}", e)))?;
        Ok(status.success)
    }

    async fn draw(&self, request: &RemoteDrawRequest) -> Result<RemoteDrawResponse> {
        let response = self
            .client
            .post(format!("{}/draw", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| DropError::RemoteDraw(format!("draw request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DropError::RemoteDraw(format!("draw service returned {}", status)));
        }
        response
            .json()
            .await
            .map_err(|e| DropError::RemoteDraw(format!("malformed draw response: {}", e)))
    }
}
