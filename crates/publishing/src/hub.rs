//! Hub API abstraction and its REST implementation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};
use tuner_core::{Error, Result};

/// A repository on the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    pub repo_id: String,
    pub url: String,
}

/// Operations the publishing manager needs from the hub
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Create a model repository; with `exist_ok` an existing one is reused
    async fn create_repo(&self, repo_id: &str, private: bool, exist_ok: bool) -> Result<RepoUrl>;

    /// Upload every file below `folder`, returning how many were sent
    async fn upload_folder(&self, repo_id: &str, folder: &Path, commit_message: &str)
        -> Result<usize>;

    /// Upload a single file to `path_in_repo`
    async fn upload_file(
        &self,
        repo_id: &str,
        local_path: &Path,
        path_in_repo: &str,
        commit_message: &str,
    ) -> Result<()>;
}

/// Hub client speaking the HTTP API
pub struct HfHubClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HfHubClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tuner-publishing/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Hub {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn repo_url(&self, repo_id: &str) -> String {
        format!("{}/{}", self.endpoint, repo_id)
    }

    fn upload_url(&self, repo_id: &str, path_in_repo: &str) -> String {
        format!(
            "{}/api/models/{}/upload/main/{}",
            self.endpoint,
            repo_id,
            path_in_repo.trim_start_matches('/')
        )
    }
}

impl std::fmt::Debug for HfHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfHubClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Split `org/name` into its parts
fn split_repo_id(repo_id: &str) -> (Option<&str>, &str) {
    match repo_id.split_once('/') {
        Some((org, name)) => (Some(org), name),
        None => (None, repo_id),
    }
}

/// Files below `folder` as (absolute path, `/`-joined relative path)
///
/// Hidden entries such as `.git` or in-flight temp files are skipped.
async fn collect_files(folder: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut stack = vec![(folder.to_path_buf(), String::new())];

    while let Some((dir, relative)) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let rel = if relative.is_empty() {
                name
            } else {
                format!("{}/{}", relative, name)
            };
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push((entry.path(), rel));
            } else if file_type.is_file() {
                files.push((entry.path(), rel));
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[async_trait]
impl HubApi for HfHubClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn create_repo(&self, repo_id: &str, private: bool, exist_ok: bool) -> Result<RepoUrl> {
        let (organization, name) = split_repo_id(repo_id);
        let mut body = serde_json::json!({
            "name": name,
            "type": "model",
            "private": private,
        });
        if let Some(org) = organization {
            body["organization"] = serde_json::Value::String(org.to_string());
        }

        let response = self
            .client
            .post(format!("{}/api/repos/create", self.endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RepoCreationFailed {
                repo_id: repo_id.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() || (exist_ok && status == reqwest::StatusCode::CONFLICT) {
            info!(%repo_id, existed = !status.is_success(), "Hub repository ready");
            return Ok(RepoUrl {
                repo_id: repo_id.to_string(),
                url: self.repo_url(repo_id),
            });
        }

        let text = response.text().await.unwrap_or_default();
        Err(Error::RepoCreationFailed {
            repo_id: repo_id.to_string(),
            message: format!("HTTP {}: {}", status, text),
        })
    }

    #[instrument(skip(self, commit_message), fields(folder = %folder.display()))]
    async fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        commit_message: &str,
    ) -> Result<usize> {
        let files = collect_files(folder).await?;
        for (path, relative) in &files {
            self.upload_file(repo_id, path, relative, commit_message).await?;
        }
        info!(%repo_id, files = files.len(), "Uploaded folder");
        Ok(files.len())
    }

    #[instrument(skip(self, local_path, commit_message))]
    async fn upload_file(
        &self,
        repo_id: &str,
        local_path: &Path,
        path_in_repo: &str,
        commit_message: &str,
    ) -> Result<()> {
        // Streamed from disk; weight files can be larger than memory allows
        let file = fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(self.upload_url(repo_id, path_in_repo))
            .bearer_auth(&self.token)
            .query(&[("commit_message", commit_message)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::UploadFailed {
                path: path_in_repo.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::UploadFailed {
                path: path_in_repo.to_string(),
                message: format!("HTTP {}: {}", status, text),
            });
        }

        debug!(size_bytes = size, "Uploaded file");
        Ok(())
    }
}
