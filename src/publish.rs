//! Thin client for the hosted publishing API.
//!
//! Files are uploaded in a single multipart batch. Every path is read before
//! anything goes over the wire, so a missing file aborts the batch with no
//! partial manifest. Configuration is read from the environment (and a
//! `.env` file, if present) before the uploader is built, so a missing
//! credential never reaches the network.

use crate::config::{
    DEFAULT_PUBLISH_ROOT, ENV_API_KEY, ENV_API_ROOT, ENV_PUBLISH_ROOT, ENV_USERNAME,
};
use crate::error::PublishError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

// ── Configuration ────────────────────────────────────────────────────────

/// Publishing credentials and URL roots.
#[derive(Clone, PartialEq, Eq)]
pub struct PublishConfig {
    pub api_root: String,
    pub api_key: String,
    pub publish_root: String,
    pub username: Option<String>,
}

impl std::fmt::Debug for PublishConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishConfig")
            .field("api_root", &self.api_root)
            .field("api_key", &"<redacted>")
            .field("publish_root", &self.publish_root)
            .field("username", &self.username)
            .finish()
    }
}

impl PublishConfig {
    /// Read the configuration from the process environment, loading `.env`
    /// first when one exists.
    pub fn from_env() -> Result<Self, PublishError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PublishError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let api_root = get(ENV_API_ROOT).ok_or(PublishError::Config { var: ENV_API_ROOT })?;
        let api_key = get(ENV_API_KEY).ok_or(PublishError::Config { var: ENV_API_KEY })?;
        Ok(Self {
            api_root,
            api_key,
            publish_root: get(ENV_PUBLISH_ROOT).unwrap_or_else(|| DEFAULT_PUBLISH_ROOT.to_string()),
            username: get(ENV_USERNAME),
        })
    }
}

/// Public URL of a published file: `R/U/d/F` with a username, else `R/d/F`.
pub fn published_url(root: &str, username: Option<&str>, filename: &str) -> String {
    let root = root.trim_end_matches('/');
    match username.filter(|u| !u.is_empty()) {
        Some(user) => format!("{root}/{user}/d/{filename}"),
        None => format!("{root}/d/{filename}"),
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// What the service reports for one uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Result of one publish batch, keyed by uploaded file base name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: BTreeMap<String, PublishedFile>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PublishedFile> {
        self.files.get(name)
    }
}

/// The service either wraps the entries in `files` or returns them bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestBody {
    Wrapped { files: BTreeMap<String, PublishedFile> },
    Bare(BTreeMap<String, PublishedFile>),
}

/// Parse a manifest response body.
pub fn parse_manifest(body: &str) -> Result<Manifest, PublishError> {
    let parsed: ManifestBody = serde_json::from_str(body)
        .map_err(|e| PublishError::MalformedResponse(format!("invalid JSON: {e}")))?;
    let files = match parsed {
        ManifestBody::Wrapped { files } | ManifestBody::Bare(files) => files,
    };
    Ok(Manifest { files })
}

// ── Uploader ─────────────────────────────────────────────────────────────

/// One file in an upload batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Base name the file is published under.
    pub name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Read `path` into memory.
    pub async fn read(path: &Path) -> Result<Self, PublishError> {
        let not_found = || PublishError::FileNotFound {
            path: path.to_path_buf(),
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(not_found)?
            .to_string();
        if !path.is_file() {
            return Err(not_found());
        }
        let bytes = tokio::fs::read(path).await.map_err(|_| not_found())?;
        Ok(Self {
            name,
            path: path.to_path_buf(),
            bytes,
        })
    }

    pub fn mime(&self) -> &'static str {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("html") | Some("htm") => "text/html; charset=utf-8",
            Some("md") => "text/markdown; charset=utf-8",
            Some("txt") => "text/plain; charset=utf-8",
            Some("json") => "application/json",
            Some("docx") => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Some("pdf") => "application/pdf",
            _ => "application/octet-stream",
        }
    }
}

/// Sends a batch of files to the publishing service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Manifest, PublishError>;
}

/// [`Uploader`] talking to `POST {api_root}/publish`.
pub struct HttpUploader {
    client: reqwest::Client,
    config: PublishConfig,
}

impl HttpUploader {
    pub fn new(config: PublishConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("textpress/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/publish", self.config.api_root.trim_end_matches('/'))
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Manifest, PublishError> {
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let mut form = Form::new();
        for file in files {
            let mime = file.mime();
            let part = Part::bytes(file.bytes)
                .file_name(file.name)
                .mime_str(mime)
                .map_err(|e| PublishError::Transport(e.to_string()))?;
            form = form.part("files", part);
        }

        let endpoint = self.endpoint();
        debug!(endpoint = %endpoint, files = ?names, "Uploading");
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(PublishError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let manifest = parse_manifest(&body)?;
        if let Some(missing) = names.iter().find(|n| !manifest.files.contains_key(*n)) {
            return Err(PublishError::MalformedResponse(format!(
                "manifest has no entry for '{missing}'"
            )));
        }
        Ok(manifest)
    }
}

// ── Publishing ───────────────────────────────────────────────────────────

/// Upload `paths` as one batch.
///
/// Every path is read first; any missing file aborts the batch before the
/// uploader is called. The returned manifest has exactly one entry per
/// path, keyed by base name.
pub async fn publish_files(
    paths: &[PathBuf],
    uploader: &dyn Uploader,
) -> Result<Manifest, PublishError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = UploadFile::read(path).await?;
        if files.iter().any(|f: &UploadFile| f.name == file.name) {
            return Err(PublishError::DuplicateName { name: file.name });
        }
        files.push(file);
    }
    if files.is_empty() {
        return Ok(Manifest::default());
    }

    let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    let mut manifest = uploader.upload(files).await?;
    if let Some(missing) = names.iter().find(|n| !manifest.files.contains_key(*n)) {
        return Err(PublishError::MalformedResponse(format!(
            "manifest has no entry for '{missing}'"
        )));
    }
    manifest.files.retain(|name, _| names.contains(name));
    info!(files = manifest.len(), "Published");
    Ok(manifest)
}

/// Configuration plus the uploader it feeds.
pub struct Publisher {
    pub config: PublishConfig,
    uploader: Box<dyn Uploader>,
}

impl Publisher {
    /// Read the environment and build an [`HttpUploader`].
    pub fn from_env() -> Result<Self, PublishError> {
        let config = PublishConfig::from_env()?;
        let uploader = HttpUploader::new(config.clone())?;
        Ok(Self::new(config, Box::new(uploader)))
    }

    /// Read the configuration through `lookup`, then pair it with `uploader`.
    /// A configuration error drops the uploader unused.
    pub fn with_uploader(
        lookup: impl Fn(&str) -> Option<String>,
        uploader: Box<dyn Uploader>,
    ) -> Result<Self, PublishError> {
        Ok(Self::new(PublishConfig::from_lookup(lookup)?, uploader))
    }

    pub fn new(config: PublishConfig, uploader: Box<dyn Uploader>) -> Self {
        Self { config, uploader }
    }

    pub async fn publish(&self, paths: &[PathBuf]) -> Result<Manifest, PublishError> {
        publish_files(paths, self.uploader.as_ref()).await
    }

    /// Public URL for a published file name.
    pub fn url_for(&self, filename: &str) -> String {
        published_url(
            &self.config.publish_root,
            self.config.username.as_deref(),
            filename,
        )
    }
}

/// Publish `paths` with configuration from the environment.
pub async fn publish_files_from_env(paths: &[PathBuf]) -> Result<Manifest, PublishError> {
    Publisher::from_env()?.publish(paths).await
}
