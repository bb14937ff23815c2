//! Blob storage for rendered images (Google Drive v3).
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::config::Config;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/";

/// A stored file and its shareable link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store PNG bytes under `file_name` and make them readable by link.
    async fn upload_png(&self, file_name: &str, bytes: Vec<u8>) -> Result<StoredBlob>;

    /// Bytes behind a link previously returned by `upload_png`.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Stored file name behind a link.
    async fn file_name(&self, url: &str) -> Result<String>;
}

static FILE_ID_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"/d/([\w-]+)").expect("valid file id regex"),
        Regex::new(r"[?&]id=([\w-]+)").expect("valid file id regex"),
    ]
});

/// File id inside a Drive share link (`/d/<id>/view` or `?id=<id>`).
pub fn extract_file_id(url: &str) -> Option<String> {
    FILE_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
    folder_id: String,
}

impl fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveClient")
            .field("folder_id", &self.folder_id)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(DRIVE_API_BASE).context("invalid Drive base URL")?;
        Self::with_base_url(
            cfg.google.access_token.clone(),
            cfg.google.drive_folder_id.clone(),
            base_url,
        )
    }

    pub fn with_base_url(token: String, folder_id: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("creative-ledger/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
            folder_id,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("invalid Drive endpoint")
    }

    async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(what, "rate limited by Drive");
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("drive error {status} during {what}: {body}"));
        }
        Ok(res)
    }

    async fn metadata(&self, file_id: &str) -> Result<FileMeta> {
        let mut url = self.url(&format!("drive/v3/files/{file_id}"))?;
        url.query_pairs_mut()
            .append_pair("fields", "id,name,webViewLink")
            .append_pair("supportsAllDrives", "true");
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to reach Drive")?;
        Self::check(res, "metadata")
            .await?
            .json()
            .await
            .context("invalid Drive metadata JSON")
    }
}

#[async_trait]
impl BlobStore for DriveClient {
    #[instrument(skip_all)]
    async fn upload_png(&self, file_name: &str, bytes: Vec<u8>) -> Result<StoredBlob> {
        // Step 1: media upload creates an untitled file.
        let mut url = self.url("upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("supportsAllDrives", "true");
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header("Content-Type", "image/png")
            .body(bytes)
            .send()
            .await
            .context("failed to upload to Drive")?;
        let created: FileMeta = Self::check(res, "upload")
            .await?
            .json()
            .await
            .context("invalid Drive upload JSON")?;

        // Step 2: name it and move it into the folder.
        let mut url = self.url(&format!("drive/v3/files/{}", created.id))?;
        url.query_pairs_mut()
            .append_pair("addParents", &self.folder_id)
            .append_pair("fields", "id,name,webViewLink")
            .append_pair("supportsAllDrives", "true");
        let res = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .json(&json!({ "name": file_name }))
            .send()
            .await
            .context("failed to name Drive file")?;
        let meta: FileMeta = Self::check(res, "rename")
            .await?
            .json()
            .await
            .context("invalid Drive metadata JSON")?;

        // Step 3: anyone with the link can read.
        let mut url = self.url(&format!("drive/v3/files/{}/permissions", meta.id))?;
        url.query_pairs_mut().append_pair("supportsAllDrives", "true");
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "type": "anyone", "role": "reader" }))
            .send()
            .await
            .context("failed to share Drive file")?;
        Self::check(res, "share").await?;

        let link = meta
            .web_view_link
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", meta.id));
        debug!(file_id = %meta.id, "image stored");
        Ok(StoredBlob {
            id: meta.id,
            url: link,
        })
    }

    #[instrument(skip_all)]
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let file_id =
            extract_file_id(url).ok_or_else(|| anyhow!("no Drive file id in {url:?}"))?;
        let mut endpoint = self.url(&format!("drive/v3/files/{file_id}"))?;
        endpoint
            .query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("supportsAllDrives", "true");
        let res = self
            .http
            .get(endpoint)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to reach Drive")?;
        let bytes = Self::check(res, "download")
            .await?
            .bytes()
            .await
            .context("failed to read Drive media")?;
        Ok(bytes.to_vec())
    }

    async fn file_name(&self, url: &str) -> Result<String> {
        let file_id =
            extract_file_id(url).ok_or_else(|| anyhow!("no Drive file id in {url:?}"))?;
        let meta = self.metadata(&file_id).await?;
        Ok(meta.name.unwrap_or(meta.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ids_from_share_links() {
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/1AbC-d_9/view?usp=drivesdk").as_deref(),
            Some("1AbC-d_9")
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/open?id=XyZ_1").as_deref(),
            Some("XyZ_1")
        );
        assert_eq!(extract_file_id("https://example.com/image.png"), None);
    }
}
