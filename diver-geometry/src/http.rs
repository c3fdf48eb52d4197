//! HTTP implementations of the backend contracts.

use crate::backend::{
    AssetTransfer, CustomizationRequest, ExportRequest, GeometryBackend, UploadRequest,
    UploadTicket, UploadTickets,
};
use async_trait::async_trait;
use diver_core::constants::UPLOAD_SUCCESS_STATUSES;
use diver_core::{ImageAsset, RunError, RunResult, SessionDocument, SessionId, VersionMap};
use indexmap::IndexMap;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

/// REST client for the computation backend's v2 session API.
#[derive(Clone)]
pub struct HttpGeometryBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeometryBackend {
    pub fn new(base_url: &str, timeout: Duration) -> RunResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunError::transport("client setup", e))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, session: &SessionId, path: &str) -> String {
        format!("{}/api/v2/session/{}{}", self.base_url, session, path)
    }

    async fn put_json<B>(&self, operation: &str, url: String, body: &B) -> RunResult<SessionDocument>
    where
        B: serde::Serialize + ?Sized,
    {
        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RunError::transport(operation, e))?;
        parse_response(operation, response).await
    }
}

impl std::fmt::Debug for HttpGeometryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGeometryBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    asset: UploadAssets,
}

#[derive(Deserialize)]
struct UploadAssets {
    #[serde(default)]
    file: IndexMap<String, UploadTicket>,
}

#[async_trait]
impl GeometryBackend for HttpGeometryBackend {
    async fn init_session(&self, ticket: &str) -> RunResult<SessionDocument> {
        let url = format!("{}/api/v2/ticket/{}", self.base_url, ticket);
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| RunError::transport("session init", e))?;
        parse_response("session init", response).await
    }

    async fn customize(
        &self,
        session: &SessionId,
        request: &CustomizationRequest,
    ) -> RunResult<SessionDocument> {
        self.put_json("customization", self.session_url(session, "/output"), request)
            .await
    }

    async fn output_cache(
        &self,
        session: &SessionId,
        versions: &VersionMap,
    ) -> RunResult<SessionDocument> {
        self.put_json(
            "output cache",
            self.session_url(session, "/output/cache"),
            versions,
        )
        .await
    }

    async fn compute_export(
        &self,
        session: &SessionId,
        request: &ExportRequest,
    ) -> RunResult<SessionDocument> {
        self.put_json("export", self.session_url(session, "/export"), request)
            .await
    }

    async fn export_cache(
        &self,
        session: &SessionId,
        versions: &VersionMap,
    ) -> RunResult<SessionDocument> {
        self.put_json(
            "export cache",
            self.session_url(session, "/export/cache"),
            versions,
        )
        .await
    }

    async fn request_upload(
        &self,
        session: &SessionId,
        request: &UploadRequest,
    ) -> RunResult<UploadTickets> {
        let response = self
            .client
            .post(self.session_url(session, "/file/upload"))
            .json(request)
            .send()
            .await
            .map_err(|e| RunError::transport("upload request", e))?;
        let parsed: UploadResponse = parse_response("upload request", response).await?;
        Ok(parsed.asset.file)
    }
}

/// Plain HTTP GET/PUT of image bytes.
#[derive(Debug, Clone)]
pub struct HttpAssetTransfer {
    client: reqwest::Client,
}

impl HttpAssetTransfer {
    pub fn new(timeout: Duration) -> RunResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunError::transport("client setup", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetTransfer for HttpAssetTransfer {
    async fn fetch_image(&self, url: &str) -> RunResult<ImageAsset> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RunError::transport("image fetch", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RunError::transport(
                "image fetch",
                format!("Could not fetch image from {} (HTTP {})", url, status.as_u16()),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
            .unwrap_or_default();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RunError::transport("image fetch", e))?;

        Ok(ImageAsset::new(content_type, bytes.to_vec()))
    }

    async fn upload(&self, ticket: &UploadTicket, asset: &ImageAsset) -> RunResult<()> {
        let mut request = self
            .client
            .put(&ticket.href)
            .header(CONTENT_TYPE, asset.content_type.as_str());
        for (name, value) in &ticket.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(asset.bytes.clone())
            .send()
            .await
            .map_err(|e| RunError::transport("image upload", e))?;

        let status = response.status().as_u16();
        if !UPLOAD_SUCCESS_STATUSES.contains(&status) {
            return Err(RunError::transport(
                "image upload",
                format!("Could not upload image (HTTP {})", status),
            ));
        }
        Ok(())
    }
}

/// Strip parameters such as `; charset=...` from a content type.
fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> RunResult<T> {
    let status = response.status();
    if status.is_success() {
        let text = response
            .text()
            .await
            .map_err(|e| RunError::transport(operation, e))?;
        serde_json::from_str(&text)
            .map_err(|e| RunError::transport(operation, format!("invalid response body: {}", e)))
    } else {
        let text = response.text().await.unwrap_or_default();
        Err(RunError::transport(
            operation,
            format!("HTTP {}: {}", status.as_u16(), text),
        ))
    }
}
