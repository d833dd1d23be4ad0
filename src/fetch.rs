use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Url};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::http::image_client_builder;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("source returned zero bytes")]
    Empty,
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Downloads `url` into `dest` and returns the byte count. `dest` is either
    /// complete or absent afterwards.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::from_builder(image_client_builder())
    }

    /// A builder that cannot produce a client is an error rather than a
    /// silent downgrade to default TLS and timeout settings.
    pub fn from_builder(builder: ClientBuilder) -> Result<Self, FetchError> {
        let http = builder
            .build()
            .map_err(|err| FetchError::Network(format!("building image client: {err}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let parsed = parse_source_url(url)?;
        let response = self
            .http
            .get(parsed.clone())
            .send()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Network(format!("HTTP {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        if body.is_empty() {
            return Err(FetchError::Empty);
        }

        write_atomic(dest, &body).await?;
        info!(target = "stager.fetch", url = %parsed, bytes = body.len(), "image_downloaded");
        Ok(body.len() as u64)
    }
}

/// Writes through a sibling `.part` file and renames it into place.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let partial = partial_path(dest);
    let result = async {
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, dest).await
    }
    .await;
    if let Err(err) = result {
        if let Err(cleanup) = tokio::fs::remove_file(&partial).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!(target = "stager.fetch", path = %partial.display(), error = %cleanup, "partial_cleanup_failed");
        }
        return Err(FetchError::Network(format!(
            "writing {}: {err}",
            dest.display()
        )));
    }
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Parses a catalog image URL. Non-ASCII characters and spaces in the path
/// and query come back percent-encoded.
pub fn parse_source_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url.trim())
        .map_err(|err| FetchError::Network(format!("invalid image URL `{url}`: {err}")))
}

/// Image extension for the temp file, taken from the URL path when it is one
/// we recognise.
pub fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "png",
        Some("webp") => "webp",
        Some("jpeg") => "jpeg",
        _ => "jpg",
    }
}
