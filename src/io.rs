//! Tile sources - where chunk payloads are fetched from

use crate::codec::TilePayload;
use crate::error::{CubeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Tile source schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceScheme {
    /// Local file system
    FileSystem,
    /// HTTP or HTTPS server
    Http,
}

impl SourceScheme {
    /// Parse the scheme from a URL
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end];
            match scheme {
                "file" => Ok(SourceScheme::FileSystem),
                "http" | "https" => Ok(SourceScheme::Http),
                _ => Err(CubeError::InvalidUrl(format!("Unknown scheme: {}", scheme))),
            }
        } else {
            // Assume file system if no scheme
            Ok(SourceScheme::FileSystem)
        }
    }
}

/// Fetches the payload behind a chunk URL
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetch and parse the payload at `url`
    async fn fetch(&self, url: &str) -> Result<TilePayload>;

    /// Get the source scheme
    fn scheme(&self) -> SourceScheme;
}

/// Serves chunk URLs from a directory tree.
///
/// The URL scheme (and host, for http URLs) is dropped and the remaining
/// path is resolved under `root`.
pub struct FileSystemTileSource {
    root: PathBuf,
}

impl FileSystemTileSource {
    /// Create a new file system tile source
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the file path a URL maps to
    pub fn path_for(&self, url: &str) -> PathBuf {
        let path = match url.split_once("://") {
            Some(("file", rest)) => rest,
            Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
            None => url.strip_prefix("file:").unwrap_or(url),
        };
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl TileSource for FileSystemTileSource {
    async fn fetch(&self, url: &str) -> Result<TilePayload> {
        let path = self.path_for(url);
        let data = fs::read(&path)
            .await
            .map_err(|e| CubeError::fetch_failed(url, format!("{}: {}", path.display(), e)))?;
        TilePayload::from_response(Bytes::from(data))
    }

    fn scheme(&self) -> SourceScheme {
        SourceScheme::FileSystem
    }
}

/// Fetches chunk URLs over HTTP
#[cfg(feature = "http-client")]
pub struct HttpTileSource {
    client: reqwest::Client,
}

#[cfg(feature = "http-client")]
impl HttpTileSource {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-client")]
impl Default for HttpTileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, url: &str) -> Result<TilePayload> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CubeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CubeError::fetch_failed(url, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CubeError::Network(e.to_string()))?;
        TilePayload::from_response(body)
    }

    fn scheme(&self) -> SourceScheme {
        SourceScheme::Http
    }
}

/// Pick a tile source for a base URL
///
/// `root` anchors file URLs. HTTP URLs need the `http-client` feature.
pub fn create_tile_source(base_url: &str, root: impl AsRef<Path>) -> Result<Box<dyn TileSource>> {
    match SourceScheme::from_url(base_url)? {
        SourceScheme::FileSystem => Ok(Box::new(FileSystemTileSource::new(root))),
        #[cfg(feature = "http-client")]
        SourceScheme::Http => Ok(Box::new(HttpTileSource::new())),
        #[cfg(not(feature = "http-client"))]
        SourceScheme::Http => Err(CubeError::Configuration(format!(
            "{} needs the http-client feature",
            base_url
        ))),
    }
}
