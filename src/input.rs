//! Input resolution: turn a user selection into raw bytes.
//!
//! A selected file can arrive as bytes already in memory, a local path, or an
//! HTTP/HTTPS URL. Reading happens inside `save`, asynchronously, and is the
//! only way `save` can fail: every error here belongs to the input-read family
//! (see [`DocDeskError::is_input_read`]).

use crate::error::DocDeskError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a selected file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Bytes already in memory.
    Bytes(Vec<u8>),
    /// A local file, read with `tokio::fs`.
    Path(PathBuf),
    /// An HTTP/HTTPS URL, downloaded with `reqwest`.
    Url(String),
}

/// One file of an upload selection.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub name: String,
    pub mime_type: String,
    pub source: FileSource,
}

impl StageInput {
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Bytes(bytes.into()),
        }
    }

    /// A local file; name and mime type come from the path.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            mime_type: mime_from_name(&name).to_string(),
            name,
            source: FileSource::Path(path),
        }
    }

    /// A remote file; name and mime type come from the URL path.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let name = filename_from_url(&url);
        Self {
            mime_type: mime_from_name(&name).to_string(),
            name,
            source: FileSource::Url(url),
        }
    }

    /// Path or URL, whichever `input` looks like.
    pub fn resolve(input: &str) -> Self {
        if is_url(input) {
            Self::from_url(input)
        } else {
            Self::from_path(input)
        }
    }

    /// Size in bytes when it can be known without reading the content.
    pub fn known_size(&self) -> Option<u64> {
        match &self.source {
            FileSource::Bytes(b) => Some(b.len() as u64),
            FileSource::Path(p) => std::fs::metadata(p).ok().map(|m| m.len()),
            FileSource::Url(_) => None,
        }
    }

    /// Read the full content.
    pub async fn read(&self, timeout_secs: u64) -> Result<Vec<u8>, DocDeskError> {
        match &self.source {
            FileSource::Bytes(b) => Ok(b.clone()),
            FileSource::Path(p) => read_local(p).await,
            FileSource::Url(u) => download_url(u, timeout_secs).await,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Mime type from a file extension. Unknown extensions are `application/octet-stream`.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>, DocDeskError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DocDeskError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DocDeskError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => Err(DocDeskError::InputRead {
            name: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, DocDeskError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocDeskError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocDeskError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocDeskError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DocDeskError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DocDeskError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Last path segment of a URL, or `download` when it has none.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(mime_from_name("a.PDF"), "application/pdf");
        assert_eq!(mime_from_name("scan.jpeg"), "image/jpeg");
        assert_eq!(mime_from_name("photo.png"), "image/png");
        assert_eq!(mime_from_name("archive"), "application/octet-stream");
    }

    #[test]
    fn url_inputs_take_name_from_path() {
        let input = StageInput::resolve("https://example.com/files/report.pdf?dl=1");
        assert_eq!(input.name, "report.pdf");
        assert_eq!(input.mime_type, "application/pdf");
        assert!(input.known_size().is_none());

        let input = StageInput::from_url("https://example.com/");
        assert_eq!(input.name, "download");
    }

    #[tokio::test]
    async fn reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let input = StageInput::resolve(path.to_str().unwrap());
        assert_eq!(input.name, "note.png");
        assert_eq!(input.mime_type, "image/png");
        assert_eq!(input.known_size(), Some(3));
        assert_eq!(input.read(5).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_file_is_an_input_read_error() {
        let input = StageInput::from_path("/definitely/not/here.pdf");
        let err = input.read(5).await.unwrap_err();
        assert!(matches!(err, DocDeskError::FileNotFound { .. }));
        assert!(err.is_input_read());
    }
}
