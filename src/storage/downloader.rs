//! Model artifact downloader
//!
//! Streams a catalog model's GGUF file into the models directory. Redirects
//! are followed by hand so the chain length can be capped.

use crate::error::{Error, Result};
use crate::storage::integrity::IntegrityChecker;
use crate::storage::settings::Settings;
use crate::types::ModelDescriptor;
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{StatusCode, Url};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const REDIRECT_STATUSES: [StatusCode; 5] = [
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
    StatusCode::SEE_OTHER,
    StatusCode::TEMPORARY_REDIRECT,
    StatusCode::PERMANENT_REDIRECT,
];

/// Anything that can put a valid artifact on disk for a descriptor
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Return the path of a valid local artifact, fetching it if needed.
    /// `on_progress` receives whole percentages and may borrow from the caller.
    async fn fetch(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PathBuf>;
}

/// HTTP downloader for model artifacts
pub struct Downloader {
    client: reqwest::Client,
    integrity: IntegrityChecker,
    max_redirects: usize,
}

impl Downloader {
    pub fn new(integrity: IntegrityChecker, timeout: Duration, max_redirects: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("localm-runtime/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            integrity,
            max_redirects,
        })
    }

    /// Build a downloader from runtime settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            IntegrityChecker::new(&settings.models_directory, settings.integrity),
            Duration::from_secs(settings.download_timeout_secs),
            settings.max_redirects,
        )
    }

    /// Download `descriptor` unless a valid artifact already exists
    pub async fn download(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PathBuf> {
        let dest_path = self.integrity.artifact_path(descriptor);

        if self.integrity.validate(descriptor) {
            tracing::info!("Model already present: {:?}", dest_path);
            on_progress(100);
            return Ok(dest_path);
        }

        // Partial or corrupt leftovers are removed before starting over
        self.integrity.discard_invalid(descriptor);
        tokio::fs::create_dir_all(self.integrity.models_dir()).await?;

        tracing::info!("Downloading {} from {}", descriptor.id, descriptor.source_url);
        let mut response = self.open(&descriptor.source_url).await?;

        let total_size = response.content_length().filter(|&len| len > 0);
        if let Some(total) = total_size {
            tracing::info!("File size: {} ({} bytes)", format_size(total), total);
        }

        let mut file = File::create(&dest_path).await?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(total) = total_size {
                on_progress(percent_of(downloaded, total));
            }
        }
        file.flush().await?;
        drop(file);

        if !self.integrity.validate(descriptor) {
            let state = self.integrity.file_state(descriptor);
            self.integrity.discard_invalid(descriptor);
            return Err(Error::Integrity {
                model_id: descriptor.id.clone(),
                reason: format!(
                    "downloaded {} bytes, expected at least {}",
                    state.size_bytes,
                    self.integrity
                        .policy()
                        .required_bytes(descriptor.expected_size_bytes)
                ),
            });
        }

        tracing::info!("Download complete: {:?} ({})", dest_path, format_size(downloaded));
        Ok(dest_path)
    }

    /// Issue the GET, following redirects up to `max_redirects` hops
    async fn open(&self, url: &str) -> Result<reqwest::Response> {
        let mut current =
            Url::parse(url).map_err(|e| Error::Network(format!("Invalid URL {}: {}", url, e)))?;
        let mut hops = 0usize;

        loop {
            let response = self.client.get(current.clone()).send().await?;
            let status = response.status();

            if REDIRECT_STATUSES.contains(&status) {
                hops += 1;
                if hops > self.max_redirects {
                    return Err(Error::TooManyRedirects {
                        hops: self.max_redirects,
                        url: url.to_string(),
                    });
                }

                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| Error::HttpStatus {
                        status: status.as_u16(),
                        url: current.to_string(),
                    })?;
                let next = current
                    .join(location)
                    .map_err(|e| Error::Network(format!("Invalid redirect target {}: {}", location, e)))?;

                tracing::debug!("Redirect {} -> {}", current, next);
                current = next;
                continue;
            }

            if status != StatusCode::OK {
                return Err(Error::HttpStatus {
                    status: status.as_u16(),
                    url: current.to_string(),
                });
            }

            return Ok(response);
        }
    }
}

#[async_trait]
impl ArtifactFetcher for Downloader {
    async fn fetch(
        &self,
        descriptor: &ModelDescriptor,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PathBuf> {
        self.download(descriptor, on_progress).await
    }
}

fn percent_of(downloaded: u64, total: u64) -> u8 {
    ((downloaded as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::IntegrityPolicy;
    use crate::types::{QualityTier, SpeedTier};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[derive(Clone)]
    enum Reply {
        Body(Vec<u8>),
        Redirect(String),
        Status(u16),
    }

    /// Minimal HTTP/1.1 server answering from a fixed route table
    async fn serve(routes: HashMap<String, Reply>) -> (String, Arc<Mutex<usize>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(Mutex::new(0usize));
        let hits_server = hits.clone();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                *hits_server.lock().unwrap() += 1;
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut tmp = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut tmp).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&tmp[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                    let response = match routes.get(&path) {
                        Some(Reply::Body(body)) => {
                            let mut out = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            out.extend_from_slice(body);
                            out
                        }
                        Some(Reply::Redirect(location)) => format!(
                            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            location
                        )
                        .into_bytes(),
                        Some(Reply::Status(code)) => format!(
                            "HTTP/1.1 {} Nope\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            code
                        )
                        .into_bytes(),
                        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (base, hits)
    }

    fn descriptor(url: String, expected: u64) -> ModelDescriptor {
        ModelDescriptor {
            id: "test-model".to_string(),
            source_url: url,
            expected_size_bytes: expected,
            display_name: "Test".to_string(),
            ram_estimate: "~1 GB".to_string(),
            quality_tier: QualityTier::Basic,
            speed_tier: SpeedTier::Fastest,
            description: String::new(),
            context_length: 2048,
        }
    }

    fn downloader(dir: &Path, max_redirects: usize) -> Downloader {
        let policy = IntegrityPolicy {
            min_ratio: 0.9,
            min_bytes: 0,
        };
        Downloader::new(
            IntegrityChecker::new(dir, policy),
            Duration::from_secs(30),
            max_redirects,
        )
        .unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |p| sink.lock().unwrap().push(p))
    }

    #[tokio::test]
    async fn test_follows_redirect_chain() {
        let body = vec![7u8; 64 * 1024];
        let mut routes = HashMap::new();
        routes.insert("/start".to_string(), Reply::Redirect("/hop".to_string()));
        routes.insert("/hop".to_string(), Reply::Redirect("/files/model.gguf".to_string()));
        routes.insert("/files/model.gguf".to_string(), Reply::Body(body.clone()));
        let (base, _) = serve(routes).await;

        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        let model = descriptor(format!("{}/start", base), body.len() as u64);
        let (seen, on_progress) = recorder();

        let path = dl.download(&model, &on_progress).await.unwrap();
        assert_eq!(path, dir.path().join("test-model.gguf"));
        assert_eq!(std::fs::read(&path).unwrap(), body);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().copied(), Some(100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_redirect_cap() {
        let mut routes = HashMap::new();
        routes.insert("/loop".to_string(), Reply::Redirect("/loop".to_string()));
        let (base, hits) = serve(routes).await;

        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        let model = descriptor(format!("{}/loop", base), 10);

        let err = dl.download(&model, &|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::TooManyRedirects { hops: 5, .. }));
        // Initial request plus five followed hops
        assert_eq!(*hits.lock().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let mut routes = HashMap::new();
        routes.insert("/gone".to_string(), Reply::Status(410));
        let (base, _) = serve(routes).await;

        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        let model = descriptor(format!("{}/gone", base), 10);

        let err = dl.download(&model, &|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 410, .. }));
        assert!(!dir.path().join("test-model.gguf").exists());
    }

    #[tokio::test]
    async fn test_valid_artifact_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        // Nothing listens on the discard port; a network call would fail
        let model = descriptor("http://127.0.0.1:9/model.gguf".to_string(), 1000);
        std::fs::write(dir.path().join("test-model.gguf"), vec![1u8; 1000]).unwrap();
        let (seen, on_progress) = recorder();

        let path = dl.download(&model, &on_progress).await.unwrap();
        assert!(path.exists());
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn test_progress_callback_borrows_caller_state() {
        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        let model = descriptor("http://127.0.0.1:9/model.gguf".to_string(), 1000);
        std::fs::write(dir.path().join("test-model.gguf"), vec![1u8; 1000]).unwrap();

        // Stack-local state, not 'static
        let seen = Mutex::new(Vec::new());
        let fetcher: &dyn ArtifactFetcher = &dl;
        fetcher
            .fetch(&model, &|p| seen.lock().unwrap().push(p))
            .await
            .unwrap();
        assert_eq!(seen.into_inner().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn test_invalid_artifact_is_replaced() {
        let body = vec![3u8; 4096];
        let mut routes = HashMap::new();
        routes.insert("/model.gguf".to_string(), Reply::Body(body.clone()));
        let (base, hits) = serve(routes).await;

        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        let model = descriptor(format!("{}/model.gguf", base), body.len() as u64);
        std::fs::write(dir.path().join("test-model.gguf"), b"partial").unwrap();

        let path = dl.download(&model, &|_| {}).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), body);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_integrity_failure_after_download() {
        let mut routes = HashMap::new();
        routes.insert("/small.gguf".to_string(), Reply::Body(vec![0u8; 100]));
        let (base, _) = serve(routes).await;

        let dir = tempfile::tempdir().unwrap();
        let dl = downloader(dir.path(), 5);
        let model = descriptor(format!("{}/small.gguf", base), 10_000);

        let err = dl.download(&model, &|_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!dir.path().join("test-model.gguf").exists());
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 200), 0);
        assert_eq!(percent_of(1, 200), 1);
        assert_eq!(percent_of(200, 200), 100);
        assert_eq!(percent_of(300, 200), 100);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }
}
