//! Streaming HTTP downloads to disk.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use headway_shared::{HeadwayError, Result};

/// HTTP client for extracts and static assets.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HeadwayError::Download(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Stream `url` into `dest`. Written to a `.part` sibling and renamed on
    /// success, so `dest` never holds a truncated body.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HeadwayError::Download(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HeadwayError::Download(format!("GET {url}: HTTP {status}")));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HeadwayError::io(parent, e))?;
        }

        let part = dest.with_extension("part");
        let written = match write_body(response, url, &part, dest).await {
            Ok(written) => written,
            Err(e) => {
                match tokio::fs::remove_file(&part).await {
                    Err(cleanup) if cleanup.kind() != std::io::ErrorKind::NotFound => {
                        warn!(part = %part.display(), error = %cleanup, "failed to remove partial download");
                    }
                    _ => {}
                }
                return Err(e);
            }
        };

        info!(bytes = written, "fetched");
        Ok(written)
    }
}

async fn write_body(response: Response, url: &str, part: &Path, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| HeadwayError::io(part, e))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HeadwayError::Download(format!("GET {url}: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| HeadwayError::io(part, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| HeadwayError::io(part, e))?;
    drop(file);

    tokio::fs::rename(part, dest)
        .await
        .map_err(|e| HeadwayError::io(dest, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/terrain.mbtiles"))
            .and(header("user-agent", "headway/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mbtiles".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("terrain.mbtiles");
        let fetcher = Fetcher::new("headway/1.0").unwrap();
        let n = fetcher
            .fetch_to_file(&format!("{}/terrain.mbtiles", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(n, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"mbtiles");
        assert!(!dir.path().join("terrain.part").exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mbtiles".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("terrain.mbtiles");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("occupied"), "x").unwrap();

        let fetcher = Fetcher::new("headway/1.0").unwrap();
        let err = fetcher
            .fetch_to_file(&format!("{}/terrain.mbtiles", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, HeadwayError::Io { .. }));
        assert!(!dir.path().join("terrain.part").exists());
    }

    #[tokio::test]
    async fn non_success_is_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.bin");
        let fetcher = Fetcher::new("headway/1.0").unwrap();
        let err = fetcher
            .fetch_to_file(&format!("{}/missing.bin", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, HeadwayError::Download(_)));
        assert!(err.to_string().contains("404"));
        assert!(!dest.exists());
    }
}
