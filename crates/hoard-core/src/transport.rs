//! Archive transport.
//!
//! A transport moves the bytes of one tarball to a local file. Integrity is
//! checked by the fetch engine afterwards so every transport gets the same
//! verification.

use async_trait::async_trait;
use std::path::Path;

use crate::error::FetchError;

/// Downloads package archives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stream the archive at `url` into `dest`, returning the byte count.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

#[cfg(feature = "network")]
pub use http::HttpTransport;

#[cfg(feature = "network")]
mod http {
    use super::{FetchError, Path, Transport, async_trait};
    use futures::StreamExt;
    use reqwest::Client;
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;

    /// Registry transport over HTTP(S).
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
        user_agent: String,
    }

    impl HttpTransport {
        /// Create a transport sending the given user agent.
        pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
            Self {
                client,
                user_agent: user_agent.into(),
            }
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .send()
                .await?
                .error_for_status()?;

            let mut file = File::create(dest).await?;
            let mut stream = response.bytes_stream();
            let mut downloaded: u64 = 0;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                downloaded += chunk.len() as u64;
            }

            file.flush().await?;
            file.sync_all().await?;
            tracing::trace!("Downloaded {downloaded} bytes from {url}");

            Ok(downloaded)
        }
    }

}
