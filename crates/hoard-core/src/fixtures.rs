//! In-memory archives for unit tests.

use flate2::Compression;
use flate2::write::GzEncoder;

/// Build a gzipped tarball from `(path, contents)` pairs.
pub(crate) fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A minimal registry package archive.
pub(crate) fn package_tarball(name: &str, version: &str) -> Vec<u8> {
    let manifest = format!(r#"{{"name":"{name}","version":"{version}"}}"#);
    tarball(&[
        ("package/package.json", manifest.as_str()),
        ("package/index.js", "module.exports = 42;\n"),
    ])
}

/// Serves archives from memory and counts every download.
#[derive(Default)]
pub(crate) struct MemoryTransport {
    archives: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    downloads: std::sync::atomic::AtomicUsize,
    delay: Option<std::time::Duration>,
}

impl MemoryTransport {
    pub(crate) fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.archives.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub(crate) fn downloads(&self) -> usize {
        self.downloads.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl crate::transport::Transport for MemoryTransport {
    async fn download(
        &self,
        url: &str,
        dest: &std::path::Path,
    ) -> Result<u64, crate::error::FetchError> {
        self.downloads
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| crate::error::FetchError::Transport(format!("404 {url}")))?;
        std::fs::write(dest, &bytes)?;
        Ok(bytes.len() as u64)
    }
}
