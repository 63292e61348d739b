//! HTTP transport
//!
//! Downloads go through the `HttpTransport` trait so tests can swap in an
//! in-memory remote. The default implementation uses a blocking `ureq` agent
//! on tokio's blocking pool and also serves `file://` URLs.

use crate::error::{DepcacheError, DepcacheResult};
use async_trait::async_trait;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Transport for single-object downloads
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Download `url` into the file `dest`, returning the number of bytes written
    async fn download(&self, url: &str, dest: &Path) -> DepcacheResult<u64>;

    /// Fetch a small document into memory
    async fn get_bytes(&self, url: &str) -> DepcacheResult<Vec<u8>>;
}

/// Map an HTTP status to the remote error taxonomy
pub fn status_error(url: &str, status: u16) -> DepcacheError {
    match status {
        404 | 410 => DepcacheError::NotFound(format!("{} (HTTP {})", url, status)),
        401 | 403 => DepcacheError::AuthError {
            remote: url.to_string(),
            reason: format!("HTTP {}", status),
        },
        _ => DepcacheError::RemoteUnavailable {
            remote: url.to_string(),
            reason: format!("HTTP {}", status),
        },
    }
}

/// `ureq`-backed transport
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// Create a transport with a whole-request timeout
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }

    fn open(&self, url: &str) -> DepcacheResult<Box<dyn Read>> {
        if let Some(path) = file_url_path(url) {
            return match fs::File::open(&path) {
                Ok(file) => Ok(Box::new(file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(DepcacheError::NotFound(url.to_string()))
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    Err(DepcacheError::AuthError {
                        remote: url.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => Err(DepcacheError::RemoteUnavailable {
                    remote: url.to_string(),
                    reason: e.to_string(),
                }),
            };
        }

        match self.agent.get(url).call() {
            Ok(response) => Ok(Box::new(response.into_body().into_reader())),
            Err(ureq::Error::StatusCode(status)) => Err(status_error(url, status)),
            Err(e) => Err(DepcacheError::RemoteUnavailable {
                remote: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn download_blocking(&self, url: &str, dest: &Path) -> DepcacheResult<u64> {
        let mut reader = self.open(url)?;
        let mut file = fs::File::create(dest)
            .map_err(|e| DepcacheError::io(format!("creating {}", dest.display()), e))?;

        let written = copy_body(url, &mut reader, &mut file, dest)?;
        file.flush()
            .and_then(|_| file.sync_all())
            .map_err(|e| DepcacheError::io(format!("writing {}", dest.display()), e))?;

        Ok(written)
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl HttpTransport for UreqTransport {
    async fn download(&self, url: &str, dest: &Path) -> DepcacheResult<u64> {
        info!("Downloading {}", url);
        let transport = self.clone();
        let url_owned = url.to_string();
        let dest = dest.to_path_buf();

        let written = tokio::task::spawn_blocking(move || transport.download_blocking(&url_owned, &dest))
            .await
            .map_err(|e| DepcacheError::Internal(format!("download task failed: {}", e)))??;

        debug!(url, bytes = written, "Download complete");
        Ok(written)
    }

    async fn get_bytes(&self, url: &str) -> DepcacheResult<Vec<u8>> {
        let transport = self.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            let mut reader = transport.open(&url)?;
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .map_err(|e| DepcacheError::RemoteUnavailable {
                    remote: url.clone(),
                    reason: e.to_string(),
                })?;
            Ok(buf)
        })
        .await
        .map_err(|e| DepcacheError::Internal(format!("download task failed: {}", e)))?
    }
}

/// Copy a response body into `writer`
///
/// Read failures belong to the remote; write failures are local and must
/// not be reported as remote errors.
fn copy_body<R, W>(url: &str, reader: &mut R, writer: &mut W, dest: &Path) -> DepcacheResult<u64>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut buf = vec![0u8; 64 * 1024];
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(DepcacheError::RemoteUnavailable {
                    remote: url.to_string(),
                    reason: format!("transfer interrupted: {}", e),
                })
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| DepcacheError::io(format!("writing {}", dest.display()), e))?;
        written += n as u64;
    }
}

/// Local path of a `file://` URL
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    // file://localhost/path and file:///path
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);

    #[cfg(windows)]
    let rest = rest.strip_prefix('/').filter(|r| r.get(1..2) == Some(":")).unwrap_or(rest);

    Some(PathBuf::from(percent_decode(rest)))
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(byte) = input
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory remote
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        objects: Mutex<HashMap<String, Result<Vec<u8>, u16>>>,
        pub(crate) downloads: AtomicUsize,
    }

    impl FakeTransport {
        pub(crate) fn serve(&self, url: &str, body: Vec<u8>) {
            self.objects.lock().unwrap().insert(url.to_string(), Ok(body));
        }

        pub(crate) fn fail(&self, url: &str, status: u16) {
            self.objects.lock().unwrap().insert(url.to_string(), Err(status));
        }

        fn lookup(&self, url: &str) -> DepcacheResult<Vec<u8>> {
            match self.objects.lock().unwrap().get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(status_error(url, *status)),
                None => Err(status_error(url, 404)),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn download(&self, url: &str, dest: &Path) -> DepcacheResult<u64> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let body = self.lookup(url)?;
            fs::write(dest, &body).unwrap();
            Ok(body.len() as u64)
        }

        async fn get_bytes(&self, url: &str) -> DepcacheResult<Vec<u8>> {
            self.lookup(url)
        }
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(status_error("u", 404), DepcacheError::NotFound(_)));
        assert!(matches!(status_error("u", 401), DepcacheError::AuthError { .. }));
        assert!(matches!(status_error("u", 403), DepcacheError::AuthError { .. }));
        assert!(matches!(
            status_error("u", 503),
            DepcacheError::RemoteUnavailable { .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn file_urls() {
        assert_eq!(
            file_url_path("file:///tmp/a%20b.zip"),
            Some(PathBuf::from("/tmp/a b.zip"))
        );
        assert_eq!(
            file_url_path("file://localhost/tmp/x"),
            Some(PathBuf::from("/tmp/x"))
        );
        assert_eq!(file_url_path("https://example.org/x"), None);
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    impl Write for Failing {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("No space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copy_tells_read_and_write_failures_apart() {
        let dest = Path::new("/cache/tmp/object");

        let mut sink = Vec::new();
        let err = copy_body("https://x/a", &mut Failing, &mut sink, dest).unwrap_err();
        assert!(err.is_remote());

        let mut body: &[u8] = b"payload";
        let err = copy_body("https://x/a", &mut body, &mut Failing, dest).unwrap_err();
        assert!(matches!(err, DepcacheError::Io { .. }));
        assert!(!err.is_remote());

        let mut body: &[u8] = b"payload";
        let mut sink = Vec::new();
        assert_eq!(copy_body("https://x/a", &mut body, &mut sink, dest).unwrap(), 7);
        assert_eq!(sink, b"payload");
    }

    #[tokio::test]
    async fn file_download() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("tool.bin");
        fs::write(&source, b"binary").unwrap();
        let dest = temp.path().join("out");

        let url = format!("file://{}", source.display());
        let written = UreqTransport::default().download(&url, &dest).await.unwrap();

        assert_eq!(written, 6);
        assert_eq!(fs::read(&dest).unwrap(), b"binary");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let url = format!("file://{}", temp.path().join("absent").display());
        let err = UreqTransport::default()
            .download(&url, &temp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepcacheError::NotFound(_)));
    }
}
