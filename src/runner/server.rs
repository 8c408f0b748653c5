//! Shared web server
//!
//! Harnesses whose scope enables `Server` are loaded over HTTP instead of
//! `file://`. One server instance is shared by every such unit in a run.
//! [`StaticFileHost`] is a minimal static file server on the loopback
//! interface; [`ReusingServerHost`] keeps a compatible instance alive
//! between starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use crate::common::paths::{extension_of, path_key, relative_to, to_forward_slashes};
use crate::common::{Error, Result};

/// Upper bound on a request line plus headers
const MAX_REQUEST_HEAD: u64 = 16 * 1024;

/// A running server: the directory it serves and the port it listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebServerHandle {
    pub root: PathBuf,
    pub port: u16,
}

impl WebServerHandle {
    /// Whether this server can stand in for a request with `root` and `port`
    pub fn is_compatible(&self, root: &Path, port: Option<u16>) -> bool {
        path_key(&self.root) == path_key(root) && port.map_or(true, |p| p == self.port)
    }

    /// URL under which `file` is served
    pub fn url_for(&self, file: &Path) -> Result<Url> {
        let base = Url::parse(&format!("http://localhost:{}/", self.port))
            .map_err(|e| Error::Server(format!("Invalid server address: {}", e)))?;
        let relative = to_forward_slashes(&relative_to(&self.root, file));
        if relative.starts_with("../") {
            return Err(Error::Server(format!(
                "'{}' is outside the server root '{}'",
                file.display(),
                self.root.display()
            )));
        }
        base.join(&relative)
            .map_err(|e| Error::Server(format!("Invalid harness path '{}': {}", relative, e)))
    }
}

/// Starts and stops web servers
#[async_trait]
pub trait WebServerHost: Send + Sync {
    /// Start serving `root`; an unset port lets the host pick one
    async fn start(&self, root: &Path, port: Option<u16>) -> Result<WebServerHandle>;

    async fn dispose(&self, handle: &WebServerHandle) -> Result<()>;
}

/// Wraps a host so that a compatible running instance is reused
pub struct ReusingServerHost<H> {
    inner: H,
    current: Mutex<Option<WebServerHandle>>,
}

impl<H: WebServerHost> ReusingServerHost<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            current: Mutex::new(None),
        }
    }

    /// The instance currently running, if any
    pub async fn current(&self) -> Option<WebServerHandle> {
        self.current.lock().await.clone()
    }
}

#[async_trait]
impl<H: WebServerHost> WebServerHost for ReusingServerHost<H> {
    async fn start(&self, root: &Path, port: Option<u16>) -> Result<WebServerHandle> {
        // Held across start so two callers never race to create instances
        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.is_compatible(root, port) {
                tracing::debug!(port = existing.port, "reusing web server");
                return Ok(existing.clone());
            }
            let stale = existing.clone();
            if let Err(e) = self.inner.dispose(&stale).await {
                tracing::warn!(port = stale.port, "failed to stop web server: {}", e);
            }
            *current = None;
        }

        let handle = self.inner.start(root, port).await?;
        tracing::info!(root = %handle.root.display(), port = handle.port, "web server started");
        *current = Some(handle.clone());
        Ok(handle)
    }

    async fn dispose(&self, handle: &WebServerHandle) -> Result<()> {
        let mut current = self.current.lock().await;
        if current.as_ref() == Some(handle) {
            *current = None;
        }
        self.inner.dispose(handle).await
    }
}

/// A listener task and the signal that stops it
struct ServerTask {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Serves files below a root directory over HTTP on 127.0.0.1
///
/// Only `GET` and `HEAD` are answered; every response closes the
/// connection.
#[derive(Default)]
pub struct StaticFileHost {
    servers: DashMap<u16, ServerTask>,
}

#[async_trait]
impl WebServerHost for StaticFileHost {
    async fn start(&self, root: &Path, port: Option<u16>) -> Result<WebServerHandle> {
        let requested = port.unwrap_or(0);
        let listener = TcpListener::bind(("127.0.0.1", requested))
            .await
            .map_err(|e| Error::Server(format!("Cannot listen on port {}: {}", requested, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Server(format!("Cannot read listener address: {}", e)))?
            .port();

        let served = Arc::new(root.to_path_buf());
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let root = Arc::clone(&served);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, &root).await {
                                    tracing::debug!("web server connection failed: {}", e);
                                }
                            });
                        }
                        Err(e) => tracing::warn!("web server accept failed: {}", e),
                    },
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        self.servers.insert(port, ServerTask { shutdown, task });
        Ok(WebServerHandle {
            root: root.to_path_buf(),
            port,
        })
    }

    async fn dispose(&self, handle: &WebServerHandle) -> Result<()> {
        if let Some((_, server)) = self.servers.remove(&handle.port) {
            let _ = server.shutdown.send(());
            let _ = server.task.await;
            tracing::debug!(port = handle.port, "web server stopped");
        }
        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, root: &Path) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read.take(MAX_REQUEST_HEAD));

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut header = String::new();
    loop {
        header.clear();
        if reader.read_line(&mut header).await? == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or("/");
    if method != "GET" && method != "HEAD" {
        return respond(&mut write, "405 Method Not Allowed", "text/plain", b"", false).await;
    }
    let head_only = method == "HEAD";

    let Some(path) = resolve_target(root, target) else {
        return respond(&mut write, "404 Not Found", "text/plain", b"", head_only).await;
    };
    match tokio::fs::read(&path).await {
        Ok(body) => respond(&mut write, "200 OK", content_type(&path), &body, head_only).await,
        Err(_) => {
            tracing::debug!(path = %path.display(), "web server: not found");
            respond(&mut write, "404 Not Found", "text/plain", b"", head_only).await
        }
    }
}

async fn respond<W: AsyncWrite + Unpin>(
    out: &mut W,
    status: &str,
    content_type: &str,
    body: &[u8],
    head_only: bool,
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    out.write_all(head.as_bytes()).await?;
    if !head_only {
        out.write_all(body).await?;
    }
    out.shutdown().await
}

/// Map a request target onto a file below `root`; `None` for paths escaping it
fn resolve_target(root: &Path, target: &str) -> Option<PathBuf> {
    let path = target.split(&['?', '#'][..]).next().unwrap_or_default();
    let mut resolved = root.to_path_buf();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let segment = percent_decode_str(segment).decode_utf8().ok()?;
        match &*segment {
            "." => continue,
            ".." => return None,
            s if s.contains(&['/', '\\'][..]) => return None,
            s => resolved.push(s),
        }
    }
    Some(resolved)
}

fn content_type(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some(".html") | Some(".htm") => "text/html; charset=utf-8",
        Some(".js") | Some(".mjs") => "application/javascript",
        Some(".css") => "text/css",
        Some(".json") | Some(".map") => "application/json",
        Some(".svg") => "image/svg+xml",
        Some(".png") => "image/png",
        Some(".jpg") | Some(".jpeg") => "image/jpeg",
        Some(".gif") => "image/gif",
        Some(".wasm") => "application/wasm",
        Some(".txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingHost {
        started: AtomicUsize,
        disposed: AtomicUsize,
        next_port: AtomicU16,
    }

    #[async_trait]
    impl WebServerHost for CountingHost {
        async fn start(&self, root: &Path, port: Option<u16>) -> Result<WebServerHandle> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let port = port.unwrap_or_else(|| 9000 + self.next_port.fetch_add(1, Ordering::SeqCst));
            Ok(WebServerHandle {
                root: root.to_path_buf(),
                port,
            })
        }

        async fn dispose(&self, _handle: &WebServerHandle) -> Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_compatible_server_is_reused() {
        let host = ReusingServerHost::new(CountingHost::default());
        let first = host.start(Path::new("/proj"), None).await.unwrap();
        let again = host.start(Path::new("/PROJ/"), Some(first.port)).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(host.inner.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incompatible_server_is_replaced() {
        let host = ReusingServerHost::new(CountingHost::default());
        host.start(Path::new("/proj"), None).await.unwrap();
        let other = host.start(Path::new("/other"), None).await.unwrap();

        assert_eq!(host.inner.started.load(Ordering::SeqCst), 2);
        assert_eq!(host.inner.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(host.current().await, Some(other.clone()));

        host.dispose(&other).await.unwrap();
        assert_eq!(host.current().await, None);
    }

    #[test]
    fn test_url_for_file_under_root() {
        let handle = WebServerHandle {
            root: PathBuf::from("/proj"),
            port: 8123,
        };
        let url = handle.url_for(Path::new("/proj/tests/_jsharness.a.test.html")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8123/tests/_jsharness.a.test.html");
        assert!(handle.url_for(Path::new("/elsewhere/x.html")).is_err());
    }

    async fn fetch(port: u16, request: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_static_host_serves_files_under_root() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub dir")).unwrap();
        std::fs::write(tmp.path().join("sub dir/a.js"), "var a = 1;").unwrap();

        let host = StaticFileHost::default();
        let handle = host.start(tmp.path(), None).await.unwrap();
        assert_ne!(handle.port, 0);

        let ok = fetch(handle.port, "GET /sub%20dir/a.js?v=1 HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(ok.starts_with("HTTP/1.1 200 OK"), "{}", ok);
        assert!(ok.contains("Content-Type: application/javascript"));
        assert!(ok.ends_with("var a = 1;"));

        let head = fetch(handle.port, "HEAD /sub%20dir/a.js HTTP/1.1\r\n\r\n").await;
        assert!(head.contains("Content-Length: 10"));
        assert!(!head.contains("var a"));

        let missing = fetch(handle.port, "GET /missing.js HTTP/1.1\r\n\r\n").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
        let escape = fetch(handle.port, "GET /../etc/passwd HTTP/1.1\r\n\r\n").await;
        assert!(escape.starts_with("HTTP/1.1 404"));
        let post = fetch(handle.port, "POST /sub%20dir/a.js HTTP/1.1\r\n\r\n").await;
        assert!(post.starts_with("HTTP/1.1 405"));

        host.dispose(&handle).await.unwrap();
        assert!(host.servers.is_empty());
        assert!(TcpStream::connect(("127.0.0.1", handle.port)).await.is_err());
    }

    #[test]
    fn test_resolve_target_rejects_escapes() {
        let root = Path::new("/srv");
        assert_eq!(resolve_target(root, "/a/./b.js#x"), Some(PathBuf::from("/srv/a/b.js")));
        assert_eq!(resolve_target(root, "/a/%2e%2e/b.js"), None);
        assert_eq!(resolve_target(root, "/a%2Fb.js"), None);
        assert_eq!(content_type(Path::new("h.HTML")), "text/html; charset=utf-8");
    }
}
