//! HTTP collaborators against a local canned-response server.

use pagecast::reader::{HttpPageFetcher, PageFetcher};
use pagecast::{
    BlobStore, HttpBlobStore, HttpManifestSource, ManifestBuilder, ManifestSource, ResolveError,
    StorageConfig, StorageError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
struct Reply {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
}

impl Reply {
    fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Answers every request with the same reply and records what it received.
struct CannedServer {
    base: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl CannedServer {
    async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let reply = reply.clone();
                let seen = seen.clone();
                tokio::spawn(serve(socket, reply, seen));
            }
        });
        Self { base, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    reply: Reply,
    seen: Arc<Mutex<Vec<Captured>>>,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    let mut body = buf[header_end..].to_vec();
    if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while body.len() < len {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    } else if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        while find(&body, b"0\r\n\r\n").is_none() {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body = dechunk(&body);
    }

    // Recorded before replying so the client never observes a response first.
    seen.lock().unwrap().push(Captured {
        request_line,
        headers,
        body,
    });

    tokio::time::sleep(reply.delay).await;
    let response = format!(
        "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.body.len()
    );
    socket.write_all(response.as_bytes()).await.ok()?;
    socket.write_all(&reply.body).await.ok()?;
    socket.shutdown().await.ok();
    Some(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn dechunk(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(eol) = find(raw, b"\r\n") {
        let size_str = String::from_utf8_lossy(&raw[..eol]);
        let size = usize::from_str_radix(size_str.split(';').next().unwrap_or("0").trim(), 16)
            .unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = eol + 2;
        out.extend_from_slice(&raw[start..start + size]);
        raw = &raw[start + size + 2..];
    }
    out
}

const STREAM_OK: &str =
    r#"{"result":{"links":{"download":"https://files.test/d/abc","stream":"https://files.test/s/abc"}}}"#;

fn store_for(server: &CannedServer, timeout_secs: u64) -> HttpBlobStore {
    let config = StorageConfig::new(server.url("/upload"))
        .with_api_key("k-123")
        .with_timeout_secs(timeout_secs);
    HttpBlobStore::new(config).unwrap()
}

// ── Uploads ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_sends_multipart_file_and_returns_stream_link() {
    let server = CannedServer::start(Reply::new(200, STREAM_OK)).await;
    let store = store_for(&server, 5);

    let url = store
        .upload("ep-1-page-3.jpg", b"\xFF\xD8jpeg-bytes", "image/jpeg")
        .await
        .unwrap();
    assert_eq!(url, "https://files.test/s/abc");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert!(req.request_line.starts_with("POST /upload "), "{}", req.request_line);
    assert_eq!(req.header("x-api-key"), Some("k-123"));
    assert!(req
        .header("content-type")
        .unwrap()
        .starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&req.body);
    assert!(body.contains(r#"name="file""#), "{body}");
    assert!(body.contains(r#"filename="ep-1-page-3.jpg""#), "{body}");
    assert!(body.contains("image/jpeg"), "{body}");
}

#[tokio::test]
async fn server_error_is_rejected() {
    let server = CannedServer::start(Reply::new(500, "{}")).await;
    let err = store_for(&server, 5)
        .upload("ep-1-page-1.jpg", b"x", "image/jpeg")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::Rejected {
            target: "ep-1-page-1.jpg".into(),
            status: 500
        }
    );
}

#[tokio::test]
async fn success_without_stream_link_is_malformed() {
    let server = CannedServer::start(Reply::new(200, r#"{"result":{"links":{}}}"#)).await;
    let err = store_for(&server, 5)
        .upload("ep-1-page-1.jpg", b"x", "image/jpeg")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::MalformedResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn slow_store_times_out() {
    let server =
        CannedServer::start(Reply::new(200, STREAM_OK).delayed(Duration::from_secs(3))).await;
    let err = store_for(&server, 1)
        .upload("ep-1-page-1.jpg", b"x", "image/jpeg")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::Timeout {
            target: "ep-1-page-1.jpg".into(),
            secs: 1
        }
    );
}

// ── Fetches ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_maps_statuses() {
    let missing = CannedServer::start(Reply::new(404, "")).await;
    let url = missing.url("/s/gone");
    assert_eq!(
        store_for(&missing, 5).fetch(&url).await.unwrap_err(),
        StorageError::NotFound { url }
    );

    let ok = CannedServer::start(Reply::new(200, "page-bytes")).await;
    let bytes = store_for(&ok, 5).fetch(&ok.url("/s/abc")).await.unwrap();
    assert_eq!(bytes, b"page-bytes");
    assert!(ok.requests()[0].request_line.starts_with("GET /s/abc "));
}

#[tokio::test]
async fn page_fetcher_reports_http_errors() {
    let ok = CannedServer::start(Reply::new(200, "img")).await;
    let fetcher = HttpPageFetcher::new(5).unwrap();
    assert_eq!(fetcher.fetch(&ok.url("/p/1")).await.unwrap(), b"img");

    let down = CannedServer::start(Reply::new(503, "")).await;
    assert!(matches!(
        fetcher.fetch(&down.url("/p/1")).await,
        Err(StorageError::Rejected { status: 503, .. })
    ));
}

// ── Manifest source ──────────────────────────────────────────────────────────

#[tokio::test]
async fn http_manifest_source_maps_statuses() {
    let manifest = ManifestBuilder::new("ep-1", "Remote", 1)
        .page(1, "https://files.test/s/p1")
        .build()
        .unwrap();
    let json = manifest.to_json_pretty().unwrap();

    let ok = CannedServer::start(Reply::new(200, json.clone())).await;
    let source = HttpManifestSource::new(ok.url("/"), 5).unwrap();
    assert_eq!(source.manifest_url("ep-1"), ok.url("/ep-1/mpd"));
    assert_eq!(source.load("ep-1").await.unwrap(), Some(json));
    assert!(ok.requests()[0].request_line.starts_with("GET /ep-1/mpd "));

    let playable = pagecast::reader::resolve(&source, "ep-1").await.unwrap();
    assert_eq!(playable.manifest(), &manifest);

    let missing = CannedServer::start(Reply::new(404, "")).await;
    let source = HttpManifestSource::new(missing.base.clone(), 5).unwrap();
    assert_eq!(source.load("ep-1").await.unwrap(), None);
    assert_eq!(
        pagecast::reader::resolve(&source, "ep-1").await.unwrap_err(),
        ResolveError::ManifestNotFound {
            episode_id: "ep-1".into()
        }
    );

    let down = CannedServer::start(Reply::new(503, "")).await;
    let source = HttpManifestSource::new(down.base.clone(), 5).unwrap();
    match source.load("ep-1").await.unwrap_err() {
        ResolveError::ManifestUnavailable { reason, .. } => assert_eq!(reason, "HTTP 503"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn http_manifest_must_match_the_id_and_be_published() {
    let manifest = ManifestBuilder::new("ep-1", "Remote", 1)
        .page(1, "https://files.test/s/p1")
        .build()
        .unwrap();
    let json = manifest.to_json_pretty().unwrap();

    let server = CannedServer::start(Reply::new(200, json.clone())).await;
    let source = HttpManifestSource::new(server.base.clone(), 5).unwrap();
    assert!(matches!(
        pagecast::reader::resolve(&source, "ep-2").await,
        Err(ResolveError::ManifestUnavailable { .. })
    ));

    let mut draft: serde_json::Value = serde_json::from_slice(&json).unwrap();
    draft["published"] = false.into();
    let server = CannedServer::start(Reply::new(200, draft.to_string())).await;
    let source = HttpManifestSource::new(server.base.clone(), 5).unwrap();
    assert_eq!(
        pagecast::reader::resolve(&source, "ep-1").await.unwrap_err(),
        ResolveError::ManifestNotFound {
            episode_id: "ep-1".into()
        }
    );
}
