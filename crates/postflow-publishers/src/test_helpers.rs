//! Fixtures for adapter tests

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use postflow_core::models::{
    AssetMetadata, MediaAsset, MediaKind, NewPost, Platform, PlatformCredential, Post,
};
use postflow_db::{CredentialStore, InMemoryCredentialStore, InMemoryMediaAssetStore};
use postflow_media::{MediaLibrary, ResolvedMedia};
use postflow_storage::LocalStorage;

/// A resolved asset that is never read from storage.
pub fn resolved(kind: MediaKind, public_url: Option<&str>) -> ResolvedMedia {
    let id = Uuid::new_v4();
    ResolvedMedia {
        asset: MediaAsset {
            id,
            kind,
            location: format!("media/{}/00/{}.{}", kind, id, kind.default_extension()),
            public_url: public_url.map(str::to_string),
            content_type: "application/octet-stream".to_string(),
            content_hash: id.simple().to_string(),
            size_bytes: 0,
            original_filename: None,
            duration_ms: None,
            resolution: None,
            created_at: Utc::now(),
        },
        public_url: public_url.map(str::to_string),
        local_path: None,
    }
}

pub fn post(platform: Platform, body: &str) -> Post {
    NewPost::new(platform, body).into_post(3, Utc::now())
}

pub fn post_to(platform: Platform, body: &str, recipients: &[&str]) -> Post {
    NewPost::new(platform, body)
        .with_recipients(recipients.iter().map(|r| r.to_string()).collect())
        .into_post(3, Utc::now())
}

pub async fn credentials(
    platform: Platform,
    auth: serde_json::Value,
) -> Arc<InMemoryCredentialStore> {
    let store = InMemoryCredentialStore::new();
    store
        .upsert_credential(PlatformCredential::new(platform, auth))
        .await
        .unwrap();
    Arc::new(store)
}

/// Media library on a temporary directory.
pub struct TestMedia {
    _dir: TempDir,
    pub library: MediaLibrary,
}

impl TestMedia {
    pub async fn new(public_base_url: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), public_base_url.map(str::to_string))
            .await
            .unwrap();
        let library = MediaLibrary::new(
            Arc::new(InMemoryMediaAssetStore::new()),
            Arc::new(storage),
        );
        Self { _dir: dir, library }
    }

    pub async fn add(&self, data: &[u8], kind: MediaKind, filename: &str) -> ResolvedMedia {
        let id = self
            .library
            .register_asset(data, kind, AssetMetadata::default().with_filename(filename))
            .await
            .unwrap();
        self.library.resolve(id).await.unwrap()
    }
}

/// HTTP endpoint that answers the first `answered` requests with `body` and
/// leaves every later request waiting forever.
pub struct StallingServer {
    url: String,
    requests: Arc<AtomicUsize>,
}

impl StallingServer {
    pub async fn start(answered: usize, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, counter.clone(), answered, body));
            }
        });

        Self { url, requests }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn serve(mut socket: TcpStream, requests: Arc<AtomicUsize>, answered: usize, body: &str) {
    let mut buf = Vec::new();
    while let Some(len) = read_request(&mut socket, &mut buf).await {
        buf.drain(..len);
        if requests.fetch_add(1, Ordering::SeqCst) >= answered {
            std::future::pending::<()>().await;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Length of the first complete request in `buf`, reading more as needed.
async fn read_request(socket: &mut TcpStream, buf: &mut Vec<u8>) -> Option<usize> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let total = head_end + 4 + body_len;
            if buf.len() >= total {
                return Some(total);
            }
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
