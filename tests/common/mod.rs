//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use caching_proxy::cache::CacheStore;
use caching_proxy::config::BackendConfig;
use caching_proxy::observability::ProxyMetrics;
use caching_proxy::{Proxy, ProxyConfig, Shutdown};

/// A request as the mock origin received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub target: String,
    pub host: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the mock origin answers.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Raw-TCP HTTP/1.1 origin that records requests and counts calls.
pub struct MockOrigin {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockOrigin {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start an origin on an ephemeral port that answers with `respond`.
pub async fn start_origin<F>(respond: F) -> MockOrigin
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let (c, r) = (calls.clone(), requests.clone());
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            let (calls, requests, respond) = (c.clone(), r.clone(), respond.clone());
            tokio::spawn(async move {
                let _ = serve_one(socket, calls, requests, respond).await;
            });
        }
    });

    MockOrigin {
        addr,
        calls,
        requests,
    }
}

async fn serve_one<F>(
    mut socket: TcpStream,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    respond: Arc<F>,
) -> std::io::Result<()>
where
    F: Fn(&Recorded) -> Reply,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let host = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("host"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let recorded = Recorded {
        method,
        target,
        host,
        headers,
        body,
    };

    calls.fetch_add(1, Ordering::SeqCst);
    let reply = respond(&recorded);
    requests.lock().unwrap().push(recorded);

    let mut response = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    for (name, value) in &reply.headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.body.len(),
        reply.body
    ));
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A proxy serving on an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
    pub metrics: Arc<ProxyMetrics>,
    pub store: Arc<CacheStore>,
    pub handle: JoinHandle<Result<(), caching_proxy::StartupError>>,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("proxy did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

/// Config whose default backend is `target`.
pub fn config_for(target: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.default_backend = BackendConfig {
        target: target.to_string(),
        timeout_secs: 5,
    };
    config.frontend.listen_address = "127.0.0.1:0".to_string();
    config.frontend.metrics_port = 0;
    config
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let proxy = Proxy::build(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let metrics = proxy.metrics().clone();
    let store = proxy.store().clone();

    let s = shutdown.clone();
    let handle = tokio::spawn(async move { proxy.run(listener, &s).await });

    // Let the server subscribe to shutdown before tests can trigger it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    RunningProxy {
        addr,
        shutdown,
        metrics,
        store,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
