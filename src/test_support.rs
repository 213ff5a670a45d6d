//! In-process HTTP responder for network-facing tests.
//!
//! Routes are matched on the request path with the query string removed, so
//! `/story?utm=1` and `/story?utm=2` hit the same page.

use crate::fetcher::FetchConfig;
use crate::search::SearchQuery;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const NOT_FOUND: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found";
const CHUNKED_HEAD: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n";

#[derive(Debug, Clone)]
pub enum Route {
    Page { status: u16, body: String },
    Redirect(String),
    /// Accept the connection and never answer.
    Hang,
    /// Chunked 200 with no Content-Length that repeats `chunk` until the
    /// client hangs up.
    Stream { chunk: String },
}

impl Route {
    pub fn page(status: u16, body: impl Into<String>) -> Self {
        Route::Page {
            status,
            body: body.into(),
        }
    }
}

pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|(p, r)| (p.to_string(), r))
            .collect();
        let routes = Arc::new(routes);

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let routes = Arc::clone(&routes);
                tokio::spawn(handle(stream, routes));
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connections accepted so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn handle(mut stream: TcpStream, routes: Arc<HashMap<String, Route>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or("/");

    let response = match routes.get(path) {
        Some(Route::Hang) => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return;
        }
        Some(Route::Stream { chunk }) => {
            stream_until_closed(&mut stream, chunk).await;
            return;
        }
        Some(Route::Redirect(location)) => format!(
            "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        ),
        Some(Route::Page { status, body }) => format!(
            "HTTP/1.1 {status} Test\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
        None => NOT_FOUND.to_string(),
    };

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn stream_until_closed(stream: &mut TcpStream, chunk: &str) {
    if stream.write_all(CHUNKED_HEAD.as_bytes()).await.is_err() {
        return;
    }
    let frame = format!("{:x}\r\n{chunk}\r\n", chunk.len());
    while stream.write_all(frame.as_bytes()).await.is_ok() {
        tokio::task::yield_now().await;
    }
}

/// A complete article page whose body is `paragraphs` copies of a long sentence.
pub fn article_page(canonical: &str, title: &str, paragraphs: usize) -> String {
    let body = (0..paragraphs)
        .map(|i| {
            format!(
                "<p>Paragraph {i} reports that the city council approved the new transit budget, \
                 which expands bus service, adds protected bike lanes, and funds station repairs.</p>"
            )
        })
        .collect::<String>();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>{title} | Example News</title>
  <link rel="canonical" href="{canonical}">
  <meta property="og:title" content="{title}">
  <meta property="og:site_name" content="Example News">
</head>
<body>
  <nav><a href="/">Home</a> <a href="/world">World</a></nav>
  <article>
    <h1>{title}</h1>
    {body}
  </article>
  <footer>Copyright Example News</footer>
</body>
</html>"#
    )
}

pub fn search_query(query: &str, language: &str, country: &str, max_results: usize) -> SearchQuery {
    SearchQuery {
        query: query.into(),
        language: language.into(),
        country: country.into(),
        max_results,
    }
}

/// Fetch settings for local servers: short timeout, no backoff, no proxy.
pub fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        timeout_ms: 300,
        max_retries: 3,
        backoff_base_ms: 1,
        max_backoff_ms: 5,
        jitter_ms: 0,
        per_host_interval_ms: 0,
        use_env_proxy: false,
        ..Default::default()
    }
}
