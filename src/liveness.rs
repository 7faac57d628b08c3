//! Minimal HTTP responder so a hosting platform can see the process is up.
//!
//! Endpoints:
//!   GET /        - static "running" body
//!   GET /health  - {"status":"ok"}

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use crate::logging::{log, obj, v_str, Domain, Level};

pub const RUNNING_BODY: &str = "Bot is running!";

/// Most bytes read from one connection (request line plus headers).
pub const MAX_REQUEST_BYTES: u64 = 8192;

/// How long a client gets to send its request and read the reply.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(5);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding liveness port {port}"))
}

/// Accept connections forever. Each connection is answered on its own task.
pub async fn serve(listener: TcpListener) -> Result<()> {
    serve_with_deadline(listener, REQUEST_DEADLINE).await
}

pub async fn serve_with_deadline(listener: TcpListener, deadline: Duration) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log(
            Level::Info,
            Domain::Http,
            "listening",
            obj(&[("addr", v_str(&addr.to_string()))]),
        );
    }
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log(
                    Level::Warn,
                    Domain::Http,
                    "accept_failed",
                    obj(&[("error", v_str(&e.to_string()))]),
                );
                // EMFILE and friends persist; don't spin on them
                sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tokio::spawn(async move {
            // dropping the stream on timeout closes the socket
            let outcome = match timeout(deadline, handle(stream)).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => "request deadline elapsed".to_string(),
            };
            log(
                Level::Debug,
                Domain::Http,
                "connection_dropped",
                obj(&[("error", v_str(&outcome))]),
            );
        });
    }
}

fn route(request_line: &str) -> (&'static str, &'static str, String) {
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");
    let path = target.split('?').next().unwrap_or("");
    match (method, path) {
        ("GET", "/") => ("200 OK", "text/plain; charset=utf-8", RUNNING_BODY.to_string()),
        ("GET", "/health") => ("200 OK", "application/json", json!({"status": "ok"}).to_string()),
        _ => ("404 NOT FOUND", "text/plain; charset=utf-8", "Not Found".to_string()),
    }
}

/// Read the request line and drain headers, never more than
/// `MAX_REQUEST_BYTES` in total.
async fn read_request<R>(reader: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }
    Ok(request_line.trim_end().to_string())
}

async fn handle(mut stream: TcpStream) -> Result<()> {
    let request_line = read_request(&mut stream).await?;
    let (status, content_type, body) = route(&request_line);
    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
