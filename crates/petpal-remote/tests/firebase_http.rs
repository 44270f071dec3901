//! Integration tests for FirebaseStore
//!
//! A minimal HTTP responder on a local port stands in for the database so
//! the real request/response and event-stream paths are exercised.

use std::time::Duration;

use petpal_core::{MotorCommand, RemoteConfig};
use petpal_remote::{CommandFeed, FirebaseStore, RemoteError, RemoteStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn store(url: &str, token: Option<&str>) -> FirebaseStore {
    FirebaseStore::new(RemoteConfig {
        database_url: Some(url.to_string()),
        auth_token: token.map(str::to_string),
        request_timeout_ms: 2000,
        ..Default::default()
    })
    .unwrap()
}

/// Read one request (headers plus Content-Length body).
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

async fn serve_once(listener: TcpListener, status: &'static str, body: &'static str) -> String {
    let (mut stream, _) = listener.accept().await.unwrap();
    let request = read_request(&mut stream).await;
    respond(&mut stream, status, body).await;
    request
}

#[tokio::test]
async fn test_fetch_schedule_parses_record() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(serve_once(
        listener,
        "200 OK",
        r#"{"foodRefillTimes":["08:00:AM","6:30 pm"],"pottyRefillTimes":{"1":"09:15:PM"}}"#,
    ));

    let record = store(&url, Some("tok"))
        .fetch_schedule()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.times_for(MotorCommand::Food), ["08:00:AM", "6:30 pm"]);
    assert!(record.times_for(MotorCommand::Water).is_empty());
    assert_eq!(record.times_for(MotorCommand::Waste), ["09:15:PM"]);

    let request = server.await.unwrap();
    assert!(
        request.starts_with("GET /users/default/scheduling.json?auth=tok HTTP/1.1"),
        "unexpected request: {request}"
    );
}

#[tokio::test]
async fn test_fetch_missing_schedule_is_none() {
    let (listener, url) = listener().await;
    tokio::spawn(serve_once(listener, "200 OK", "null"));

    assert!(store(&url, None).fetch_schedule().await.unwrap().is_none());
}

#[tokio::test]
async fn test_permission_denied_is_status_error() {
    let (listener, url) = listener().await;
    tokio::spawn(serve_once(
        listener,
        "401 Unauthorized",
        r#"{"error":"Permission denied"}"#,
    ));

    match store(&url, None).fetch_schedule().await {
        Err(RemoteError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("Permission denied"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_clear_command_puts_empty_string() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(serve_once(listener, "200 OK", r#""""#));

    store(&url, None).clear_command().await.unwrap();

    let request = server.await.unwrap();
    assert!(request.starts_with("PUT /users/default/commands/motor_command.json HTTP/1.1"));
    assert!(request.ends_with("\r\n\r\n\"\""), "unexpected body: {request}");
}

const SSE_HEADERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";

#[tokio::test]
async fn test_feed_forwards_root_changes_and_reconnects() {
    let (listener, url) = listener().await;

    tokio::spawn(async move {
        // first stream: initial value, a child change, then the server drops us
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        assert!(request.contains("accept: text/event-stream") || request.contains("Accept: text/event-stream"));
        stream.write_all(SSE_HEADERS.as_bytes()).await.unwrap();
        stream
            .write_all(b"event: put\ndata: {\"path\":\"/\",\"data\":\"FOOD\"}\n\n")
            .await
            .unwrap();
        stream
            .write_all(b"event: keep-alive\ndata: null\n\nevent: put\ndata: {\"path\":\"/x\",\"data\":1}\n\n")
            .await
            .unwrap();
        drop(stream);

        // second stream after the feed's backoff
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream.write_all(SSE_HEADERS.as_bytes()).await.unwrap();
        stream
            .write_all(b"event: put\ndata: {\"path\":\"/\",\"data\":\"POTTY\"}\n\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let store = store(&url, None);
    let mut feed = store.subscribe().await.unwrap();

    let first = timeout(Duration::from_secs(5), feed.recv()).await.unwrap().unwrap();
    assert_eq!(first.as_text(), Some("FOOD"));

    let second = timeout(Duration::from_secs(5), feed.recv()).await.unwrap().unwrap();
    assert_eq!(second.as_text(), Some("POTTY"));

    store.unsubscribe().await;
    let closed = timeout(Duration::from_secs(5), feed.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_silent_feed_is_reestablished() {
    let (listener, url) = listener().await;

    tokio::spawn(async move {
        // first stream stays open but goes quiet after one change
        let (mut silent, _) = listener.accept().await.unwrap();
        read_request(&mut silent).await;
        silent.write_all(SSE_HEADERS.as_bytes()).await.unwrap();
        silent
            .write_all(b"event: put\ndata: {\"path\":\"/\",\"data\":\"WATER\"}\n\n")
            .await
            .unwrap();

        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream.write_all(SSE_HEADERS.as_bytes()).await.unwrap();
        stream
            .write_all(b"event: put\ndata: {\"path\":\"/\",\"data\":\"FOOD\"}\n\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(silent);
    });

    let store = FirebaseStore::new(RemoteConfig {
        database_url: Some(url),
        stream_idle_timeout_ms: 300,
        ..Default::default()
    })
    .unwrap();
    let mut feed = store.subscribe().await.unwrap();

    let first = timeout(Duration::from_secs(5), feed.recv()).await.unwrap().unwrap();
    assert_eq!(first.as_text(), Some("WATER"));

    let second = timeout(Duration::from_secs(5), feed.recv()).await.unwrap().unwrap();
    assert_eq!(second.as_text(), Some("FOOD"));

    store.unsubscribe().await;
}
