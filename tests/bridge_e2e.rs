//! End-to-end tests: real sockets, a named channel and a worker thread.

mod common;

use std::time::{Duration, Instant};

use common::{parse_reply, send_raw, spawn_worker, start_bridge, test_config};
use shm_bridge::channel::{NamedSemaphore, SharedChannel, WorkerEndpoint};
use shm_bridge::config::OverflowPolicy;

#[tokio::test]
async fn answers_with_worker_status_and_body() {
    let bridge = start_bridge(test_config("e2e-ok")).await;
    let _worker = spawn_worker(&bridge, |request| {
        if request.path() == b"/status" && request.query() == b"x=1" {
            Some((200, br#"{"ok":true}"#.to_vec()))
        } else {
            Some((404, b"{}".to_vec()))
        }
    });

    let raw = send_raw(bridge.addr, b"GET /status?x=1 HTTP/1.1\r\nHost: a\r\n\r\n").await;
    let reply = parse_reply(&raw);

    assert_eq!(reply.status, 200);
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(reply.body, r#"{"ok":true}"#);
    assert_eq!(reply.header("Content-Length"), Some("11"));
    assert_eq!(reply.header("Content-Type"), Some("application/json"));
    assert_eq!(reply.header("Connection"), Some("close"));

    bridge.stop().await;
}

#[tokio::test]
async fn forwards_post_body_and_multipart_boundary() {
    let bridge = start_bridge(test_config("e2e-post")).await;
    let _worker = spawn_worker(&bridge, |request| {
        let body = format!(
            "{}|{}|{}",
            request.method_text(),
            request.boundary_text(),
            String::from_utf8_lossy(request.body_block())
        );
        Some((201, body.into_bytes()))
    });

    let request = b"POST /upload HTTP/1.1\r\n\
Content-Type: multipart/form-data; boundary=XyZ\r\n\
Content-Length: 5\r\n\r\nhello";
    let reply = parse_reply(&send_raw(bridge.addr, request).await);

    assert_eq!(reply.status, 201);
    assert_eq!(reply.body, "POST|XyZ|hello");

    bridge.stop().await;
}

#[tokio::test]
async fn unanswered_request_times_out_with_504() {
    let config = test_config("e2e-timeout");
    let timeout = config.server.response_timeout();
    let bridge = start_bridge(config).await;

    let started = Instant::now();
    let reply = parse_reply(&send_raw(bridge.addr, b"GET /slow HTTP/1.1\r\n\r\n").await);

    assert_eq!(reply.status, 504);
    assert_eq!(reply.header("Content-Length"), Some("0"));
    assert!(reply.body.is_empty());
    assert!(started.elapsed() >= timeout);

    bridge.stop().await;
}

#[tokio::test]
async fn malformed_request_line_gets_400_and_is_not_submitted() {
    let bridge = start_bridge(test_config("e2e-bad")).await;

    let reply = parse_reply(&send_raw(bridge.addr, b"GARBAGE\r\n\r\n").await);
    assert_eq!(reply.status, 400);

    let channel = SharedChannel::attach(&bridge.channel_name).unwrap();
    assert_eq!(channel.snapshot().requests.write_cursor, 0);
    drop(channel);

    bridge.stop().await;
}

#[tokio::test]
async fn full_request_ring_rejects_with_503() {
    let mut config = test_config("e2e-full");
    config.channel.overflow = OverflowPolicy::Reject;
    config.server.timeout_seconds = 2;
    let bridge = start_bridge(config).await;
    let channel = SharedChannel::attach(&bridge.channel_name).unwrap();

    // Nobody drains: sixteen requests fill the ring.
    let waiting: Vec<_> = (0..16)
        .map(|i| {
            let addr = bridge.addr;
            tokio::spawn(async move {
                let request = format!("GET /fill/{i} HTTP/1.1\r\n\r\n");
                parse_reply(&send_raw(addr, request.as_bytes()).await).status
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(2);
    while channel.snapshot().requests.depth < 16 {
        assert!(Instant::now() < deadline, "ring never filled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let reply = parse_reply(&send_raw(bridge.addr, b"GET /one-more HTTP/1.1\r\n\r\n").await);
    assert_eq!(reply.status, 503);
    assert_eq!(channel.snapshot().requests.write_cursor, 16);

    for handle in waiting {
        assert_eq!(handle.await.unwrap(), 504);
    }
    drop(channel);
    bridge.stop().await;
}

#[tokio::test]
async fn concurrent_clients_each_get_their_own_response() {
    const CLIENTS: usize = 4;
    let bridge = start_bridge(test_config("e2e-order")).await;

    // Collect every request first, then answer newest first.
    let worker = WorkerEndpoint::attach(&bridge.channel_name).unwrap();
    let signal = NamedSemaphore::open(&bridge.signal_name).unwrap();
    let answering = std::thread::spawn(move || {
        let mut batch = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while batch.len() < CLIENTS && Instant::now() < deadline {
            let _ = signal.wait_timeout(Duration::from_millis(20));
            while let Some(request) = worker.next_request() {
                batch.push(request);
            }
        }
        for request in batch.iter().rev() {
            let body = request.path_text().into_owned();
            worker.respond(request.request_id, 200, body.as_bytes());
        }
        batch.len()
    });

    let clients: Vec<_> = (0..CLIENTS)
        .map(|i| {
            let addr = bridge.addr;
            tokio::spawn(async move {
                let request = format!("GET /client/{i} HTTP/1.1\r\n\r\n");
                let reply = parse_reply(&send_raw(addr, request.as_bytes()).await);
                (i, reply.status, reply.body)
            })
        })
        .collect();

    for handle in clients {
        let (i, status, body) = handle.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, format!("/client/{i}"));
    }
    assert_eq!(answering.join().unwrap(), CLIENTS);

    bridge.stop().await;
}

#[tokio::test]
async fn shutdown_unlinks_channel_and_signal() {
    let bridge = start_bridge(test_config("e2e-teardown")).await;
    let channel_name = bridge.channel_name.clone();
    let signal_name = bridge.signal_name.clone();

    assert!(SharedChannel::attach(&channel_name).is_ok());
    bridge.stop().await;

    assert!(SharedChannel::attach(&channel_name).is_err());
    assert!(NamedSemaphore::open(&signal_name).is_err());
}
