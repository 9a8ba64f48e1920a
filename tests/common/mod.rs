//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use shm_bridge::channel::{NamedSemaphore, RequestRecord, WorkerEndpoint};
use shm_bridge::config::BridgeConfig;
use shm_bridge::lifecycle::{self, Shutdown};
use shm_bridge::net::listener::ListenerError;

/// A POSIX object name no other test will use.
pub fn unique_name(tag: &str) -> String {
    format!("/shm-bridge-{}-{}", tag, uuid::Uuid::new_v4().simple())
}

/// Plain HTTP on an ephemeral loopback port, private channel names, short
/// timeouts.
pub fn test_config(tag: &str) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.server.tls = false;
    config.server.bind_host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.timeout_seconds = 1;
    config.server.read_timeout_ms = 1000;
    config.channel.name = unique_name(tag);
    config.channel.request_signal = unique_name(&format!("{tag}-sem"));
    config.channel.poll_interval_ms = 2;
    config
}

pub struct TestBridge {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub channel_name: String,
    pub signal_name: String,
    handle: JoinHandle<Result<(), ListenerError>>,
}

impl TestBridge {
    /// Trigger shutdown and wait for teardown to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

pub async fn start_bridge(config: BridgeConfig) -> TestBridge {
    let runtime = lifecycle::start(&config).await.unwrap();
    let addr = runtime.listener.local_addr().unwrap();
    let shutdown = runtime.shutdown.clone();
    let handle = tokio::spawn(runtime.run_until_shutdown());
    TestBridge {
        addr,
        shutdown,
        channel_name: config.channel.name.clone(),
        signal_name: config.channel.request_signal.clone(),
        handle,
    }
}

/// A scripted worker on its own OS thread, like the external process.
pub struct TestWorker {
    stop: Arc<AtomicBool>,
    thread: Option<ThreadHandle<()>>,
}

impl Drop for TestWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Attach to the bridge's channel and answer each request with whatever
/// `respond` returns. `None` leaves the request unanswered.
pub fn spawn_worker<F>(bridge: &TestBridge, respond: F) -> TestWorker
where
    F: Fn(&RequestRecord) -> Option<(i32, Vec<u8>)> + Send + 'static,
{
    let worker = WorkerEndpoint::attach(&bridge.channel_name).unwrap();
    let signal = NamedSemaphore::open(&bridge.signal_name).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let thread = std::thread::spawn({
        let stop = Arc::clone(&stop);
        move || {
            while !stop.load(Ordering::Acquire) {
                let _ = signal.wait_timeout(Duration::from_millis(20));
                while let Some(request) = worker.next_request() {
                    if let Some((status, body)) = respond(&request) {
                        worker.respond(request.request_id, status, &body);
                    }
                }
            }
        }
    });

    TestWorker {
        stop,
        thread: Some(thread),
    }
}

/// Write `request` and read until the server closes.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    String::from_utf8_lossy(&reply).into_owned()
}

/// A reply split into status code, header block and body.
pub struct Reply {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

pub fn parse_reply(raw: &str) -> Reply {
    let (head, body) = raw.split_once("\r\n\r\n").expect("reply has no header terminator");
    let status = head
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("reply has no status code");
    Reply {
        status,
        head: head.to_string(),
        body: body.to_string(),
    }
}
