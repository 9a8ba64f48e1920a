use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

use shm_bridge::channel::layout::{DEFAULT_CHANNEL_NAME, DEFAULT_REQUEST_SIGNAL};
use shm_bridge::channel::ring::RingSnapshot;
use shm_bridge::channel::{NamedSemaphore, RequestRecord, SharedChannel, WorkerEndpoint};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Operator CLI for the shared-memory bridge", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key
    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check bridge status
    Status,
    /// Show ring cursors and in-flight requests
    Channel,
    /// Watch ring occupancy directly from shared memory
    Monitor {
        #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
        name: String,
        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Print one frame and exit
        #[arg(long)]
        once: bool,
    },
    /// Answer every request with a JSON echo of what was parsed
    EchoWorker {
        #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
        name: String,
        #[arg(long, default_value = DEFAULT_REQUEST_SIGNAL)]
        signal: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => admin_get(&cli.url, &cli.key, "/admin/status").await?,
        Commands::Channel => admin_get(&cli.url, &cli.key, "/admin/channel").await?,
        Commands::Monitor {
            name,
            interval_ms,
            once,
        } => monitor(&name, Duration::from_millis(interval_ms), once).await?,
        Commands::EchoWorker { name, signal } => echo_worker(name, signal).await?,
    }

    Ok(())
}

async fn admin_get(url: &str, key: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);

    let res = reqwest::Client::new()
        .get(format!("{}{}", url, path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn draw_bar(label: &str, ring: &RingSnapshot) -> String {
    const WIDTH: usize = 30;
    let depth = ring.depth as usize;
    let ratio = if ring.capacity == 0 {
        0.0
    } else {
        (depth as f64 / ring.capacity as f64).min(1.0)
    };
    let filled = (WIDTH as f64 * ratio) as usize;
    format!(
        "{:<18} [{}{}] {}/{} ({:.0}%)",
        label,
        "█".repeat(filled),
        "-".repeat(WIDTH - filled),
        depth,
        ring.capacity,
        ratio * 100.0
    )
}

async fn monitor(name: &str, interval: Duration, once: bool) -> Result<(), Box<dyn std::error::Error>> {
    let channel = SharedChannel::attach(name)?;

    loop {
        let snapshot = channel.snapshot();
        if !once {
            print!("\x1b[2J\x1b[H");
        }
        println!("--- {} ---\n", name);
        println!("{}", draw_bar("Requests", &snapshot.requests));
        println!("{}", draw_bar("Responses", &snapshot.responses));
        println!(
            "\nRequest ring:  write={} read={}",
            snapshot.requests.write_cursor, snapshot.requests.read_cursor
        );
        println!(
            "Response ring: write={} read={}",
            snapshot.responses.write_cursor, snapshot.responses.read_cursor
        );

        if once {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn echo(record: &RequestRecord) -> Value {
    json!({
        "request_id": record.request_id,
        "method": record.method_text(),
        "path": record.path_text(),
        "query": record.query_text(),
        "boundary": record.boundary_text(),
        "content_length": record.content_length,
        "body": String::from_utf8_lossy(record.body_block()),
    })
}

async fn echo_worker(name: String, signal: String) -> Result<(), Box<dyn std::error::Error>> {
    let worker = WorkerEndpoint::attach(&name)?;
    let semaphore = NamedSemaphore::open(&signal)?;
    let stop = Arc::new(AtomicBool::new(false));

    println!("echo-worker attached to {} (signal {})", name, signal);

    let handle = tokio::task::spawn_blocking({
        let stop = Arc::clone(&stop);
        move || -> std::io::Result<u64> {
            let mut served = 0u64;
            while !stop.load(Ordering::Acquire) {
                // Timed wait doubles as a poll for requests whose post was lost.
                semaphore.wait_timeout(Duration::from_millis(200))?;
                while let Some(record) = worker.next_request() {
                    let body = echo(&record).to_string();
                    worker.respond(record.request_id, 200, body.as_bytes());
                    served += 1;
                    println!(
                        "#{} {} {}",
                        record.request_id,
                        record.method_text(),
                        record.path_text()
                    );
                }
            }
            Ok(served)
        }
    });

    tokio::signal::ctrl_c().await?;
    stop.store(true, Ordering::Release);
    let served = handle.await??;
    println!("echo-worker stopped after {} requests", served);
    Ok(())
}
