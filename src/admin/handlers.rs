use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::channel::shm::ChannelSnapshot;
use crate::config::OverflowPolicy;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub tls: bool,
    pub num_workers: usize,
    pub active_connections: u64,
}

#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    pub name: Option<String>,
    pub overflow: OverflowPolicy,
    pub in_flight: usize,
    #[serde(flatten)]
    pub rings: ChannelSnapshot,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let bridge = &state.bridge;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: bridge.uptime().as_secs(),
        tls: bridge.tls_enabled(),
        num_workers: bridge.num_workers,
        active_connections: bridge.tracker.active_count(),
    })
}

pub async fn get_channel(State(state): State<AdminState>) -> Json<ChannelStatus> {
    let bridge = &state.bridge;
    Json(ChannelStatus {
        name: bridge.channel.name().map(str::to_string),
        overflow: bridge.overflow,
        in_flight: bridge.handler.correlator().in_flight(),
        rings: bridge.channel.snapshot(),
    })
}
