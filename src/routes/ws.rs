// WebSocket handlers: raw aggregate stream and per-viewer filtered dashboard

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::dashboard::Dashboard;
use crate::models::{AggregatedResult, MachineGroup, MachineHistory};
use crate::view::{DashboardView, LatestTable};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the ws client count on drop (connect = +1, drop = -1).
struct WsClientGuard(Arc<AtomicUsize>);

impl WsClientGuard {
    fn register(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count)
    }
}

impl Drop for WsClientGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

type WsSender = SplitSink<WebSocket, Message>;

/// Send with a deadline. False means the client is gone or too slow; the caller should stop.
async fn send(sender: &mut WsSender, msg: Message) -> bool {
    matches!(timeout(WS_SEND_TIMEOUT, sender.send(msg)).await, Ok(Ok(())))
}

async fn send_json<T: Serialize>(sender: &mut WsSender, value: &T) -> anyhow::Result<bool> {
    let json = serde_json::to_string(value)?;
    Ok(send(sender, Message::Text(json.into())).await)
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ScrapStreamMessage<'a> {
    /// First message: the latest aggregate per key at connect time.
    Snapshot { entries: &'a [AggregatedResult] },
}

pub(super) async fn ws_scrap(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let rx = state.pipeline.subscribe();
    let latest = state.dashboard.latest();
    let clients = state.ws_clients.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_scrap(socket, rx, latest, clients).await {
            tracing::info!("Scrap stream error: {}", e);
        }
    })
}

/// One JSON message per ingested sample, in broadcast order.
async fn stream_scrap(
    socket: WebSocket,
    mut rx: broadcast::Receiver<AggregatedResult>,
    latest: Vec<AggregatedResult>,
    clients: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    let _guard = WsClientGuard::register(clients);
    tracing::info!("Client connected to scrap stream");
    let (mut sender, mut receiver) = socket.split();

    if !send_json(&mut sender, &ScrapStreamMessage::Snapshot { entries: &latest }).await? {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(aggregate) => {
                        if !send_json(&mut sender, &aggregate).await? {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/scrap client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_interval.tick() => {
                if !send(&mut sender, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Viewer commands on /ws/dashboard.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardCommand {
    #[serde(rename_all = "camelCase")]
    SelectMachines { machines: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ToggleMachine { machine_id: String, checked: bool },
    #[serde(rename_all = "camelCase")]
    SelectIndex { index: Option<u32> },
    #[serde(rename_all = "camelCase")]
    SelectIndices { indices: Vec<u32> },
    #[serde(rename_all = "camelCase")]
    History { machine_id: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum DashboardMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Groups {
        groups: &'a [MachineGroup],
        machines: Vec<String>,
        indices: Vec<u32>,
    },
    #[serde(rename_all = "camelCase")]
    History {
        machine_id: &'a str,
        history: Option<&'a MachineHistory>,
    },
    Error { message: String },
}

pub(super) async fn ws_dashboard(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let rx = state.pipeline.subscribe();
    let dashboard = state.dashboard.clone();
    let clients = state.ws_clients.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_dashboard(socket, rx, dashboard, clients).await {
            tracing::info!("Dashboard stream error: {}", e);
        }
    })
}

/// Per-viewer session: own selection, own copy of the latest table, groups pushed only when
/// they actually change.
async fn stream_dashboard(
    socket: WebSocket,
    mut rx: broadcast::Receiver<AggregatedResult>,
    dashboard: Arc<Dashboard>,
    clients: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    let _guard = WsClientGuard::register(clients);
    tracing::info!("Client connected to dashboard stream");
    let (mut sender, mut receiver) = socket.split();

    let mut table = LatestTable::new();
    for entry in dashboard.latest() {
        table.upsert(entry);
    }
    let mut view = DashboardView::new();
    view.set_data(table.entries());
    if !send_groups(&mut sender, &view).await? {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(aggregate) => {
                        table.upsert(aggregate);
                        if view.set_data(table.entries()) && !send_groups(&mut sender, &view).await? {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/dashboard client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let command = match serde_json::from_str::<DashboardCommand>(text.as_str()) {
                    Ok(c) => c,
                    Err(e) => {
                        let msg = DashboardMessage::Error { message: format!("bad command: {}", e) };
                        if !send_json(&mut sender, &msg).await? {
                            break;
                        }
                        continue;
                    }
                };
                let changed = match command {
                    DashboardCommand::SelectMachines { machines } => view.set_machines(machines),
                    DashboardCommand::ToggleMachine { machine_id, checked } => {
                        view.toggle_machine(&machine_id, checked)
                    }
                    DashboardCommand::SelectIndex { index } => view.select_index(index),
                    DashboardCommand::SelectIndices { indices } => view.set_indices(indices),
                    DashboardCommand::History { machine_id } => {
                        let history = dashboard.history(&machine_id);
                        let msg = DashboardMessage::History {
                            machine_id: &machine_id,
                            history: history.as_deref(),
                        };
                        if !send_json(&mut sender, &msg).await? {
                            break;
                        }
                        false
                    }
                };
                if changed && !send_groups(&mut sender, &view).await? {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !send(&mut sender, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn send_groups(sender: &mut WsSender, view: &DashboardView) -> anyhow::Result<bool> {
    let msg = DashboardMessage::Groups {
        groups: view.groups(),
        machines: view.machines(),
        indices: view.indices(),
    };
    send_json(sender, &msg).await
}
