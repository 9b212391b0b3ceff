use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, trace, warn};

use crate::actions::Gateway;
use crate::presence::ConnHandle;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve a WebSocket whose token was already validated at the HTTP upgrade.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: String) {
    let (handle, mut outbound) = ConnHandle::channel();
    let socket_id = match gateway.presence.register(&user_id, handle.clone()).await {
        Ok(socket_id) => socket_id,
        Err(e) => {
            warn!("Could not register presence for {}: {}", user_id, e);
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    info!("{} connected on socket {}", user_id, socket_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbound pushes -> client, plus heartbeat and server-initiated close
    let close_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                msg = outbound.recv() => {
                    let Some(text) = msg else { break };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = close_handle.closed() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client frames -> actions
    let recv_gateway = gateway.clone();
    let recv_user = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match recv_gateway.handle_frame(&recv_user, &handle, text.as_str()).await {
                        Ok(Some(report)) => trace!(
                            "{} frame delivered: pushed {}, published {}, failed {}",
                            recv_user, report.pushed, report.published, report.failed
                        ),
                        Ok(None) => {}
                        Err(e) => warn!(
                            "{} frame dropped: {} -- raw: {}",
                            recv_user,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        ),
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    if let Err(e) = recv_gateway.presence.refresh(&recv_user).await {
                        warn!("Presence refresh for {} failed: {}", recv_user, e);
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.presence.remove_if_current(&user_id, &socket_id).await;
    info!("{} disconnected from socket {}", user_id, socket_id);
}
