//! WebSocket transport for live dashboard sync
//!
//! Bridges one socket to one publisher session: outgoing pushes are
//! serialized as JSON text frames, incoming text frames are parsed as
//! client commands. The session is disconnected when either side stops.

use crate::live_sync::LiveSyncPublisher;
use snapshot_shared::{ClientMessage, ServerMessage};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Drive a live sync session until the socket closes
pub async fn serve_session(socket: WebSocket, publisher: LiveSyncPublisher, ping_interval_seconds: u64) {
    let (subscriber_id, mut outbound) = publisher.connect();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Handle outgoing messages
    let mut outgoing_task = {
        let subscriber_id = subscriber_id.clone();

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(Duration::from_secs(ping_interval_seconds.max(1)));
            ping.tick().await;

            loop {
                let frame = tokio::select! {
                    message = outbound.recv() => match message {
                        Some(message) => match serde_json::to_string(&message) {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                warn!("Failed to serialize push for {}: {}", subscriber_id, e);
                                continue;
                            }
                        },
                        None => break,
                    },
                    _ = ping.tick() => Message::Ping(Vec::new()),
                };

                if let Err(e) = ws_sender.send(frame).await {
                    debug!("Failed to send to live subscriber {}: {}", subscriber_id, e);
                    break;
                }
            }
        })
    };

    // Handle incoming messages
    let mut incoming_task = {
        let subscriber_id = subscriber_id.clone();
        let publisher = publisher.clone();

        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => handle_client_message(&publisher, &subscriber_id, &text),
                    Ok(Message::Close(_)) => {
                        info!("Live sync connection closed by client: {}", subscriber_id);
                        break;
                    }
                    // Pings are answered by the transport
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error for subscriber {}: {}", subscriber_id, e);
                        break;
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = &mut outgoing_task => incoming_task.abort(),
        _ = &mut incoming_task => outgoing_task.abort(),
    }

    publisher.disconnect(&subscriber_id);
}

/// Apply one client command to the session
pub fn handle_client_message(publisher: &LiveSyncPublisher, subscriber_id: &str, text: &str) {
    let outcome = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { subscription_id }) => {
            publisher.subscribe(subscriber_id, &subscription_id)
        }
        Ok(ClientMessage::Unsubscribe) => publisher.unsubscribe(subscriber_id),
        Ok(ClientMessage::Ping) => {
            publisher.send_to(subscriber_id, ServerMessage::Pong);
            Ok(())
        }
        Err(e) => {
            warn!("Unparsable message from {}: {}", subscriber_id, e);
            publisher.send_to(
                subscriber_id,
                ServerMessage::Error {
                    message: format!("Invalid message: {}", e),
                },
            );
            Ok(())
        }
    };

    if let Err(e) = outcome {
        publisher.send_to(
            subscriber_id,
            ServerMessage::Error {
                message: e.to_string(),
            },
        );
    }
}
