//! WebSocket upgrade handler and session loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{RoomCommand, SessionSender, SESSION_CHANNEL_CAPACITY};
use crate::util::rate_limit::SessionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// A session's binding to its room after a successful create/join
struct Attachment {
    room_id: String,
    player_id: Uuid,
    cmd_tx: mpsc::Sender<RoomCommand>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outbound channel: the room broadcasts here, the writer task forwards
    // to the socket. Broadcasting never blocks on a slow client.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMsg>(SESSION_CHANNEL_CAPACITY);

    let writer_session = session_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %writer_session, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = SessionRateLimiter::new();
    let mut attachment: Option<Attachment> = None;

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                        send_error(&out_tx, "invalid message");
                        continue;
                    }
                };

                match client_msg {
                    ClientMsg::Create { name, is_public } => {
                        if attachment.is_some() {
                            send_error(&out_tx, "already in a room");
                            continue;
                        }
                        match state
                            .registry
                            .create_room(name, is_public, out_tx.clone())
                            .await
                        {
                            Ok((handle, player_id)) => {
                                info!(
                                    session_id = %session_id,
                                    room_id = %handle.id,
                                    player_id = %player_id,
                                    "Session created room"
                                );
                                attachment = Some(Attachment {
                                    room_id: handle.id.clone(),
                                    player_id,
                                    cmd_tx: handle.cmd_tx.clone(),
                                });
                            }
                            Err(e) => send_error(&out_tx, &e.to_string()),
                        }
                    }

                    ClientMsg::Join { name, room_id } => {
                        if attachment.is_some() {
                            send_error(&out_tx, "already in a room");
                            continue;
                        }
                        match state.registry.join_room(&room_id, name, out_tx.clone()).await {
                            Ok((handle, player_id)) => {
                                info!(
                                    session_id = %session_id,
                                    room_id = %handle.id,
                                    player_id = %player_id,
                                    "Session joined room"
                                );
                                attachment = Some(Attachment {
                                    room_id: handle.id.clone(),
                                    player_id,
                                    cmd_tx: handle.cmd_tx.clone(),
                                });
                            }
                            Err(e) => send_error(&out_tx, &e.to_string()),
                        }
                    }

                    ClientMsg::Input { dx, dy } => {
                        if !rate_limiter.check_input() {
                            continue;
                        }
                        if !dx.is_finite() || !dy.is_finite() {
                            send_error(&out_tx, "invalid input vector");
                            continue;
                        }
                        forward(
                            &mut attachment,
                            &out_tx,
                            |player_id| RoomCommand::Input { player_id, dx, dy },
                        )
                        .await;
                    }

                    ClientMsg::Start => {
                        forward(&mut attachment, &out_tx, |player_id| RoomCommand::Start {
                            player_id,
                        })
                        .await;
                    }

                    ClientMsg::Rematch => {
                        forward(&mut attachment, &out_tx, |player_id| {
                            RoomCommand::Rematch { player_id }
                        })
                        .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Disconnect funnels through the room's command channel like any other
    // membership mutation
    if let Some(att) = attachment.take() {
        state.registry.remove_session(&att.room_id, att.player_id).await;
    }

    writer_handle.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Forward a room-scoped command, detaching if the room is gone
async fn forward(
    attachment: &mut Option<Attachment>,
    out_tx: &SessionSender,
    make_cmd: impl FnOnce(Uuid) -> RoomCommand,
) {
    match attachment {
        Some(att) => {
            if att.cmd_tx.send(make_cmd(att.player_id)).await.is_err() {
                send_error(out_tx, "room closed");
                *attachment = None;
            }
        }
        None => send_error(out_tx, "not in a room"),
    }
}

fn send_error(out_tx: &SessionSender, message: &str) {
    let _ = out_tx.try_send(ServerMsg::Error {
        message: message.to_string(),
    });
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
