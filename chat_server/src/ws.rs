use crate::{api::AppState, presence::ConnectionHandle, users};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Extension, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use sync_api::{ClientFrame, Event, User};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(me): Extension<User>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, me))
}

async fn handle_socket(stream: WebSocket, state: AppState, me: User) {
    let (mut sender, mut receiver) = stream.split();
    let (handle, rx) = ConnectionHandle::new(me.id);
    let conn_id = handle.id;
    // hello is queued first so it precedes the presence snapshot
    handle.send_event(&Event::Hello {
        user_id: me.id,
        connection_id: conn_id,
    });
    state.presence.register(handle);
    info!(user = %me.id, connection = %conn_id, "socket opened");

    let mut outgoing = UnboundedReceiverStream::new(rx);
    loop {
        tokio::select! {
            payload = outgoing.next() => match payload {
                Some(payload) => {
                    if sender.send(WsMessage::Text(payload)).await.is_err() {
                        break;
                    }
                }
                // dropped from presence, e.g. the account was removed
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => handle_frame(&state, me.id, &text).await,
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {},
            },
        }
    }
    let _ = sender.send(WsMessage::Close(None)).await;

    if let Some((user, went_offline)) = state.presence.unregister(&conn_id) {
        if went_offline {
            for receiver in state.typing.clear_sender(&user) {
                state.router.publish(
                    &Event::Typing {
                        sender: user,
                        receiver,
                        draft_len: 0,
                    },
                    &[receiver],
                );
            }
        }
    }
    info!(user = %me.id, connection = %conn_id, "socket closed");
}

async fn handle_frame(state: &AppState, me: Uuid, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(user = %me, error = %e, "ignoring malformed frame");
            return;
        }
    };
    match frame {
        ClientFrame::Ping => {}
        ClientFrame::Typing {
            receiver,
            draft_len,
        } => {
            let linked = state
                .with_conn(move |conn| users::are_contacts(conn, &me, &receiver))
                .await;
            match linked {
                Ok(true) => {}
                Ok(false) => {
                    debug!(user = %me, %receiver, "typing to non-contact dropped");
                    return;
                }
                Err(e) => {
                    warn!(user = %me, error = %e, "typing lookup failed");
                    return;
                }
            }
            if state.typing.typing(me, receiver, draft_len > 0) {
                state.router.publish(
                    &Event::Typing {
                        sender: me,
                        receiver,
                        draft_len,
                    },
                    &[receiver],
                );
            }
        }
    }
}
