use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use super::api::SharedState;
use crate::pipeline::CANCELLED_MESSAGE;
use crate::pipeline::status::StatusEvent;
use crate::workspace::WorkspaceStage;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Follow a single request; the socket closes after its `cleaned_up`
    /// or cancellation event.
    pub request_id: Option<String>,
}

/// What to do with one broadcast event for one subscriber.
#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Skip,
    Forward,
    ForwardAndClose,
}

#[derive(Debug, Default)]
struct EventFilter {
    request_id: Option<String>,
}

impl EventFilter {
    fn route(&self, json: &str) -> Delivery {
        let Some(wanted) = &self.request_id else {
            return Delivery::Forward;
        };
        let Ok(event) = serde_json::from_str::<StatusEvent>(json) else {
            return Delivery::Skip;
        };
        if event.request_id.as_ref().map(|id| id.as_str()) != Some(wanted.as_str()) {
            return Delivery::Skip;
        }
        let finished = event.stage == WorkspaceStage::CleanedUp.as_str()
            || (event.stage == WorkspaceStage::Failed.as_str()
                && event.message == CANCELLED_MESSAGE);
        if finished {
            Delivery::ForwardAndClose
        } else {
            Delivery::Forward
        }
    }
}

/// Upgrade to a WebSocket that streams pipeline status events as JSON text.
/// `?request_id=<id>` narrows the stream to one request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StatusQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let rx = state.orchestrator.events().subscribe();
    let filter = EventFilter {
        request_id: query.request_id.filter(|id| !id.trim().is_empty()),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, rx, filter))
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<String>, filter: EventFilter) {
    let (sender, receiver) = socket.split();
    debug!(request_id = ?filter.request_id, "status subscriber connected");
    run_socket_loop(sender, receiver, rx, filter).await;
    debug!("status subscriber disconnected");
}

/// Forward matching events to the client while keeping the connection
/// alive with ping/pong. Exits when the client goes away, the channel
/// closes, the followed request finishes, or no Pong arrives within
/// [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    filter: EventFilter,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("status subscriber missed pong");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status subscriber lagged");
                        continue;
                    }
                };
                let delivery = filter.route(&event);
                if delivery == Delivery::Skip {
                    continue;
                }
                if sender.send(Message::Text(event.into())).await.is_err() {
                    break;
                }
                if delivery == Delivery::ForwardAndClose {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
