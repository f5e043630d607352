use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State as AxumState,
    },
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::IntoResponse,
};
use fairbet_types::{api::ActivityEvent, Game};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};

use crate::{AppState, WsConnectionGuard, WsConnectionRejection};

fn ws_send_timeout() -> Duration {
    let parsed = std::env::var("WS_SEND_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0);
    Duration::from_millis(parsed.unwrap_or(2_000))
}

/// Optional narrowing of the activity stream.
#[derive(Clone, Debug, Default, Deserialize)]
pub(super) struct ActivityFilter {
    user: Option<String>,
    game: Option<Game>,
}

impl ActivityFilter {
    fn matches(&self, event: &ActivityEvent) -> bool {
        self.user.as_deref().map_or(true, |user| user == event.user)
            && self.game.map_or(true, |game| game == event.game)
    }
}

enum OutboundSendError {
    Closed,
    Full,
}

/// Checks the Origin header against `ALLOWED_WS_ORIGINS`.
///
/// Unset means any origin. Requests without an Origin header are allowed
/// unless `ALLOW_WS_NO_ORIGIN` is `0` or `false`.
fn validate_origin(headers: &HeaderMap) -> bool {
    let allowed = std::env::var("ALLOWED_WS_ORIGINS").ok();
    let deny_no_origin = matches!(
        std::env::var("ALLOW_WS_NO_ORIGIN").as_deref(),
        Ok("0") | Ok("false") | Ok("FALSE") | Ok("no") | Ok("NO")
    );
    origin_allowed(headers, allowed.as_deref(), deny_no_origin)
}

fn origin_allowed(headers: &HeaderMap, allowed: Option<&str>, deny_no_origin: bool) -> bool {
    let origin = match headers.get(ORIGIN) {
        Some(value) => match value.to_str() {
            Ok(origin) => origin,
            Err(_) => {
                tracing::warn!("invalid Origin header encoding");
                return false;
            }
        },
        None => {
            if deny_no_origin {
                tracing::warn!("activity socket rejected: no Origin header");
            }
            return !deny_no_origin;
        }
    };

    let Some(allowed) = allowed else {
        return true;
    };
    let allowed_list: Vec<&str> = allowed
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();
    if allowed_list.is_empty() || allowed_list.contains(&"*") || allowed_list.contains(&origin) {
        return true;
    }
    tracing::warn!(origin, allowed, "activity socket origin rejected");
    false
}

pub(super) async fn activity_ws(
    AxumState(state): AxumState<Arc<AppState>>,
    Query(filter): Query<ActivityFilter>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !validate_origin(&headers) {
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let guard = match state.try_acquire_ws_connection(addr.ip()) {
        Ok(guard) => guard,
        Err(reason) => {
            let message = match reason {
                WsConnectionRejection::GlobalLimit => "WebSocket connection limit reached",
                WsConnectionRejection::PerIpLimit => "WebSocket per-IP limit reached",
            };
            return (StatusCode::TOO_MANY_REQUESTS, message).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_activity_ws(socket, state, filter, guard))
        .into_response()
}

async fn handle_activity_ws(
    socket: WebSocket,
    state: Arc<AppState>,
    filter: ActivityFilter,
    _guard: WsConnectionGuard,
) {
    tracing::info!(user = ?filter.user, game = ?filter.game, "activity socket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.engine().feed().subscribe();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(state.config.ws_outbound_buffer);

    let writer_state = Arc::clone(&state);
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match timeout(ws_send_timeout(), sender.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    writer_state.ws_metrics().inc_send_error();
                    tracing::warn!("activity send failed, client disconnected");
                    break;
                }
                Err(_) => {
                    writer_state.ws_metrics().inc_send_timeout();
                    tracing::warn!("activity send timed out, closing connection");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if enqueue_message(&out_tx, Message::Pong(data), &state).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "activity socket error");
                        break;
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !filter.matches(&event) {
                            continue;
                        }
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::warn!(error = %err, "activity event encode failed");
                                continue;
                            }
                        };
                        if enqueue_message(&out_tx, Message::Text(text), &state).is_err() {
                            tracing::warn!("failed to enqueue activity event, closing connection");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "activity subscriber lagged");
                        state.ws_metrics().add_lagged(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::info!("activity socket closed");
    drop(out_tx);
    let _ = writer_handle.await;
}

fn enqueue_message(
    out_tx: &mpsc::Sender<Message>,
    message: Message,
    state: &AppState,
) -> Result<(), OutboundSendError> {
    match out_tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            state.ws_metrics().inc_queue_full();
            Err(OutboundSendError::Full)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(OutboundSendError::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use fairbet_types::{Cents, Currency, Multiplier};
    use uuid::Uuid;

    fn event(user: &str, game: Game) -> ActivityEvent {
        ActivityEvent {
            wager_id: Uuid::new_v4(),
            user: user.to_string(),
            game,
            currency: Currency::Gc,
            amount: Cents(100),
            multiplier: Multiplier(200),
            payout: Cents(200),
            win: true,
            created_at_ms: 0,
        }
    }

    #[test]
    fn filter_narrows_by_user_and_game() {
        let any = ActivityFilter::default();
        assert!(any.matches(&event("alice", Game::Dice)));

        let filter = ActivityFilter {
            user: Some("alice".to_string()),
            game: Some(Game::Plinko),
        };
        assert!(filter.matches(&event("alice", Game::Plinko)));
        assert!(!filter.matches(&event("alice", Game::Dice)));
        assert!(!filter.matches(&event("bob", Game::Plinko)));
    }

    #[test]
    fn origin_rules() {
        let empty = HeaderMap::new();
        assert!(origin_allowed(&empty, None, false));
        assert!(!origin_allowed(&empty, None, true));

        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static("https://play.example"));
        assert!(origin_allowed(&headers, None, false));
        assert!(origin_allowed(&headers, Some("https://play.example, https://other"), true));
        assert!(origin_allowed(&headers, Some("*"), true));
        assert!(!origin_allowed(&headers, Some("https://other"), false));
    }
}
