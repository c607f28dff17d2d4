//! WebSocket push sessions.
//!
//! Each socket gets a `hello` (log replay plus the current snapshot summary),
//! then every bus event as a JSON text frame. The session also keeps its own
//! [`ChangeDetector`] and sends a `refresh` frame whenever the resolved
//! snapshot moves, so displays never have to diff state themselves.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::WebState;
use crate::bus::{BusEvent, Subscription};
use crate::change::{ChangeDetector, Refresh, SnapshotSummary, StateSnapshot};
use crate::engine::Kiosk;
use crate::event_buffer::LogEntry;

/// Log entries replayed to a newly connected socket.
const REPLAY_ENTRIES: usize = 100;

/// Floor for the per-session refresh ticker.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SessionFrame {
    Hello {
        session: Uuid,
        summary: Option<SnapshotSummary>,
        check_interval_ms: u64,
        replay: Vec<LogEntry>,
    },
    Refresh {
        #[serde(flatten)]
        refresh: Refresh,
        snapshot: StateSnapshot,
        cadence_ms: u64,
        dissolve: bool,
    },
    Resync {
        missed: u64,
    },
    Error {
        error: String,
        kind: &'static str,
    },
}

/// Frames a display may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Log {
        #[serde(default = "info_level")]
        level: String,
        message: String,
        #[serde(default)]
        source: Option<String>,
    },
    CurrentItem {
        id: String,
        #[serde(default)]
        source: Option<String>,
    },
    /// The display showed every item once and wants a new order.
    CycleComplete,
}

fn info_level() -> String {
    "info".to_string()
}

type Sink = SplitSink<WebSocket, Message>;

pub async fn ws_handler(State(state): State<WebState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state.kiosk))
}

async fn send_frame<T: Serialize>(sender: &mut Sink, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("failed to encode frame: {}", e);
            true
        }
    }
}

/// Re-resolve and tell the display if anything it shows has changed.
async fn push_refresh(kiosk: &Kiosk, detector: &mut ChangeDetector, sender: &mut Sink) -> bool {
    let resolution = kiosk.resolve_selection();
    let refresh = detector.observe_result(resolution.as_ref().map(|r| r.snapshot.clone()));
    let resolution = match resolution {
        Ok(resolution) if refresh.is_change() => resolution,
        Ok(_) => return true,
        Err(e) => {
            warn!(error = %e, position = refresh.position, "resolution failed, display keeps last snapshot");
            return true;
        }
    };
    debug!(kind = ?refresh.kind, position = refresh.position, "refreshing display");
    send_frame(
        sender,
        &SessionFrame::Refresh {
            refresh,
            snapshot: resolution.snapshot,
            cadence_ms: resolution.cadence_ms,
            dissolve: resolution.dissolve,
        },
    )
    .await
}

async fn handle_client_frame(
    kiosk: &Kiosk,
    detector: &mut ChangeDetector,
    sender: &mut Sink,
    session: Uuid,
    text: &str,
) -> bool {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            return send_frame(
                sender,
                &SessionFrame::Error {
                    error: format!("unrecognized frame: {}", e),
                    kind: "validation",
                },
            )
            .await;
        }
    };

    let result = match frame {
        ClientFrame::Log {
            level,
            message,
            source,
        } => {
            let source = source.or_else(|| Some(session.to_string()));
            kiosk.append_log(&level, &message, source).map(|_| ())
        }
        ClientFrame::CurrentItem { id, source } => {
            detector.jump_to(&id);
            kiosk.report_current_item(&id, source).map(|_| ())
        }
        ClientFrame::CycleComplete => kiosk.request_reshuffle().map(|_| ()),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            send_frame(
                sender,
                &SessionFrame::Error {
                    error: e.to_string(),
                    kind: e.code(),
                },
            )
            .await
        }
    }
}

async fn run_session(socket: WebSocket, kiosk: Arc<Kiosk>) {
    let session = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let Subscription { events, replay } = kiosk.bus().subscribe(REPLAY_ENTRIES);
    let mut events = BroadcastStream::new(events);
    let mut detector = ChangeDetector::new();

    info!(%session, subscribers = kiosk.bus().subscriber_count(), "display connected");

    let hello = SessionFrame::Hello {
        session,
        summary: kiosk.resolve_selection().ok().map(|r| r.snapshot.summary()),
        check_interval_ms: kiosk.check_interval().as_millis() as u64,
        replay,
    };
    if !send_frame(&mut sender, &hello).await
        || !push_refresh(&kiosk, &mut detector, &mut sender).await
    {
        return;
    }

    let mut interval = kiosk.check_interval().max(MIN_CHECK_INTERVAL);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        let keep_going = tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => {
                    let wants_refresh = matches!(
                        event,
                        BusEvent::StateChanged(_) | BusEvent::PeriodChanged { .. }
                    );
                    send_frame(&mut sender, &event).await
                        && (!wants_refresh || push_refresh(&kiosk, &mut detector, &mut sender).await)
                }
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    warn!(%session, missed, "display lagged behind the bus");
                    send_frame(&mut sender, &SessionFrame::Resync { missed }).await
                        && push_refresh(&kiosk, &mut detector, &mut sender).await
                }
                None => false,
            },
            _ = ticker.tick() => {
                let current = kiosk.check_interval().max(MIN_CHECK_INTERVAL);
                if current != interval {
                    interval = current;
                    ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
                }
                push_refresh(&kiosk, &mut detector, &mut sender).await
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&kiosk, &mut detector, &mut sender, session, text.as_str()).await
                }
                Some(Ok(Message::Close(_))) | None => false,
                Some(Ok(_)) => true,
                Some(Err(e)) => {
                    debug!(%session, "socket error: {}", e);
                    false
                }
            },
        };

        if !keep_going {
            break;
        }
    }

    info!(%session, "display disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::RefreshKind;
    use crate::shuffle::ShuffleSeed;

    #[test]
    fn refresh_frame_is_flat() {
        let frame = SessionFrame::Refresh {
            refresh: Refresh {
                kind: RefreshKind::Membership,
                position: 2,
                immediate: false,
            },
            snapshot: StateSnapshot {
                items: vec!["a".into()],
                cadence_secs: 10,
                crop_fingerprint: String::new(),
                shuffle_seed: ShuffleSeed(5),
                schedule_period: None,
            },
            cadence_ms: 10_000,
            dissolve: true,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "refresh");
        assert_eq!(json["kind"], "membership");
        assert_eq!(json["position"], 2);
        assert_eq!(json["snapshot"]["items"][0], "a");
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"log","message":"boot"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Log { ref level, .. } if level == "info"));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"cycle_complete"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::CycleComplete));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"dance"}"#).is_err());
    }
}
