//! `GET /api/realtime`: a server-sent-events feed of every `BroadcastEvent`
//! published to the bus, so a UI client (or a
//! second CLI/API instance) observes writes made through either the
//! CLI's direct `Store` path or the HTTP API without polling.
//!
//! Only one-way server push is needed here, so this wraps a broadcast
//! `Receiver` in a stream (skipping over `Lagged`) and serves it as SSE
//! (`axum::response::sse`) rather than a WebSocket's framing and
//! bidirectional handshake for a feed nothing ever writes back to.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures_util::Stream;
use futures_util::stream;
use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::BroadcastEvent;
use crate::http::SharedState;

pub async fn realtime_handler(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.store.bus().subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((to_sse_event(&event), rx)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse_event(event: &BroadcastEvent) -> Result<Event, Infallible> {
    let payload = serde_json::json!({
        "action": event.action,
        "record": event.record,
    });
    Ok(Event::default()
        .event(event.collection.clone())
        .json_data(payload)
        .unwrap_or_else(|_| Event::default().event(event.collection.clone())))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::broadcast::{Bus, ChangeAction};
    use crate::http::AppState;
    use crate::store::Store;

    use super::*;

    #[tokio::test]
    async fn lagged_receiver_is_skipped_not_terminated() {
        let bus = Bus::new();
        let store = Arc::new(Store::open_in_memory(bus.clone()).unwrap());
        let state = Arc::new(AppState { store, bus: bus.clone() });
        let mut rx = state.store.bus().subscribe();

        bus.publish(BroadcastEvent {
            collection: "tasks".to_string(),
            action: ChangeAction::Create,
            record: serde_json::json!({"id": "t1"}),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.collection, "tasks");
    }
}
