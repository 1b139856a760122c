//! Server-sent-events bus.
//!
//! Every lifecycle transition, game result, and donation is broadcast to
//! all connected dashboard clients. A rolling buffer replays the last
//! fifteen minutes to newly-connected clients before the live stream.
//! Event order on the bus equals the order of broadcast calls.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EVENT_REPLAY_SECS;

/// Event types on the bus.
pub mod event_types {
    pub const CONNECTED: &str = "connected";
    pub const GAME_RESULT: &str = "game_result";
    pub const AGENT_JOINED: &str = "agent_joined";
    pub const AGENT_EVICTED: &str = "agent_evicted";
    pub const TRASH_TALK: &str = "trash_talk";
    pub const AGENT_DESPERATE: &str = "agent_desperate";
    pub const DONATION: &str = "donation";
}

/// Envelope every frame carries.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    /// ms since epoch
    pub timestamp: i64,
}

impl Event {
    /// `data: <json>\n\n` wire frame
    pub fn to_frame(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
        )
    }
}

/// Fans events out to all connected SSE clients, no per-client flow
/// control. Clients whose channel is full or closed are dropped.
pub struct EventBus {
    clients: DashMap<String, mpsc::Sender<Event>>,
    backlog: Mutex<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Subscribe a new client: (client_id, live receiver, replay backlog).
    pub fn subscribe(&self) -> (String, mpsc::Receiver<Event>, Vec<Event>) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(100);
        self.clients.insert(client_id.clone(), tx);

        let backlog = {
            let backlog = self.backlog.lock().expect("backlog lock poisoned");
            backlog.iter().cloned().collect()
        };

        log::debug!("[SSE] Client {} subscribed", client_id);
        (client_id, rx, backlog)
    }

    pub fn unsubscribe(&self, client_id: &str) {
        self.clients.remove(client_id);
        log::debug!("[SSE] Client {} unsubscribed", client_id);
    }

    /// Broadcast an event to all connected clients and append it to the
    /// replay buffer.
    pub fn broadcast(&self, kind: &str, data: serde_json::Value) {
        let event = Event {
            kind: kind.to_string(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        {
            let mut backlog = self.backlog.lock().expect("backlog lock poisoned");
            backlog.push_back(event.clone());
            let horizon = event.timestamp - EVENT_REPLAY_SECS * 1000;
            while backlog.front().map(|e| e.timestamp < horizon).unwrap_or(false) {
                backlog.pop_front();
            }
        }

        let mut failed_clients = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().try_send(event.clone()).is_err() {
                failed_clients.push(entry.key().clone());
            }
        }
        for client_id in failed_clients {
            self.clients.remove(&client_id);
            log::debug!("[SSE] Removed disconnected client {}", client_id);
        }

        log::debug!(
            "[SSE] Broadcast '{}' to {} clients",
            kind,
            self.clients.len()
        );
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().expect("backlog lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_arrive_in_broadcast_order() {
        let bus = EventBus::new();
        let (_id, mut rx, backlog) = bus.subscribe();
        assert!(backlog.is_empty());

        bus.broadcast(event_types::AGENT_JOINED, json!({"agentName": "alice"}));
        bus.broadcast(event_types::GAME_RESULT, json!({"gameId": "g1"}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, "agent_joined");
        assert_eq!(second.kind, "game_result");
    }

    #[tokio::test]
    async fn backlog_replays_to_new_clients() {
        let bus = EventBus::new();
        bus.broadcast(event_types::DONATION, json!({"amount": 0.25}));

        let (_id, _rx, backlog) = bus.subscribe();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].kind, "donation");
    }

    #[tokio::test]
    async fn dropped_clients_are_pruned_on_broadcast() {
        let bus = EventBus::new();
        let (_id, rx, _) = bus.subscribe();
        assert_eq!(bus.client_count(), 1);

        drop(rx);
        bus.broadcast(event_types::TRASH_TALK, json!({}));
        assert_eq!(bus.client_count(), 0);
    }

    #[test]
    fn frame_format() {
        let event = Event {
            kind: "connected".to_string(),
            data: json!({}),
            timestamp: 0,
        };
        let frame = event.to_frame();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }
}
