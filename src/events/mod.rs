//! In-process event fabric feeding the SSE monitoring surface
//!
//! State transitions publish typed events; subscribers get a bounded replay
//! of recent history followed by the live stream. Publishing never blocks
//! the producer: slow subscribers lag out of the broadcast channel and
//! their streams end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::Task;

/// Events kept for replay to late subscribers
pub const REPLAY_CAPACITY: usize = 1_000;

/// Heartbeat cadence towards live SSE subscribers
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Broadcast channel depth; a subscriber further behind than this is evicted
const CHANNEL_CAPACITY: usize = 1_024;

/// Closed vocabulary of event types on the monitoring stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Heartbeat,
    AgentStatusChanged,
    TaskQueued,
    TaskCompleted,
    TaskFailed,
    Error,
    AlertTriggered,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Heartbeat => "heartbeat",
            EventType::AgentStatusChanged => "agent:status_changed",
            EventType::TaskQueued => "task:queued",
            EventType::TaskCompleted => "task:completed",
            EventType::TaskFailed => "task:failed",
            EventType::Error => "error",
            EventType::AlertTriggered => "alert:triggered",
        }
    }
}

/// One event on the bus
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl BusEvent {
    fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// JSON body written on the SSE `data:` line; always carries the
    /// ISO-8601 timestamp alongside the payload fields
    pub fn sse_data(&self) -> serde_json::Value {
        let mut data = match &self.payload {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        data.insert(
            "timestamp".to_string(),
            serde_json::Value::String(self.timestamp.to_rfc3339()),
        );
        serde_json::Value::Object(data)
    }
}

/// Single publisher, many SSE subscribers, bounded replay
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    replay: Mutex<VecDeque<BusEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            replay: Mutex::new(VecDeque::with_capacity(REPLAY_CAPACITY)),
        }
    }

    /// Publish an event to the replay ring and all live subscribers
    ///
    /// Ring update and broadcast happen under one lock so a concurrent
    /// subscriber sees each event exactly once (replayed or live).
    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        let event = BusEvent::new(event_type, payload);
        debug!(event = event_type.as_str(), "publishing event");

        let Ok(mut replay) = self.replay.lock() else {
            return;
        };
        if event_type != EventType::Heartbeat {
            if replay.len() == REPLAY_CAPACITY {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }
        let _ = self.tx.send(event);
    }

    /// Snapshot of queued events plus a live receiver starting after them
    pub fn subscribe(&self) -> (Vec<BusEvent>, broadcast::Receiver<BusEvent>) {
        let Ok(replay) = self.replay.lock() else {
            return (Vec::new(), self.tx.subscribe());
        };
        let rx = self.tx.subscribe();
        let queued = replay.iter().cloned().collect();
        (queued, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    // ----- typed emitters -----

    pub fn agent_status_changed(&self, agent_id: &str, old: &str, new: &str) {
        self.publish(
            EventType::AgentStatusChanged,
            serde_json::json!({
                "agentId": agent_id,
                "oldStatus": old,
                "newStatus": new,
            }),
        );
    }

    pub fn task_queued(&self, task: &Task) {
        self.publish(
            EventType::TaskQueued,
            serde_json::json!({
                "taskId": task.id,
                "priority": task.priority,
                "requiredCapabilities": task.required_capabilities,
            }),
        );
    }

    pub fn task_completed(&self, task: &Task) {
        self.publish(
            EventType::TaskCompleted,
            serde_json::json!({
                "taskId": task.id,
                "agentId": task.assigned_agent_id,
                "durationMs": task
                    .started_at
                    .zip(task.completed_at)
                    .map(|(s, c)| (c - s).num_milliseconds()),
            }),
        );
    }

    pub fn task_failed(&self, task: &Task) {
        self.publish(
            EventType::TaskFailed,
            serde_json::json!({
                "taskId": task.id,
                "agentId": task.assigned_agent_id,
                "error": task.error_message,
                "retryCount": task.retry_count,
            }),
        );
    }

    pub fn error(&self, message: &str) {
        self.publish(EventType::Error, serde_json::json!({ "message": message }));
    }

    pub fn alert_triggered(&self, alert: &str, detail: &str) {
        self.publish(
            EventType::AlertTriggered,
            serde_json::json!({ "alert": alert, "detail": detail }),
        );
    }

    pub fn heartbeat(&self) {
        self.publish(EventType::Heartbeat, serde_json::json!({}));
    }

    /// Background task broadcasting a heartbeat every 30 s
    pub fn spawn_heartbeat(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bus = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // immediate first tick is not a heartbeat
            loop {
                ticker.tick().await;
                bus.heartbeat();
            }
        })
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

    #[test]
    fn test_replay_order_preserved() {
        let bus = EventBus::new();
        bus.error("one");
        bus.error("two");
        bus.error("three");

        let (queued, _rx) = bus.subscribe();
        assert_eq!(queued.len(), 3);
        let messages: Vec<&str> = queued
            .iter()
            .map(|e| e.payload["message"].as_str().unwrap())
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_replay_ring_drops_oldest() {
        let bus = EventBus::new();
        for i in 0..(REPLAY_CAPACITY + 1) {
            bus.publish(EventType::Error, serde_json::json!({ "seq": i }));
        }

        let (queued, _rx) = bus.subscribe();
        assert_eq!(queued.len(), REPLAY_CAPACITY);
        assert_eq!(queued.first().unwrap().payload["seq"], 1);
        assert_eq!(
            queued.last().unwrap().payload["seq"],
            REPLAY_CAPACITY
        );
    }

    #[test]
    fn test_heartbeat_not_replayed() {
        let bus = EventBus::new();
        bus.heartbeat();
        bus.error("real");
        bus.heartbeat();

        let (queued, _rx) = bus.subscribe();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event_type, EventType::Error);
    }

    #[tokio::test]
    async fn test_live_delivery_after_subscribe() {
        let bus = EventBus::new();
        bus.error("before");

        let (queued, mut rx) = bus.subscribe();
        assert_eq!(queued.len(), 1);

        bus.error("after");
        let live = rx.recv().await.unwrap();
        assert_eq!(live.payload["message"], "after");
    }

    #[test]
    fn test_sse_data_includes_timestamp() {
        let bus = EventBus::new();
        bus.agent_status_changed("agent-1", "idle", "busy");

        let (queued, _rx) = bus.subscribe();
        let data = queued[0].sse_data();
        assert!(data["timestamp"].is_string());
        assert_eq!(data["agentId"], "agent-1");
        assert_eq!(data["newStatus"], "busy");
        assert_eq!(queued[0].event_type.as_str(), "agent:status_changed");
    }
}
