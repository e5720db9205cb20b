//! Typed pub/sub event bus.
//!
//! Subscribers each get their own bounded queue so a slow subscriber
//! cannot block delivery to the others. Log events are dropped oldest-first
//! on overflow; lifecycle events are never dropped, only warned about.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::warn;

/// Per-subscriber queue capacity before the drop/backpressure policy kicks in.
const QUEUE_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerEventKind {
    Starting,
    Started,
    Stopped,
    Error,
    Log,
}

/// A lifecycle or log event for a single `(serverId, workspaceId)` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    pub kind: ServerEventKind,
    pub server_id: String,
    pub workspace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl ServerEvent {
    fn is_log(&self) -> bool {
        matches!(self.kind, ServerEventKind::Log)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppEventKind {
    WorkspaceCreated,
    WorkspaceUpdated,
    WorkspaceDeleted,
    SessionConnected,
    SessionDisconnected,
    ProfileUpdated,
}

/// An application-level event (workspace/session lifecycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEvent {
    pub kind: AppEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One bus event, tagged by which channel it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum BusEvent {
    Server(ServerEvent),
    App(AppEvent),
}

struct SubscriberQueue {
    items: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY.min(64))),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: BusEvent, subscriber_id: u64) {
        let mut items = self.items.lock();
        if items.len() >= QUEUE_CAPACITY {
            let is_log = matches!(&event, BusEvent::Server(e) if e.is_log());
            if is_log {
                // Drop the oldest log-kind entry to make room; never evict
                // a lifecycle event to do so.
                if let Some(pos) = items
                    .iter()
                    .position(|e| matches!(e, BusEvent::Server(s) if s.is_log()))
                {
                    items.remove(pos);
                } else {
                    items.pop_front();
                }
            } else {
                warn!(
                    subscriber = subscriber_id,
                    "event bus subscriber queue is full; delivering lifecycle event anyway"
                );
            }
        }
        items.push_back(event);
        drop(items);
        self.notify.notify_waiters();
    }

    async fn recv(&self) -> BusEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.items.lock().pop_front() {
                return event;
            }
            notified.await;
            if let Some(event) = self.items.lock().pop_front() {
                return event;
            }
        }
    }
}

/// A live subscription to the bus. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    bus: EventBus,
}

impl Subscription {
    /// Wait for the next event delivered to this subscriber.
    pub async fn recv(&self) -> BusEvent {
        self.queue.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

struct Subscriber {
    id: u64,
    queue: Arc<SubscriberQueue>,
}

struct Inner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// In-process pub/sub bus for server lifecycle/log events and app events.
///
/// Cheap to clone: all clones share the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to every event published on the bus.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new());
        self.inner.subscribers.lock().push(Subscriber {
            id,
            queue: queue.clone(),
        });
        Subscription {
            id,
            queue,
            bus: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.subscribers.lock().retain(|s| s.id != id);
    }

    fn dispatch(&self, event: BusEvent) {
        let subscribers = self.inner.subscribers.lock();
        for sub in subscribers.iter() {
            sub.queue.push(event.clone(), sub.id);
        }
    }

    /// Publish a server lifecycle/log event. The timestamp is stamped here.
    pub fn emit_server(&self, mut event: ServerEvent) {
        event.timestamp = Utc::now();
        self.dispatch(BusEvent::Server(event));
    }

    /// Publish an application event. The timestamp is stamped here.
    pub fn emit_app(&self, mut event: AppEvent) {
        event.timestamp = Utc::now();
        self.dispatch(BusEvent::App(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
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

    fn log_event(server_id: &str) -> ServerEvent {
        ServerEvent {
            kind: ServerEventKind::Log,
            server_id: server_id.to_string(),
            workspace_id: "global".to_string(),
            timestamp: Utc::now(),
            port: None,
            error: None,
            message: Some("line".to_string()),
            level: Some(LogLevel::Info),
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let bus = EventBus::new();
        let sub = bus.subscribe();

        bus.emit_server(ServerEvent {
            kind: ServerEventKind::Starting,
            server_id: "s1".into(),
            workspace_id: "global".into(),
            timestamp: Utc::now(),
            port: None,
            error: None,
            message: None,
            level: None,
        });
        bus.emit_server(ServerEvent {
            kind: ServerEventKind::Started,
            server_id: "s1".into(),
            workspace_id: "global".into(),
            timestamp: Utc::now(),
            port: Some(4100),
            error: None,
            message: None,
            level: None,
        });

        let first = sub.recv().await;
        let second = sub.recv().await;
        match (first, second) {
            (BusEvent::Server(a), BusEvent::Server(b)) => {
                assert_eq!(a.kind, ServerEventKind::Starting);
                assert_eq!(b.kind, ServerEventKind::Started);
            }
            _ => panic!("expected server events"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_log_not_lifecycle() {
        let bus = EventBus::new();
        let sub = bus.subscribe();

        // Fill the queue with more logs than capacity.
        for _ in 0..(QUEUE_CAPACITY + 10) {
            bus.emit_server(log_event("s1"));
        }
        // A lifecycle event must still be delivered, not dropped.
        bus.emit_server(ServerEvent {
            kind: ServerEventKind::Stopped,
            server_id: "s1".into(),
            workspace_id: "global".into(),
            timestamp: Utc::now(),
            port: None,
            error: None,
            message: None,
            level: None,
        });

        let mut saw_stopped = false;
        // Drain everything; queue length is bounded near capacity + 1.
        while let Ok(event) = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            sub.recv(),
        )
        .await
        {
            if let BusEvent::Server(e) = event {
                if e.kind == ServerEventKind::Stopped {
                    saw_stopped = true;
                }
            }
        }
        assert!(saw_stopped, "lifecycle event must never be dropped");
    }

    #[tokio::test]
    async fn unsubscribe_on_drop() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
