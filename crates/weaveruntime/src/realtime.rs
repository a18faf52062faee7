//! Fan-out of execution progress to connected client sessions.
//!
//! Every subscriber owns a bounded queue. Publishing never waits: a full
//! queue drops the message for that subscriber only, and a closed queue
//! removes the subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;
use weavecore::{EventBus, ExecutionEvent, ExecutionId, NodeId, WorkflowId};

pub type SubscriberId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ExecutionStart,
    ExecutionComplete,
    ExecutionFailed,
    ExecutionCancelled,
    NodeStart,
    NodeComplete,
    NodeFailed,
    NodeUpdate,
}

/// One message on a subscriber stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub execution_id: ExecutionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeMessage {
    fn new(message_type: MessageType, execution_id: ExecutionId, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_type,
            execution_id,
            workflow_id: None,
            node_id: None,
            error: None,
            data: None,
            timestamp,
        }
    }
}

impl From<ExecutionEvent> for RealtimeMessage {
    fn from(event: ExecutionEvent) -> Self {
        match event {
            ExecutionEvent::ExecutionStarted {
                execution_id,
                workflow_id,
                timestamp,
            } => RealtimeMessage {
                workflow_id: Some(workflow_id),
                ..Self::new(MessageType::ExecutionStart, execution_id, timestamp)
            },
            ExecutionEvent::ExecutionCompleted {
                execution_id,
                workflow_id,
                duration_ms,
                timestamp,
            } => RealtimeMessage {
                workflow_id: Some(workflow_id),
                data: Some(serde_json::json!({ "durationMs": duration_ms })),
                ..Self::new(MessageType::ExecutionComplete, execution_id, timestamp)
            },
            ExecutionEvent::ExecutionFailed {
                execution_id,
                workflow_id,
                error,
                duration_ms,
                timestamp,
            } => RealtimeMessage {
                workflow_id: Some(workflow_id),
                error: Some(error),
                data: Some(serde_json::json!({ "durationMs": duration_ms })),
                ..Self::new(MessageType::ExecutionFailed, execution_id, timestamp)
            },
            ExecutionEvent::ExecutionCancelled {
                execution_id,
                workflow_id,
                timestamp,
            } => RealtimeMessage {
                workflow_id: Some(workflow_id),
                ..Self::new(MessageType::ExecutionCancelled, execution_id, timestamp)
            },
            ExecutionEvent::NodeStarted {
                execution_id,
                node_id,
                node_type,
                timestamp,
            } => RealtimeMessage {
                node_id: Some(node_id),
                data: Some(serde_json::json!({ "nodeType": node_type })),
                ..Self::new(MessageType::NodeStart, execution_id, timestamp)
            },
            ExecutionEvent::NodeCompleted {
                execution_id,
                node_id,
                port,
                duration_ms,
                timestamp,
            } => RealtimeMessage {
                node_id: Some(node_id),
                data: Some(serde_json::json!({ "port": port, "durationMs": duration_ms })),
                ..Self::new(MessageType::NodeComplete, execution_id, timestamp)
            },
            ExecutionEvent::NodeFailed {
                execution_id,
                node_id,
                error,
                timestamp,
            } => RealtimeMessage {
                node_id: Some(node_id),
                error: Some(error),
                ..Self::new(MessageType::NodeFailed, execution_id, timestamp)
            },
            ExecutionEvent::NodeEvent {
                execution_id,
                node_id,
                event,
                timestamp,
            } => RealtimeMessage {
                node_id: Some(node_id),
                data: serde_json::to_value(event).ok(),
                ..Self::new(MessageType::NodeUpdate, execution_id, timestamp)
            },
        }
    }
}

struct Subscriber {
    sender: mpsc::Sender<RealtimeMessage>,
    /// Only receive messages for this execution
    execution_filter: Option<ExecutionId>,
}

/// Publish/subscribe hub keyed by subscriber id
pub struct SessionHub {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    buffer_size: usize,
}

impl SessionHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a session. `execution_filter` narrows the stream to one execution.
    pub async fn subscribe(
        &self,
        execution_filter: Option<ExecutionId>,
    ) -> (SubscriberId, mpsc::Receiver<RealtimeMessage>) {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(
            id,
            Subscriber {
                sender,
                execution_filter,
            },
        );
        tracing::debug!("Session {} subscribed", id);
        (id, receiver)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!("Session {} unsubscribed", id);
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Deliver `message` to every matching subscriber. Returns how many accepted it.
    pub async fn publish(&self, message: RealtimeMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers.iter() {
                if sub
                    .execution_filter
                    .is_some_and(|wanted| wanted != message.execution_id)
                {
                    continue;
                }
                match sub.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Session {} is not keeping up, dropping message", id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in closed {
                subscribers.remove(&id);
                tracing::debug!("Session {} closed, removed", id);
            }
        }
        delivered
    }

    /// Forward every event on `bus` to subscribers until the bus closes.
    pub fn pump(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        self.publish(RealtimeMessage::from(event)).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Realtime pump lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(execution_id: ExecutionId) -> RealtimeMessage {
        RealtimeMessage::from(ExecutionEvent::ExecutionStarted {
            execution_id,
            workflow_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn failure_message_carries_error() {
        let message = RealtimeMessage::from(ExecutionEvent::ExecutionFailed {
            execution_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            error: "boom".into(),
            duration_ms: 5,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "execution_failed");
        assert_eq!(json["error"], "boom");
        assert!(json["executionId"].is_string());
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking_others() {
        let hub = SessionHub::new(1);
        let (_slow, mut slow_rx) = hub.subscribe(None).await;
        let (_fast, mut fast_rx) = hub.subscribe(None).await;

        let id = Uuid::new_v4();
        assert_eq!(hub.publish(started(id)).await, 2);
        // fast drains, slow does not
        fast_rx.recv().await.unwrap();
        assert_eq!(hub.publish(started(id)).await, 1);

        assert!(slow_rx.recv().await.is_some());
        assert!(slow_rx.try_recv().is_err());
        assert!(fast_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_subscribers_are_removed() {
        let hub = SessionHub::default();
        let (_id, rx) = hub.subscribe(None).await;
        drop(rx);
        assert_eq!(hub.publish(started(Uuid::new_v4())).await, 0);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn execution_filter_limits_stream() {
        let hub = SessionHub::default();
        let wanted = Uuid::new_v4();
        let (_id, mut rx) = hub.subscribe(Some(wanted)).await;

        hub.publish(started(Uuid::new_v4())).await;
        hub.publish(started(wanted)).await;

        assert_eq!(rx.recv().await.unwrap().execution_id, wanted);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pump_forwards_bus_events() {
        let hub = Arc::new(SessionHub::default());
        let bus = EventBus::new(16);
        let (_id, mut rx) = hub.subscribe(None).await;
        let _pump = hub.clone().pump(&bus);

        let execution_id = Uuid::new_v4();
        bus.emit(ExecutionEvent::ExecutionStarted {
            execution_id,
            workflow_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });

        let message = rx.recv().await.unwrap();
        assert_eq!(message.message_type, MessageType::ExecutionStart);
        assert_eq!(message.execution_id, execution_id);
    }
}
