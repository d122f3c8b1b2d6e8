//! Upload lifecycle notifications for the rest of the UI

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::types::{FieldId, FormId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadEventKind {
    /// A transfer attempt for the field has started
    Start,
    /// The user cancelled the field's transfer
    Cancel,
    /// Retries were exhausted and the field was given up on
    Abandoned,
}

impl UploadEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadEventKind::Start => "upload-start",
            UploadEventKind::Cancel => "upload-cancel",
            UploadEventKind::Abandoned => "upload-abandoned",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadEvent {
    pub form_id: FormId,
    pub field_id: FieldId,
    pub kind: UploadEventKind,
    pub timestamp: DateTime<Utc>,
}

impl UploadEvent {
    pub fn new(form_id: FormId, field_id: FieldId, kind: UploadEventKind) -> Self {
        Self {
            form_id,
            field_id,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Receives upload lifecycle events
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: UploadEvent);
}

/// Dispatcher that only traces events
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

impl EventDispatcher for LogDispatcher {
    fn dispatch(&self, event: UploadEvent) {
        tracing::info!(
            form_id = %event.form_id,
            field_id = %event.field_id,
            event = event.kind.as_str(),
            "Upload event"
        );
    }
}

/// Dispatcher forwarding events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: UploadEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped, discarding upload event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_dispatcher_forwards() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();

        dispatcher.dispatch(UploadEvent::new(
            FormId::new("orders"),
            FieldId::new("attachment"),
            UploadEventKind::Cancel,
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, UploadEventKind::Cancel);
        assert_eq!(event.field_id.as_str(), "attachment");
    }

    #[test]
    fn test_event_serializes_kind_in_snake_case() {
        let event = UploadEvent::new(
            FormId::new("orders"),
            FieldId::new("attachment"),
            UploadEventKind::Start,
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "start");
        assert_eq!(json["form_id"], "orders");
    }
}
