//! Built-in change reaction: status notifications.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use aic_core::{RecordStatus, RequestId, StoreKey};
use aic_events::{ChangeEvent, Partitioned};

use super::watcher::{ChangeHandler, HandlerError};

/// A record reached a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub key: StoreKey,
    pub status: RecordStatus,
    pub sequence_number: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Where notifications go.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), HandlerError>;
}

impl<N> NotificationSink for Arc<N>
where
    N: NotificationSink + ?Sized,
{
    fn notify(&self, notification: &Notification) -> Result<(), HandlerError> {
        (**self).notify(notification)
    }
}

/// Logs each notification at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: &Notification) -> Result<(), HandlerError> {
        info!(
            request_id = n.request_id.as_ref().map(|id| id.as_str()).unwrap_or(""),
            key = %n.key,
            status = %n.status,
            sequence_number = n.sequence_number,
            "exercise status changed"
        );
        Ok(())
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, n: &Notification) -> Result<(), HandlerError> {
        self.sent
            .lock()
            .map_err(|_| HandlerError::new("sink poisoned"))?
            .push(n.clone());
        Ok(())
    }
}

/// Emits a notification for each event that moves a record into `complete`
/// or `failed`.
///
/// Holds no state of its own. The watcher's checkpointed cursor skips events
/// already applied, so each `(PK, sequenceNumber)` reaches the sink once per
/// successful checkpoint.
pub struct StatusNotifier<N> {
    sink: N,
}

impl<N: NotificationSink> StatusNotifier<N> {
    pub fn new(sink: N) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    fn notification_for(event: &ChangeEvent) -> Option<Notification> {
        if !event.status_changed() {
            return None;
        }
        let record = event.new_image.as_ref()?;
        if !record.status.is_terminal() {
            return None;
        }
        Some(Notification {
            request_id: event.key.request_id(),
            key: event.key.clone(),
            status: record.status,
            sequence_number: event.sequence_number,
            recorded_at: event.recorded_at,
        })
    }
}

impl<N: NotificationSink> ChangeHandler for StatusNotifier<N> {
    fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        debug!(
            partition = %event.partition_key(),
            seq = event.sequence_number,
            kind = event.kind.as_str(),
            "change event"
        );

        if let Some(n) = Self::notification_for(event) {
            self.sink.notify(&n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aic_core::ExerciseRecord;
    use aic_events::ChangeKind;

    use super::*;

    fn event(seq: u64, old: Option<RecordStatus>, new: Option<RecordStatus>) -> ChangeEvent {
        let key = StoreKey::for_request(&RequestId::parse("r1").unwrap());
        let image = |status| ExerciseRecord {
            key: key.clone(),
            content: serde_json::json!({}),
            status,
            updated_at: Utc::now(),
        };
        ChangeEvent {
            kind: if old.is_some() {
                ChangeKind::Modify
            } else {
                ChangeKind::Insert
            },
            key: key.clone(),
            old_image: old.map(image),
            new_image: new.map(image),
            sequence_number: seq,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn notifies_once_per_terminal_transition() {
        let notifier = StatusNotifier::new(MemorySink::new());

        notifier.handle(&event(1, None, Some(RecordStatus::Pending))).unwrap();
        notifier
            .handle(&event(2, Some(RecordStatus::Pending), Some(RecordStatus::Complete)))
            .unwrap();
        // Content-only change keeps the status.
        notifier
            .handle(&event(3, Some(RecordStatus::Complete), Some(RecordStatus::Complete)))
            .unwrap();

        let sent = notifier.sink().notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, RecordStatus::Complete);
        assert_eq!(sent[0].sequence_number, 2);
        assert_eq!(sent[0].request_id.as_ref().map(|id| id.as_str()), Some("r1"));
    }

    #[test]
    fn failed_status_is_notified() {
        let notifier = StatusNotifier::new(MemorySink::new());
        notifier.handle(&event(1, None, Some(RecordStatus::Failed))).unwrap();
        assert_eq!(notifier.sink().notifications()[0].status, RecordStatus::Failed);
    }

    struct Refusing;

    impl NotificationSink for Refusing {
        fn notify(&self, _n: &Notification) -> Result<(), HandlerError> {
            Err(HandlerError::new("downstream unavailable"))
        }
    }

    #[test]
    fn sink_failure_leaves_event_unhandled() {
        let notifier = StatusNotifier::new(Refusing);
        let ev = event(1, None, Some(RecordStatus::Complete));
        assert!(notifier.handle(&ev).is_err());
        assert!(notifier.handle(&ev).is_err(), "retry must reach the sink again");
    }
}
