//! Notification delivery channels.
//!
//! Two independent surfaces receive every dispatched notification:
//!
//! - the in-app [`ToastBus`], a broadcast channel any number of views can
//!   subscribe to;
//! - a [`PlatformChannel`], the operating-system style notification that
//!   requires the viewer's permission and auto-dismisses.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventSink};

/// Severity of an in-app toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Warning,
}

impl std::fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToastLevel::Info => write!(f, "info"),
            ToastLevel::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub message: String,
    pub level: ToastLevel,
}

impl Toast {
    pub fn new(message: impl Into<String>, level: ToastLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }
}

/// In-app toast broadcaster.
///
/// Publishing with no live subscriber drops the toast; lagging subscribers
/// lose the oldest toasts beyond the buffer capacity.
#[derive(Debug, Clone)]
pub struct ToastBus {
    tx: broadcast::Sender<Toast>,
}

impl ToastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to every subscriber; returns how many received it.
    pub fn publish(&self, toast: Toast) -> usize {
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(level = %toast.level, subscriber_count, "toast publish");
        self.tx.send(toast).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ToastBus {
    fn default() -> Self {
        Self::new(crate::config::EngineSettings::default().toast_capacity)
    }
}

/// Viewer permission for platform notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Granted,
    Denied,
    /// Not asked yet
    Default,
    Unsupported,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Permission::Granted => "granted",
            Permission::Denied => "denied",
            Permission::Default => "default",
            Permission::Unsupported => "unsupported",
        };
        write!(f, "{label}")
    }
}

/// Operating-system style notification surface.
pub trait PlatformChannel: Send + Sync {
    fn permission(&self) -> Permission;

    /// Ask for permission; returns the resulting state.
    fn request_permission(&self) -> Permission;

    /// Show a notification. `tag` replaces any visible notification with
    /// the same tag.
    fn show(&self, title: &str, body: &str, tag: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct ShownPayload<'a> {
    title: &'a str,
    body: &'a str,
    dismiss_after_ms: u128,
}

/// Platform channel that renders notifications as JSONL events.
///
/// A `notification_shown` event is written on `show`, followed by a
/// `notification_dismissed` event once the display interval elapses.
#[derive(Debug)]
pub struct EventSinkPlatform {
    sink: Arc<EventSink>,
    display_interval: Duration,
    permission: Mutex<Permission>,
}

impl EventSinkPlatform {
    pub fn new(sink: EventSink, display_interval: Duration) -> Self {
        Self {
            sink: Arc::new(sink),
            display_interval,
            permission: Mutex::new(Permission::Default),
        }
    }

    pub fn with_permission(self, permission: Permission) -> Self {
        self.set_permission(permission);
        self
    }

    fn set_permission(&self, permission: Permission) {
        let mut guard = self
            .permission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = permission;
    }

    fn schedule_dismiss(&self, tag: &str) {
        if self.display_interval.is_zero() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(tag, "no runtime, notification stays until replaced");
            return;
        };
        let sink = Arc::clone(&self.sink);
        let interval = self.display_interval;
        let tag = tag.to_string();
        handle.spawn(async move {
            tokio::time::sleep(interval).await;
            let event = Event::new(EventKind::NotificationDismissed, Some(tag.clone()));
            if let Err(err) = sink.emit(&event) {
                tracing::warn!(tag = %tag, error = %err, "failed to emit dismissal");
            }
        });
    }
}

impl PlatformChannel for EventSinkPlatform {
    fn permission(&self) -> Permission {
        *self
            .permission
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request_permission(&self) -> Permission {
        // The sink has no one to ask; an unanswered request grants.
        let current = self.permission();
        if current == Permission::Default {
            self.set_permission(Permission::Granted);
            return Permission::Granted;
        }
        current
    }

    fn show(&self, title: &str, body: &str, tag: &str) -> Result<()> {
        let event = Event::new(EventKind::NotificationShown, Some(tag.to_string())).with_data(
            ShownPayload {
                title,
                body,
                dismiss_after_ms: self.display_interval.as_millis(),
            },
        )?;
        self.sink.emit(&event)?;
        self.schedule_dismiss(tag);
        Ok(())
    }
}

/// Platform channel for environments without notification support.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPlatform;

impl PlatformChannel for DisabledPlatform {
    fn permission(&self) -> Permission {
        Permission::Unsupported
    }

    fn request_permission(&self) -> Permission {
        Permission::Unsupported
    }

    fn show(&self, _title: &str, _body: &str, _tag: &str) -> Result<()> {
        Err(Error::ChannelUnavailable(
            "platform notifications are not supported".to_string(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Cloneable in-memory writer for inspecting sink output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        pub(crate) fn lines(&self) -> Vec<serde_json::Value> {
            let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            raw.lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    #[test]
    fn publish_without_subscribers_reaches_nobody() {
        let bus = ToastBus::new(4);
        assert_eq!(bus.publish(Toast::new("hi", ToastLevel::Info)), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_toasts() {
        let bus = ToastBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.publish(Toast::new("due soon", ToastLevel::Warning)), 2);
        assert_eq!(a.recv().await.unwrap().message, "due soon");
        assert_eq!(b.recv().await.unwrap().level, ToastLevel::Warning);
    }

    #[test]
    fn event_sink_permission_flow() {
        let platform = EventSinkPlatform::new(
            EventSink::from_writer(Box::new(SharedBuf::default())),
            Duration::ZERO,
        );
        assert_eq!(platform.permission(), Permission::Default);
        assert_eq!(platform.request_permission(), Permission::Granted);

        let denied = EventSinkPlatform::new(
            EventSink::from_writer(Box::new(SharedBuf::default())),
            Duration::ZERO,
        )
        .with_permission(Permission::Denied);
        assert_eq!(denied.request_permission(), Permission::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn shown_notification_is_dismissed_after_interval() {
        let buf = SharedBuf::default();
        let platform = EventSinkPlatform::new(
            EventSink::from_writer(Box::new(buf.clone())),
            Duration::from_secs(5),
        )
        .with_permission(Permission::Granted);

        platform
            .show("Upcoming Deadline", "\"Essay\" is due in 1 hour!", "deadline-t1-1h")
            .unwrap();
        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "notification_shown");
        assert_eq!(lines[0]["tag"], "deadline-t1-1h");
        assert_eq!(lines[0]["data"]["dismiss_after_ms"], 5000);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["event"], "notification_dismissed");
        assert_eq!(lines[1]["tag"], "deadline-t1-1h");
    }

    #[test]
    fn disabled_platform_refuses() {
        let platform = DisabledPlatform;
        assert_eq!(platform.request_permission(), Permission::Unsupported);
        assert!(matches!(
            platform.show("t", "b", "tag"),
            Err(Error::ChannelUnavailable(_))
        ));
    }
}
