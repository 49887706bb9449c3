use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MAX_NOTIFICATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget alert queue. Pushing never fails; the oldest alerts fall off once the
/// queue is full.
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Arc<Mutex<VecDeque<Notification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info<S: Into<String>>(&self, message: S) {
        self.push(NotificationLevel::Info, message.into());
    }

    pub fn warn<S: Into<String>>(&self, message: S) {
        self.push(NotificationLevel::Warning, message.into());
    }

    pub fn error<S: Into<String>>(&self, message: S) {
        self.push(NotificationLevel::Error, message.into());
    }

    fn push(&self, level: NotificationLevel, message: String) {
        match level {
            NotificationLevel::Info => log::info!("{}", message),
            NotificationLevel::Warning => log::warn!("{}", message),
            NotificationLevel::Error => log::error!("{}", message),
        }
        if let Ok(mut queue) = self.inner.lock() {
            if queue.len() >= MAX_NOTIFICATIONS {
                queue.pop_front();
            }
            queue.push_back(Notification {
                level,
                message,
                at: Utc::now(),
            });
        }
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        if let Ok(queue) = self.inner.lock() {
            queue.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// Take every pending alert, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        if let Ok(mut queue) = self.inner.lock() {
            queue.drain(..).collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_queue_in_order() {
        let notifier = Notifier::new();
        notifier.info("first");
        notifier.error("second");

        let drained = notifier.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "first");
        assert_eq!(drained[1].level, NotificationLevel::Error);
        assert!(notifier.snapshot().is_empty());
    }

    #[test]
    fn queue_is_bounded() {
        let notifier = Notifier::new();
        for i in 0..(MAX_NOTIFICATIONS + 5) {
            notifier.warn(format!("alert {}", i));
        }
        let snapshot = notifier.snapshot();
        assert_eq!(snapshot.len(), MAX_NOTIFICATIONS);
        assert_eq!(snapshot[0].message, "alert 5");
    }
}
