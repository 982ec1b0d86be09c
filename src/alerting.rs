// 📣 Alerting Channel - fire-and-forget failure notifications
//
// Invoked once per failed invocation. Delivery problems are the channel's
// own business and never surface to the caller.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub trait AlertChannel: Send + Sync {
    fn notify(&self, subject: &str, message: &str);
}

/// Writes alerts to the log at ERROR level
#[derive(Debug, Default, Clone)]
pub struct LogAlertChannel;

impl AlertChannel for LogAlertChannel {
    fn notify(&self, subject: &str, message: &str) {
        tracing::error!(alert.subject = subject, alert.message = message, "alert raised");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub subject: String,
    pub message: String,
}

/// Keeps every alert in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryAlertChannel {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl MemoryAlertChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }
}

impl AlertChannel for MemoryAlertChannel {
    fn notify(&self, subject: &str, message: &str) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(Alert {
                subject: subject.to_string(),
                message: message.to_string(),
            });
        }
    }
}
