//! Push notification and email sinks with in-memory implementations.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::{FulfillmentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "userId", rename_all = "lowercase")]
pub enum Recipient {
    User(UserId),
    Admins,
}

/// An in-app notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    /// Feed category, e.g. `order` or `refund`.
    pub topic: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl Email {
    /// Wraps a plain title and body in the standard mail layout.
    pub fn templated(to: impl Into<String>, title: &str, body: &str) -> Self {
        Self {
            to: to.into(),
            subject: title.to_string(),
            html: format!(
                "<div style=\"font-family:sans-serif\"><h2>{title}</h2><p>{body}</p></div>"
            ),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn send(&self, email: Email) -> Result<()>;
}

#[derive(Debug)]
struct Recorded<T> {
    items: Vec<T>,
    fail: bool,
}

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            fail: false,
        }
    }
}

/// Records everything it is asked to deliver. Used in tests and in the
/// default binary where no delivery backend is configured.
#[derive(Debug, Clone)]
pub struct InMemorySink<T> {
    state: Arc<Mutex<Recorded<T>>>,
}

impl<T> Default for InMemorySink<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(Recorded::default())),
        }
    }
}

impl<T: Clone> InMemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().items.len()
    }

    /// Makes every delivery fail.
    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    fn record(&self, service: &'static str, item: T) -> Result<()> {
        let mut state = self.lock();
        if state.fail {
            return Err(FulfillmentError::collaborator(service, "delivery failed"));
        }
        state.items.push(item);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Recorded<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub type InMemoryNotificationSink = InMemorySink<Notification>;
pub type InMemoryEmailSink = InMemorySink<Email>;

#[async_trait]
impl NotificationSink for InMemorySink<Notification> {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.record("notifications", notification)
    }
}

#[async_trait]
impl EmailSink for InMemorySink<Email> {
    async fn send(&self, email: Email) -> Result<()> {
        self.record("email", email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sinks_record_deliveries() {
        let notifications = InMemoryNotificationSink::new();
        notifications
            .notify(Notification {
                recipient: Recipient::Admins,
                topic: "order".into(),
                title: "New order".into(),
                message: "ORD-1".into(),
                link: None,
            })
            .await
            .unwrap();
        assert_eq!(notifications.count(), 1);

        let email = InMemoryEmailSink::new();
        email
            .send(Email::templated("a@example.com", "Refund completed", "Done."))
            .await
            .unwrap();
        assert!(email.sent()[0].html.contains("Refund completed"));
    }

    #[tokio::test]
    async fn failing_sink_records_nothing() {
        let email = InMemoryEmailSink::new();
        email.set_fail(true);
        assert!(email.send(Email::templated("a@example.com", "t", "b")).await.is_err());
        assert_eq!(email.count(), 0);
    }
}
