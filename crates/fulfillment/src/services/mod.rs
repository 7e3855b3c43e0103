//! External collaborator traits and in-memory implementations.

pub mod cache;
pub mod notify;
pub mod payment;
pub mod users;

use std::sync::Arc;

pub use cache::{ACTIVE_SALE_KEY, Cache, HOME_KEY, InMemoryCache};
pub use notify::{
    Email, EmailSink, InMemoryEmailSink, InMemoryNotificationSink, InMemorySink, Notification,
    NotificationSink, Recipient,
};
pub use payment::{HmacPaymentVerifier, PaymentVerifier};
pub use users::{InMemoryUserDirectory, UserDirectory, UserProfile};

/// The injected collaborators every fulfillment service draws from.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub cache: Arc<dyn Cache>,
    pub notifications: Arc<dyn NotificationSink>,
    pub email: Arc<dyn EmailSink>,
    pub payments: Arc<dyn PaymentVerifier>,
}

/// Handles to the in-memory collaborators behind a [`Collaborators`] set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollaborators {
    pub users: InMemoryUserDirectory,
    pub cache: InMemoryCache,
    pub notifications: InMemoryNotificationSink,
    pub email: InMemoryEmailSink,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the trait-object set, verifying payments with `payment_secret`.
    pub fn collaborators(&self, payment_secret: &str) -> Collaborators {
        Collaborators {
            users: Arc::new(self.users.clone()),
            cache: Arc::new(self.cache.clone()),
            notifications: Arc::new(self.notifications.clone()),
            email: Arc::new(self.email.clone()),
            payments: Arc::new(HmacPaymentVerifier::new(payment_secret)),
        }
    }
}
