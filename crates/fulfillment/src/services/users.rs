//! User directory trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::UserId;
use domain::{CustomerSnapshot, Membership};
use serde::{Deserialize, Serialize};

use crate::error::{FulfillmentError, Result};

/// What the fulfillment core needs to know about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub membership: Membership,
}

impl UserProfile {
    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

/// Read access to user profiles and memberships.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, user_id: UserId) -> Result<Option<UserProfile>>;
}

#[derive(Debug, Default)]
struct InMemoryUsersState {
    users: HashMap<UserId, UserProfile>,
    fail: bool,
}

/// In-memory user directory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    state: Arc<Mutex<InMemoryUsersState>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        self.lock().users.insert(profile.user_id, profile);
    }

    /// Adds a plain customer and returns their id.
    pub fn add_customer(&self, name: &str) -> UserId {
        let user_id = UserId::new();
        self.insert(UserProfile {
            user_id,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: String::new(),
            membership: Membership::default(),
        });
        user_id
    }

    pub fn set_membership(&self, user_id: UserId, membership: Membership) {
        if let Some(profile) = self.lock().users.get_mut(&user_id) {
            profile.membership = membership;
        }
    }

    /// Makes every lookup fail, as if the directory were down.
    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryUsersState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let state = self.lock();
        if state.fail {
            return Err(FulfillmentError::collaborator("user directory", "unavailable"));
        }
        Ok(state.users.get(&user_id).cloned())
    }
}
