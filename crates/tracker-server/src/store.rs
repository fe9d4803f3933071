//! In-memory user store
//!
//! Holds each registered user's email and current credential generation,
//! and serves as the [`RevocationSource`] behind the revocation cache.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;
use tracker_admission::{RevocationSource, SourceError};
use uuid::Uuid;

/// Generation assigned at registration
pub const INITIAL_TOKEN_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub token_version: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("user {0} not found")]
    UnknownUser(String),
}

/// Users keyed by id, with a unique index on email
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, UserRecord>,
    emails: DashMap<String, String>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user at [`INITIAL_TOKEN_VERSION`].
    ///
    /// # Errors
    ///
    /// [`StoreError::EmailTaken`] if the (case-folded) email is in use.
    pub fn register(&self, name: &str, email: &str) -> Result<UserRecord, StoreError> {
        let email = email.trim().to_lowercase();
        let id = Uuid::new_v4().to_string();

        // Claim the email first so two concurrent registrations cannot both win
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => return Err(StoreError::EmailTaken),
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }

        let record = UserRecord {
            id: id.clone(),
            name: name.trim().to_owned(),
            email,
            token_version: INITIAL_TOKEN_VERSION,
        };
        self.users.insert(id.clone(), record.clone());
        info!(user_id = %id, "user registered");
        Ok(record)
    }

    pub fn get(&self, user_id: &str) -> Option<UserRecord> {
        self.users.get(user_id).map(|u| u.clone())
    }

    /// Increment the user's generation and return the new value.
    ///
    /// Every token carrying an earlier generation becomes stale once the
    /// revocation cache entry is invalidated.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownUser`] if no such user exists.
    pub fn bump_version(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_owned()))?;
        user.token_version += 1;
        Ok(user.token_version)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl RevocationSource for InMemoryUserStore {
    async fn current_version(&self, user_id: &str) -> Result<u64, SourceError> {
        self.users
            .get(user_id)
            .map(|u| u.token_version)
            .ok_or_else(|| SourceError::UnknownUser(user_id.to_owned()))
    }
}
