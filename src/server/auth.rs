//! User registration, authentication and session slots.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::protocol::AuthStatus;

const SALT_LEN: usize = 16;

/// Stored credentials: a random salt and the SHA-256 digest of
/// `salt || password`, both hex encoded.
#[derive(Debug, Clone)]
struct Credentials {
    salt: String,
    digest: String,
}

impl Credentials {
    fn new(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let digest = digest(&salt, password);
        Self { salt, digest }
    }

    fn matches(&self, password: &str) -> bool {
        digest(&self.salt, password) == self.digest
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Known users. Authenticating as an unknown user registers it.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Mutex<HashMap<String, Credentials>>,
}

impl UserRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `username` if unknown, otherwise checks its password.
    ///
    /// Returns [`AuthStatus::SuccessNewUser`], [`AuthStatus::Success`] or
    /// [`AuthStatus::WrongCredentials`].
    pub fn authenticate(&self, username: &str, password: &str) -> AuthStatus {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        match users.get(username) {
            Some(credentials) if credentials.matches(password) => AuthStatus::Success,
            Some(_) => AuthStatus::WrongCredentials,
            None => {
                users.insert(username.to_owned(), Credentials::new(password));
                debug!(username, "Registered new user");
                AuthStatus::SuccessNewUser
            }
        }
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no user is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Limits the number of concurrently logged-in users and keeps each user to
/// one session.
///
/// Slots are handed out in request order: a login that finds every slot
/// taken waits until a session ends.
#[derive(Debug)]
pub struct SessionManager {
    slots: Arc<Semaphore>,
    active: Mutex<HashSet<String>>,
}

impl SessionManager {
    /// Creates a manager with `max_sessions` slots.
    #[must_use]
    pub fn new(max_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Arc::new(Semaphore::new(max_sessions)),
            active: Mutex::new(HashSet::new()),
        })
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a session for `username`, waiting for a free slot.
    ///
    /// Returns `None` if the user already has a session.
    pub async fn open(self: &Arc<Self>, username: &str) -> Option<Session> {
        if self.active().contains(username) {
            return None;
        }

        // The semaphore is never closed.
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;

        // Another connection may have logged the same user in while this
        // one was queued.
        if !self.active().insert(username.to_owned()) {
            return None;
        }

        debug!(username, "Session opened");
        Some(Session {
            manager: Arc::clone(self),
            username: username.to_owned(),
            _permit: permit,
        })
    }

    /// Number of open sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active().len()
    }
}

/// An open session. Dropping it frees the user name and the slot.
#[derive(Debug)]
pub struct Session {
    manager: Arc<SessionManager>,
    username: String,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    /// The logged-in user.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.manager.active().remove(&self.username);
        debug!(username = %self.username, "Session closed");
    }
}
