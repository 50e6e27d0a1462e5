use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use bytes::Bytes;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one client connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("failed to hash the password: {0}")]
pub struct HashError(#[from] argon2::password_hash::Error);

/// Credential primitive used by Login.
pub trait PasswordHasher: Send + Sync + fmt::Debug {
    fn hash(&self, password: &[u8]) -> Result<String, HashError>;

    fn verify(&self, password: &[u8], digest: &str) -> bool;
}

/// Argon2id with default parameters, stored as a PHC string.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &[u8]) -> Result<String, HashError> {
        use argon2::PasswordHasher as _;

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password, &salt)?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &[u8], digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };

        Argon2::default().verify_password(password, &parsed).is_ok()
    }
}

#[derive(Debug)]
pub struct User {
    hashed_password: String,
    // the connection that logged the user in, if any
    session: Option<SessionId>,
}

impl User {
    pub fn hashed_password(&self) -> &str {
        &self.hashed_password
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn log_in(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    pub fn log_out(&mut self) {
        self.session = None;
    }
}

/// Membership and per-user state, guarded as a whole by [`Users`].
#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<Bytes, User>,
}

impl Directory {
    pub fn find(&self, username: &[u8]) -> Option<&User> {
        self.users.get(username)
    }

    pub fn find_mut(&mut self, username: &[u8]) -> Option<&mut User> {
        self.users.get_mut(username)
    }

    /// Adds a logged out user, or returns the existing entry untouched.
    pub fn add(&mut self, username: Bytes, hashed_password: String) -> &mut User {
        self.users.entry(username).or_insert_with(|| User {
            hashed_password,
            session: None,
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// The user directory: one lock for membership and every user's fields.
#[derive(Debug)]
pub struct Users {
    directory: Mutex<Directory>,
    hasher: Box<dyn PasswordHasher>,
}

impl Users {
    pub fn new(hasher: impl PasswordHasher + 'static) -> Self {
        Self {
            directory: Mutex::default(),
            hasher: Box::new(hasher),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Directory> {
        super::lock(&self.directory)
    }

    pub fn hasher(&self) -> &dyn PasswordHasher {
        self.hasher.as_ref()
    }

    /// Logs `username` out, but only if `session` is still the one that logged it in.
    ///
    /// Returns true if the user was logged out.
    pub fn release(&self, username: &[u8], session: SessionId) -> bool {
        let mut directory = self.lock();
        match directory.find_mut(username) {
            Some(user) if user.session() == Some(session) => {
                user.log_out();
                true
            }
            _ => false,
        }
    }
}

impl Default for Users {
    fn default() -> Self {
        Self::new(Argon2Hasher)
    }
}
