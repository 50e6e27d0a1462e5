//! Shared domain state: the user directory and the seat table.
//!
//! Lock order is always the users lock first and a seat lock second. No code
//! path takes the users lock while it holds a seat lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod seats;
pub mod users;

pub use seats::{Seat, SeatState, Seats, NUM_SEATS};
pub use users::{Argon2Hasher, HashError, PasswordHasher, SessionId, User, Users};

/// Everything the workers share, built once at startup.
#[derive(Debug)]
pub struct SharedState {
    pub users: Users,
    pub seats: Seats,
}

impl SharedState {
    pub fn new(users: Users, seats: Seats) -> Self {
        Self { users, seats }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(Users::default(), Seats::new(NUM_SEATS))
    }
}

// Poisoned guards are recovered: no guarded value spans more than one field
// update that a panic could leave half done.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
