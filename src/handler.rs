//! Maps a decoded request onto the shared store and produces the response.
//!
//! Nothing here touches a socket. Each action has its own status enumeration
//! whose discriminant is the status code sent on the wire; success is always 0.

use bytes::Bytes;

use crate::{
    protocol::{
        message::{Action, ConfirmMode, Request, Response},
        serializer,
    },
    store::{SessionId, SharedState},
};

pub trait StatusCode {
    fn code(&self) -> i32;
}

macro_rules! status_codes {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StatusCode for $ty {
                fn code(&self) -> i32 {
                    *self as i32
                }
            }

            impl $ty {
                pub fn from_code(code: i32) -> Option<Self> {
                    Self::ALL.into_iter().find(|status| status.code() == code)
                }
            }
        )*
    };
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    #[error("the user is already logged in")]
    ActiveUser = 1,

    #[error("incorrect password")]
    IncorrectPassword = 2,

    #[error("no password was provided")]
    NoPassword = 3,

    #[error("no username was provided")]
    NoUsername = 4,
}

impl LoginError {
    const ALL: [Self; 4] = [
        Self::ActiveUser,
        Self::IncorrectPassword,
        Self::NoPassword,
        Self::NoUsername,
    ];
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookError {
    #[error("the user is not logged in")]
    NotLoggedIn = 1,

    #[error("the seat number is out of range")]
    SeatOutOfRange = 2,

    #[error("the seat is unavailable")]
    SeatUnavailable = 3,
}

impl BookError {
    const ALL: [Self; 3] = [Self::NotLoggedIn, Self::SeatOutOfRange, Self::SeatUnavailable];
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmBookingError {
    #[error("the user is not logged in")]
    NotLoggedIn = 1,

    #[error("expected either \"available\" or \"booked\"")]
    InvalidData = 2,
}

impl ConfirmBookingError {
    const ALL: [Self; 2] = [Self::NotLoggedIn, Self::InvalidData];
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelBookingError {
    #[error("the user is not logged in")]
    NotLoggedIn = 1,

    #[error("the seat number is out of range")]
    SeatOutOfRange = 2,

    #[error("the seat is not booked by the user")]
    NotBookedByUser = 3,
}

impl CancelBookingError {
    const ALL: [Self; 3] = [
        Self::NotLoggedIn,
        Self::SeatOutOfRange,
        Self::NotBookedByUser,
    ];
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutError {
    #[error("the user was not found")]
    NotFound = 1,

    #[error("the user is not logged in")]
    NotLoggedIn = 2,
}

impl LogoutError {
    const ALL: [Self; 2] = [Self::NotFound, Self::NotLoggedIn];
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    #[error("the seat number is out of range")]
    SeatOutOfRange = 1,
}

impl QueryError {
    const ALL: [Self; 1] = [Self::SeatOutOfRange];
}

status_codes!(
    LoginError,
    BookError,
    ConfirmBookingError,
    CancelBookingError,
    LogoutError,
    QueryError,
);

fn respond<E: StatusCode>(result: Result<Bytes, E>) -> Response {
    match result {
        Ok(payload) => Response::success(payload),
        Err(status) => Response::status(status.code()),
    }
}

/// Handles one request on behalf of the connection identified by `session`.
pub fn handle(request: &Request, state: &SharedState, session: SessionId) -> Response {
    let response = match request.action {
        Action::Login => respond(login(request, state, session)),
        Action::Book => respond(book(request, state)),
        Action::ConfirmBooking => respond(confirm_booking(request, state)),
        Action::CancelBooking => respond(cancel_booking(request, state)),
        Action::Logout => respond(logout(request, state)),
        Action::Query => respond(query(request, state)),
        Action::Termination | Action::Unknown(_) => Response::invalid_action(),
    };

    tracing::debug!(
        %session,
        action = ?request.action,
        status = response.status,
        "handled request"
    );
    response
}

fn login(
    request: &Request,
    state: &SharedState,
    session: SessionId,
) -> Result<Bytes, LoginError> {
    let username = request.username();
    let password = request.payload();
    if username.is_empty() {
        return Err(LoginError::NoUsername);
    }

    let mut directory = state.users.lock();
    if directory.find(username).is_some_and(|user| user.is_logged_in()) {
        return Err(LoginError::ActiveUser);
    }
    if password.is_empty() {
        return Err(LoginError::NoPassword);
    }

    match directory.find_mut(username) {
        Some(user) => {
            if !state.users.hasher().verify(password, user.hashed_password()) {
                return Err(LoginError::IncorrectPassword);
            }
            user.log_in(session);
        }
        None => {
            // first login doubles as registration
            let hashed = state.users.hasher().hash(password).map_err(|err| {
                tracing::error!(%session, "refusing registration: {}", err);
                LoginError::IncorrectPassword
            })?;
            directory
                .add(Bytes::copy_from_slice(username), hashed)
                .log_in(session);
            tracing::info!(%session, "registered a new user");
        }
    }

    Ok(Bytes::new())
}

fn book(request: &Request, state: &SharedState) -> Result<Bytes, BookError> {
    let username = request.username();

    // held until the seat is updated: a concurrent Logout of the same user
    // waits for the booking to finish
    let directory = state.users.lock();
    if !directory.find(username).is_some_and(|user| user.is_logged_in()) {
        return Err(BookError::NotLoggedIn);
    }

    let seat = state
        .seats
        .parse(request.payload())
        .ok_or(BookError::SeatOutOfRange)?;

    let mut seat_state = seat.lock();
    if seat_state.is_booked() {
        return Err(BookError::SeatUnavailable);
    }
    seat_state.book(Bytes::copy_from_slice(username));
    drop(seat_state);
    drop(directory);

    Ok(Bytes::new())
}

fn cancel_booking(request: &Request, state: &SharedState) -> Result<Bytes, CancelBookingError> {
    let username = request.username();

    let directory = state.users.lock();
    if !directory.find(username).is_some_and(|user| user.is_logged_in()) {
        return Err(CancelBookingError::NotLoggedIn);
    }

    let seat = state
        .seats
        .parse(request.payload())
        .ok_or(CancelBookingError::SeatOutOfRange)?;

    let mut seat_state = seat.lock();
    if !seat_state.is_booked_by(username) {
        return Err(CancelBookingError::NotBookedByUser);
    }
    seat_state.cancel();
    drop(seat_state);
    drop(directory);

    Ok(Bytes::new())
}

fn confirm_booking(request: &Request, state: &SharedState) -> Result<Bytes, ConfirmBookingError> {
    let username = request.username();

    {
        let directory = state.users.lock();
        if !directory.find(username).is_some_and(|user| user.is_logged_in()) {
            return Err(ConfirmBookingError::NotLoggedIn);
        }
    }

    let mode =
        ConfirmMode::from_bytes(request.payload()).ok_or(ConfirmBookingError::InvalidData)?;

    // each seat is judged under its own lock, one at a time
    let ids: Vec<u32> = state
        .seats
        .iter()
        .filter(|seat| {
            let seat_state = seat.lock();
            match mode {
                ConfirmMode::Available => !seat_state.is_booked(),
                ConfirmMode::Booked => seat_state.is_booked_by(username),
            }
        })
        .map(|seat| seat.id())
        .collect();

    Ok(serializer::seat_ids(&ids))
}

fn logout(request: &Request, state: &SharedState) -> Result<Bytes, LogoutError> {
    let mut directory = state.users.lock();
    let user = directory
        .find_mut(request.username())
        .ok_or(LogoutError::NotFound)?;

    if !user.is_logged_in() {
        return Err(LogoutError::NotLoggedIn);
    }
    user.log_out();

    Ok(Bytes::new())
}

fn query(request: &Request, state: &SharedState) -> Result<Bytes, QueryError> {
    let seat = state
        .seats
        .parse(request.payload())
        .ok_or(QueryError::SeatOutOfRange)?;

    Ok(seat.record().to_payload())
}
