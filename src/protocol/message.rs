use bytes::Bytes;

/// Status shared by every action on success.
pub const STATUS_SUCCESS: i32 = 0;

/// Status returned for an unknown action, or for `Termination` reaching the server.
pub const STATUS_INVALID_ACTION: i32 = -1;

pub mod action_code {
    pub const TERMINATION: i32 = 0;
    pub const LOGIN: i32 = 1;
    pub const BOOK: i32 = 2;
    pub const CONFIRM_BOOKING: i32 = 3;
    pub const CANCEL_BOOKING: i32 = 4;
    pub const LOGOUT: i32 = 5;
    pub const QUERY: i32 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Login,
    Book,
    ConfirmBooking,
    CancelBooking,
    Logout,
    Query,
    // Only meaningful to the client; the server rejects it like any unknown code
    Termination,
    Unknown(i32),
}

impl Action {
    pub fn code(self) -> i32 {
        match self {
            Self::Termination => action_code::TERMINATION,
            Self::Login => action_code::LOGIN,
            Self::Book => action_code::BOOK,
            Self::ConfirmBooking => action_code::CONFIRM_BOOKING,
            Self::CancelBooking => action_code::CANCEL_BOOKING,
            Self::Logout => action_code::LOGOUT,
            Self::Query => action_code::QUERY,
            Self::Unknown(code) => code,
        }
    }
}

impl From<i32> for Action {
    fn from(code: i32) -> Self {
        match code {
            action_code::TERMINATION => Self::Termination,
            action_code::LOGIN => Self::Login,
            action_code::BOOK => Self::Book,
            action_code::CONFIRM_BOOKING => Self::ConfirmBooking,
            action_code::CANCEL_BOOKING => Self::CancelBooking,
            action_code::LOGOUT => Self::Logout,
            action_code::QUERY => Self::Query,
            _ => Self::Unknown(code),
        }
    }
}

/// A single decoded request.
///
/// `username` and `payload` own their bytes, so everything a request
/// allocated is released when the request is dropped, whatever path the
/// handler took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub action: Action,
    pub username: Bytes,
    pub payload: Bytes,
}

impl Request {
    pub fn new(action: Action, username: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            action,
            username: username.into(),
            payload: payload.into(),
        }
    }

    pub fn login(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Self {
        Self::new(Action::Login, username, password)
    }

    pub fn book(username: impl Into<Bytes>, seat: u32) -> Self {
        Self::new(Action::Book, username, seat.to_string())
    }

    pub fn cancel_booking(username: impl Into<Bytes>, seat: u32) -> Self {
        Self::new(Action::CancelBooking, username, seat.to_string())
    }

    pub fn confirm_booking(username: impl Into<Bytes>, mode: ConfirmMode) -> Self {
        Self::new(Action::ConfirmBooking, username, mode.as_str())
    }

    pub fn query(seat: u32) -> Self {
        Self::new(Action::Query, Bytes::new(), seat.to_string())
    }

    pub fn logout(username: impl Into<Bytes>) -> Self {
        Self::new(Action::Logout, username, Bytes::new())
    }

    /// The username without the trailing NULs some C peers include in its length.
    pub fn username(&self) -> &[u8] {
        trim_nul(&self.username)
    }

    /// The payload without trailing NULs.
    pub fn payload(&self) -> &[u8] {
        trim_nul(&self.payload)
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |idx| idx + 1);
    &bytes[..end]
}

/// The two listings ConfirmBooking can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    Available,
    Booked,
}

impl ConfirmMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Booked => "booked",
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        match raw {
            b"available" => Some(Self::Available),
            b"booked" => Some(Self::Booked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: i32,
    pub payload: Bytes,
}

impl Response {
    pub fn new(status: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self::new(STATUS_SUCCESS, payload)
    }

    pub fn status(status: i32) -> Self {
        Self::new(status, Bytes::new())
    }

    pub fn invalid_action() -> Self {
        Self::status(STATUS_INVALID_ACTION)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Public view of a seat, as returned by Query. Carries no owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatRecord {
    pub id: u32,
    pub booked: bool,
    pub times_booked: u64,
    pub times_canceled: u64,
}
