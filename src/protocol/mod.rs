//! Fixed-layout binary framing shared by the server and the client.
//!
//! ```text
//! request:  i32 action | u64 username_len | u64 payload_len | username | payload
//! response: u64 payload_len | i32 status | payload
//! ```
//!
//! Every integer is little-endian and every field is handled on its own,
//! never as one packed struct.

pub mod deserializer;
pub mod message;
pub mod serializer;

/// Upper bound for a single variable-length field.
///
/// Lengths are checked against it before anything is allocated.
pub const MAX_FIELD_LEN: u64 = 64 * 1024;

pub const REQUEST_HEADER_LEN: usize = 4 + 8 + 8;

pub const RESPONSE_HEADER_LEN: usize = 8 + 4;

/// id, state, times booked, times canceled
pub const SEAT_RECORD_LEN: usize = 4 + 4 + 8 + 8;

pub const SEAT_ID_LEN: usize = 4;
