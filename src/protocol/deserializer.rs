use std::io::Read;

use bytes::{Buf, Bytes, BytesMut};

use super::{
    message::{Request, Response, SeatRecord},
    MAX_FIELD_LEN, REQUEST_HEADER_LEN, SEAT_ID_LEN, SEAT_RECORD_LEN,
};

pub trait Deserialize: Sized {
    type Error;

    // Deserialize a structure from a blocking reader
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum DeserializeError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{field} length {length} exceeds the limit of {} bytes", MAX_FIELD_LEN)]
    TooLong { field: &'static str, length: u64 },

    #[error("{length} bytes is not a whole number of {record} byte records")]
    Misaligned { length: usize, record: usize },
}

impl DeserializeError {
    /// True when the peer went away in the middle of (or before) a message.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

fn checked_len(field: &'static str, length: u64) -> Result<usize, DeserializeError> {
    if length > MAX_FIELD_LEN {
        return Err(DeserializeError::TooLong { field, length });
    }

    Ok(length as usize)
}

fn read_i32<R: Read>(reader: &mut R) -> std::io::Result<i32> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    Ok(i32::from_le_bytes(raw))
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut raw = [0u8; 8];
    reader.read_exact(&mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

impl Request {
    /// Takes one complete request off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the request is still incomplete, in which case
    /// nothing is consumed. Oversized length fields fail before the body is
    /// buffered, so a peer cannot make the server reserve more than
    /// `2 * MAX_FIELD_LEN` bytes for it.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Self>, DeserializeError> {
        if buf.len() < REQUEST_HEADER_LEN {
            return Ok(None);
        }

        let mut header = &buf[..REQUEST_HEADER_LEN];
        let action = header.get_i32_le();
        let username_len = checked_len("username", header.get_u64_le())?;
        let payload_len = checked_len("payload", header.get_u64_le())?;

        let total = REQUEST_HEADER_LEN + username_len + payload_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(REQUEST_HEADER_LEN);
        let username = buf.split_to(username_len).freeze();
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Self {
            action: action.into(),
            username,
            payload,
        }))
    }
}

impl Deserialize for Response {
    type Error = DeserializeError;

    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, Self::Error> {
        let length = checked_len("payload", read_u64(reader)?)?;
        let status = read_i32(reader)?;

        let mut payload = vec![0u8; length];
        if length > 0 {
            reader.read_exact(&mut payload)?;
        }

        Ok(Self {
            status,
            payload: Bytes::from(payload),
        })
    }
}

impl SeatRecord {
    pub fn from_payload(mut payload: &[u8]) -> Result<Self, DeserializeError> {
        if payload.len() != SEAT_RECORD_LEN {
            return Err(DeserializeError::Misaligned {
                length: payload.len(),
                record: SEAT_RECORD_LEN,
            });
        }

        Ok(Self {
            id: payload.get_u32_le(),
            booked: payload.get_u32_le() != 0,
            times_booked: payload.get_u64_le(),
            times_canceled: payload.get_u64_le(),
        })
    }
}

/// Decodes the seat id list carried by a ConfirmBooking response.
pub fn seat_ids(payload: &[u8]) -> Result<Vec<u32>, DeserializeError> {
    if payload.len() % SEAT_ID_LEN != 0 {
        return Err(DeserializeError::Misaligned {
            length: payload.len(),
            record: SEAT_ID_LEN,
        });
    }

    Ok(payload
        .chunks_exact(SEAT_ID_LEN)
        .map(|mut chunk| chunk.get_u32_le())
        .collect())
}
