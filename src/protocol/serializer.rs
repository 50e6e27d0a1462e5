use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    message::{Request, Response, SeatRecord},
    MAX_FIELD_LEN, RESPONSE_HEADER_LEN, SEAT_ID_LEN, SEAT_RECORD_LEN,
};

pub trait Serialize {
    type Error;

    /// Serialize a structure into a blocking writer
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum SerializeError {
    #[error("{field} is {length} bytes, over the limit of {} bytes", MAX_FIELD_LEN)]
    TooLong { field: &'static str, length: usize },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

fn checked_len(field: &'static str, data: &[u8]) -> Result<u64, SerializeError> {
    let length = data.len() as u64;
    if length > MAX_FIELD_LEN {
        return Err(SerializeError::TooLong {
            field,
            length: data.len(),
        });
    }

    Ok(length)
}

impl Serialize for Request {
    type Error = SerializeError;

    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Self::Error> {
        let username_len = checked_len("username", &self.username)?;
        let payload_len = checked_len("payload", &self.payload)?;

        // write_all loops over short writes and retries interrupted calls
        writer.write_all(&self.action.code().to_le_bytes())?;
        writer.write_all(&username_len.to_le_bytes())?;
        writer.write_all(&payload_len.to_le_bytes())?;
        if username_len > 0 {
            writer.write_all(&self.username)?;
        }
        if payload_len > 0 {
            writer.write_all(&self.payload)?;
        }

        Ok(())
    }
}

impl Response {
    /// Appends the wire form of the response to an outgoing buffer.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(RESPONSE_HEADER_LEN + self.payload.len());
        dst.put_u64_le(self.payload.len() as u64);
        dst.put_i32_le(self.status);
        dst.put_slice(&self.payload);
    }
}

impl SeatRecord {
    pub fn to_payload(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(SEAT_RECORD_LEN);
        dst.put_u32_le(self.id);
        dst.put_u32_le(self.booked as u32);
        dst.put_u64_le(self.times_booked);
        dst.put_u64_le(self.times_canceled);
        dst.freeze()
    }
}

/// Encodes a ConfirmBooking seat id list.
pub fn seat_ids(ids: &[u32]) -> Bytes {
    let mut dst = BytesMut::with_capacity(ids.len() * SEAT_ID_LEN);
    for id in ids {
        dst.put_u32_le(*id);
    }
    dst.freeze()
}
