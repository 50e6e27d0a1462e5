//! Blocking client for the booking protocol.
//!
//! Requests carry the username of whoever last logged in through this client;
//! before any login they go out with an empty username and the server answers
//! "not logged in".

use std::{
    io::{BufReader, BufWriter, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use bytes::Bytes;

use crate::{
    handler::{
        BookError, CancelBookingError, ConfirmBookingError, LoginError, LogoutError, QueryError,
    },
    protocol::{
        deserializer::{self, Deserialize, DeserializeError},
        message::{Action, ConfirmMode, Request, Response, SeatRecord},
        serializer::{Serialize, SerializeError},
    },
};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Serialize(#[from] SerializeError),

    #[error("{0}")]
    Deserialize(#[from] DeserializeError),

    #[error("the server closed the connection")]
    Closed,

    #[error("login failed: {0}")]
    Login(#[from] LoginError),

    #[error("booking failed: {0}")]
    Book(#[from] BookError),

    #[error("confirming bookings failed: {0}")]
    ConfirmBooking(#[from] ConfirmBookingError),

    #[error("cancelling failed: {0}")]
    CancelBooking(#[from] CancelBookingError),

    #[error("logout failed: {0}")]
    Logout(#[from] LogoutError),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("unexpected status {status} for {action:?}")]
    UnknownStatus { action: Action, status: i32 },
}

fn check<E>(
    action: Action,
    response: Response,
    from_code: fn(i32) -> Option<E>,
) -> Result<Bytes, ClientError>
where
    ClientError: From<E>,
{
    if response.is_success() {
        return Ok(response.payload);
    }

    match from_code(response.status) {
        Some(status) => Err(status.into()),
        None => Err(ClientError::UnknownStatus {
            action,
            status: response.status,
        }),
    }
}

#[derive(Debug)]
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    active_user: Option<Bytes>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            active_user: None,
        })
    }

    pub fn active_user(&self) -> Option<&[u8]> {
        self.active_user.as_deref()
    }

    pub fn send_request(&mut self, request: &Request) -> Result<(), ClientError> {
        request.serialize(&mut self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn receive_response(&mut self) -> Result<Response, ClientError> {
        Response::deserialize(&mut self.reader).map_err(|err| {
            if err.is_closed() {
                ClientError::Closed
            } else {
                err.into()
            }
        })
    }

    /// Sends one request and waits for its response.
    pub fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.send_request(request)?;
        self.receive_response()
    }

    fn username(&self) -> Bytes {
        self.active_user.clone().unwrap_or_default()
    }

    pub fn login(
        &mut self,
        username: impl Into<Bytes>,
        password: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let request = Request::login(username, password);
        let response = self.call(&request)?;
        check(Action::Login, response, LoginError::from_code)?;

        self.active_user = Some(Bytes::copy_from_slice(request.username()));
        Ok(())
    }

    pub fn book(&mut self, seat: u32) -> Result<(), ClientError> {
        let response = self.call(&Request::book(self.username(), seat))?;
        check(Action::Book, response, BookError::from_code)?;
        Ok(())
    }

    pub fn cancel_booking(&mut self, seat: u32) -> Result<(), ClientError> {
        let response = self.call(&Request::cancel_booking(self.username(), seat))?;
        check(Action::CancelBooking, response, CancelBookingError::from_code)?;
        Ok(())
    }

    /// Lists available seats, or the seats booked by the active user.
    pub fn confirm_booking(&mut self, mode: ConfirmMode) -> Result<Vec<u32>, ClientError> {
        let response = self.call(&Request::confirm_booking(self.username(), mode))?;
        let payload = check(
            Action::ConfirmBooking,
            response,
            ConfirmBookingError::from_code,
        )?;

        Ok(deserializer::seat_ids(&payload)?)
    }

    pub fn query(&mut self, seat: u32) -> Result<SeatRecord, ClientError> {
        let response = self.call(&Request::query(seat))?;
        let payload = check(Action::Query, response, QueryError::from_code)?;

        Ok(SeatRecord::from_payload(&payload)?)
    }

    pub fn logout(&mut self) -> Result<(), ClientError> {
        let response = self.call(&Request::logout(self.username()))?;
        check(Action::Logout, response, LogoutError::from_code)?;

        self.active_user = None;
        Ok(())
    }

    /// Logs the active user out, if any, and closes the connection.
    pub fn terminate(mut self) -> Result<(), ClientError> {
        if self.active_user.is_some() {
            self.logout()?;
        }

        self.writer.flush()?;
        self.writer.get_ref().shutdown(Shutdown::Both)?;
        Ok(())
    }
}
