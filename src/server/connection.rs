use std::{
    collections::HashSet,
    io::{Read, Write},
    net::SocketAddr,
    sync::Arc,
};

use bytes::{Buf, Bytes, BytesMut};
use mio::{net::TcpStream, Interest, Registry, Token};

use crate::{
    handler,
    protocol::{
        deserializer::DeserializeError,
        message::{Action, Request},
    },
    store::{SessionId, SharedState},
};

const READ_CHUNK_BYTES: usize = 4096;

// reads served per readiness pass before yielding to the other connections
const READS_PER_PASS: usize = 16;

// answers queued past this point hold back parsing and reading
const WRITE_BUFFER_LIMIT: usize = 4096;

#[derive(thiserror::Error, Debug)]
pub enum ConnectionErr {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    Frame(#[from] DeserializeError),

    #[error("the peer closed the connection")]
    Closed,
}

/// How far one pass over the socket got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// The socket would block; a new edge arrives with more data.
    Drained,
    /// The read budget ran out with data possibly left in the socket.
    Yielded,
    /// Too many answers are waiting; requests stay buffered until they go out.
    Paused,
    /// The peer shut down its side.
    Closed,
}

/// One client connection owned by a worker.
///
/// Requests are parsed out of `read_buffer` as soon as they are complete and
/// answered in arrival order; answers queue in `write_buffer` until the
/// socket accepts them. A peer that stops reading its answers stops being
/// read from, so both buffers stay bounded.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    interest: Interest,
    session: SessionId,
    // usernames this connection logged in, released when it goes away
    logins: HashSet<Bytes>,
    state: Arc<SharedState>,
}

impl Connection {
    pub fn new(stream: TcpStream, state: Arc<SharedState>) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;

        Ok(Self {
            stream,
            peer,
            read_buffer: BytesMut::with_capacity(READ_CHUNK_BYTES),
            write_buffer: BytesMut::new(),
            interest: Interest::READABLE,
            session: SessionId::next(),
            logins: HashSet::new(),
            state,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> std::io::Result<()> {
        registry.register(&mut self.stream, token, self.interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Serves one readiness notification.
    ///
    /// Readiness is edge-triggered: a pass that stops before the socket would
    /// block re-arms the registration so the worker comes back to it. Any
    /// error means the connection must be closed.
    pub fn on_ready(&mut self, registry: &Registry, token: Token) -> Result<(), ConnectionErr> {
        // room for answers held back by an earlier pass
        self.flush_writes()?;

        let pass = self.serve_requests();
        // answers produced before a malformed frame still go out
        let flushed = self.flush_writes();
        let pass = pass?;
        flushed?;

        if pass == Pass::Closed {
            return Err(ConnectionErr::Closed);
        }

        self.refresh_interest(registry, token, pass)?;
        Ok(())
    }

    fn serve_requests(&mut self) -> Result<Pass, ConnectionErr> {
        if !self.answer_requests()? {
            return Ok(Pass::Paused);
        }

        let mut chunk = [0u8; READ_CHUNK_BYTES];
        let mut reads = 0;
        while reads < READS_PER_PASS {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(Pass::Closed),
                Ok(read_len) => {
                    reads += 1;
                    self.read_buffer.extend_from_slice(&chunk[..read_len]);
                    if !self.answer_requests()? {
                        return Ok(Pass::Paused);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(Pass::Drained)
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Pass::Yielded)
    }

    /// Answers complete requests until the write buffer is full.
    ///
    /// Returns `false` when answering stopped with the buffer full.
    fn answer_requests(&mut self) -> Result<bool, DeserializeError> {
        while self.write_buffer.len() < WRITE_BUFFER_LIMIT {
            let Some(request) = Request::parse(&mut self.read_buffer)? else {
                return Ok(true);
            };

            let response = handler::handle(&request, &self.state, self.session);
            if request.action == Action::Login && response.is_success() {
                self.logins.insert(Bytes::copy_from_slice(request.username()));
            }

            response.encode(&mut self.write_buffer);
        }

        Ok(false)
    }

    fn flush_writes(&mut self) -> std::io::Result<()> {
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => return Err(std::io::ErrorKind::WriteZero.into()),
                Ok(written) => self.write_buffer.advance(written),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    fn refresh_interest(
        &mut self,
        registry: &Registry,
        token: Token,
        pass: Pass,
    ) -> std::io::Result<()> {
        let next_interest = if self.write_buffer.len() >= WRITE_BUFFER_LIMIT {
            // not another byte in until the peer takes its answers
            Interest::WRITABLE
        } else if self.write_buffer.is_empty() && pass != Pass::Paused {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        // reregistering reports readiness that is already there, which
        // brings back a connection whose pass ended early
        let rearm = matches!(pass, Pass::Yielded | Pass::Paused);
        if next_interest == self.interest && !rearm {
            return Ok(());
        }

        registry.reregister(&mut self.stream, token, next_interest)?;
        self.interest = next_interest;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for username in self.logins.drain() {
            if self.state.users.release(&username, self.session) {
                tracing::debug!(
                    session = %self.session,
                    peer = %self.peer,
                    "logged out on disconnect"
                );
            }
        }
    }
}
