use std::sync::{Mutex, MutexGuard, PoisonError};

use mio::{net::TcpStream, Registry, Token, Waker};

/// Reserved for the worker's wakeup channel; never handed to a connection.
pub const WAKE_TOKEN: Token = Token(0);

const FIRST_CONNECTION_TOKEN: usize = 1;

#[derive(thiserror::Error, Debug)]
pub enum RegisterError {
    #[error("the poll set is full ({capacity} slots)")]
    Full { stream: TcpStream, capacity: usize },

    #[error("the poll set's worker has stopped")]
    Closed { stream: TcpStream },
}

impl RegisterError {
    /// Hands the rejected connection back so it can be placed elsewhere.
    pub fn into_stream(self) -> TcpStream {
        match self {
            Self::Full { stream, .. } | Self::Closed { stream } => stream,
        }
    }
}

#[derive(Debug)]
struct Slot {
    token: Token,
    // a freshly accepted connection the worker has not adopted yet
    pending: Option<TcpStream>,
}

/// Membership of one worker's poll set, only reachable through [`PollSet::lock`].
#[derive(Debug)]
pub struct Slots {
    entries: Vec<Slot>,
    next_token: usize,
    closed: bool,
}

impl Slots {
    /// Occupied slots, counting the one held by the wakeup channel.
    pub fn len(&self) -> usize {
        self.entries.len() + 1
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Hands every connection registered since the last call to the worker.
    pub fn take_pending(&mut self) -> Vec<(Token, TcpStream)> {
        self.entries
            .iter_mut()
            .filter_map(|slot| slot.pending.take().map(|stream| (slot.token, stream)))
            .collect()
    }

    /// Frees the slot of `token`, swapping the last entry into its place.
    ///
    /// Looks the slot up by value; positions change on every removal.
    pub fn remove(&mut self, token: Token) -> bool {
        match self.entries.iter().position(|slot| slot.token == token) {
            Some(idx) => {
                self.entries.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Refuses any further registration and drops connections never adopted.
    pub fn close(&mut self) {
        self.closed = true;
        self.entries.clear();
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        token
    }
}

/// The bounded set of connections one worker multiplexes.
///
/// The acceptor inserts through [`PollSet::register`]; only the owning worker
/// adopts and removes entries. Both sides go through the same lock, and the
/// worker never holds it while blocked waiting for readiness.
#[derive(Debug)]
pub struct PollSet {
    capacity: usize,
    slots: Mutex<Slots>,
    waker: Waker,
}

impl PollSet {
    /// Creates a poll set whose wakeup channel is registered with the worker's poller.
    ///
    /// `capacity` includes the slot of the wakeup channel.
    pub fn new(registry: &Registry, capacity: usize) -> std::io::Result<Self> {
        Ok(Self {
            capacity: capacity.max(2),
            slots: Mutex::new(Slots {
                entries: Vec::with_capacity(capacity.saturating_sub(1)),
                next_token: FIRST_CONNECTION_TOKEN,
                closed: false,
            }),
            waker: Waker::new(registry, WAKE_TOKEN)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection and wakes the worker so its next wait includes it.
    ///
    /// The wakeup is sent after the lock is released, whether or not the
    /// connection was accepted.
    pub fn register(&self, stream: TcpStream) -> Result<Token, RegisterError> {
        let result = {
            let mut slots = self.lock();
            if slots.closed {
                Err(RegisterError::Closed { stream })
            } else if slots.len() >= self.capacity {
                Err(RegisterError::Full {
                    stream,
                    capacity: self.capacity,
                })
            } else {
                let token = slots.allocate_token();
                slots.entries.push(Slot {
                    token,
                    pending: Some(stream),
                });
                Ok(token)
            }
        };

        self.wake();
        result
    }

    /// Interrupts the worker's readiness wait.
    pub fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!("failed to wake a worker: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use mio::{
        net::{TcpListener, TcpStream},
        Events, Poll, Token,
    };

    use super::{PollSet, RegisterError, WAKE_TOKEN};

    fn connected_pair(listener: &TcpListener) -> (TcpStream, std::net::TcpStream) {
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        loop {
            match listener.accept() {
                Ok((stream, _)) => return (stream, client),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        }
    }

    fn listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap()
    }

    #[test]
    fn register_until_full() {
        let poll = Poll::new().unwrap();
        let pollset = PollSet::new(poll.registry(), 3).unwrap();
        let listener = listener();
        let mut clients = vec![];

        assert_eq!(pollset.len(), 1);
        for expected in [Token(1), Token(2)] {
            let (stream, client) = connected_pair(&listener);
            clients.push(client);
            assert_eq!(pollset.register(stream).unwrap(), expected);
        }
        assert_eq!(pollset.len(), 3);

        let (stream, _client) = connected_pair(&listener);
        match pollset.register(stream) {
            Err(RegisterError::Full { capacity, .. }) => assert_eq!(capacity, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(pollset.len(), 3);
    }

    #[test]
    fn swap_remove_by_token() {
        let poll = Poll::new().unwrap();
        let pollset = PollSet::new(poll.registry(), 8).unwrap();
        let listener = listener();
        let mut clients = vec![];

        for _ in 0..4 {
            let (stream, client) = connected_pair(&listener);
            clients.push(client);
            pollset.register(stream).unwrap();
        }

        let mut slots = pollset.lock();
        let adopted: Vec<Token> = slots.take_pending().into_iter().map(|(t, _)| t).collect();
        assert_eq!(adopted, [Token(1), Token(2), Token(3), Token(4)]);
        assert!(slots.take_pending().is_empty());

        assert!(slots.remove(Token(2)));
        assert!(!slots.remove(Token(2)));
        assert!(slots.remove(Token(4)));
        assert_eq!(slots.len(), 3);

        // tokens are never reused, even after removal
        drop(slots);
        let (stream, _client) = connected_pair(&listener);
        assert_eq!(pollset.register(stream).unwrap(), Token(5));
    }

    #[test]
    fn closed_sets_refuse_connections() {
        let poll = Poll::new().unwrap();
        let pollset = PollSet::new(poll.registry(), 8).unwrap();
        let listener = listener();

        pollset.lock().close();
        let (stream, _client) = connected_pair(&listener);
        let err = pollset.register(stream).unwrap_err();
        assert!(matches!(err, RegisterError::Closed { .. }));
        let _stream = err.into_stream();
        assert!(pollset.is_empty());
    }

    #[test]
    fn register_wakes_the_worker() {
        let mut poll = Poll::new().unwrap();
        let pollset = PollSet::new(poll.registry(), 4).unwrap();
        let listener = listener();
        let (stream, _client) = connected_pair(&listener);

        pollset.register(stream).unwrap();

        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|event| event.token() == WAKE_TOKEN));
    }
}
