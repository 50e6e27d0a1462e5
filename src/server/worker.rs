use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use mio::{Events, Poll, Token};

use super::{
    connection::{Connection, ConnectionErr},
    pollset::{PollSet, WAKE_TOKEN},
};
use crate::store::SharedState;

/// The acceptor's view of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub index: usize,
    pub pollset: Arc<PollSet>,
    pub thread: JoinHandle<()>,
}

pub struct Worker {
    index: usize,
    poll: Poll,
    events: Events,
    pollset: Arc<PollSet>,
    state: Arc<SharedState>,
    shutdown: Arc<AtomicBool>,
    connections: HashMap<Token, Connection>,
}

impl Worker {
    /// Starts a worker thread that serves up to `capacity - 1` connections.
    pub fn spawn(
        index: usize,
        capacity: usize,
        state: Arc<SharedState>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<WorkerHandle> {
        let worker = Worker::new(index, capacity, state, shutdown)?;
        let pollset = worker.pollset.clone();

        let thread = std::thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || worker.run())?;

        Ok(WorkerHandle {
            index,
            pollset,
            thread,
        })
    }

    fn new(
        index: usize,
        capacity: usize,
        state: Arc<SharedState>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let poll = Poll::new()?;
        let pollset = Arc::new(PollSet::new(poll.registry(), capacity)?);

        Ok(Worker {
            index,
            poll,
            events: Events::with_capacity(capacity),
            pollset,
            state,
            shutdown,
            connections: HashMap::with_capacity(capacity),
        })
    }

    fn run(mut self) {
        tracing::debug!(worker = self.index, "worker started");

        while !self.shutdown.load(Ordering::Acquire) {
            self.adopt_pending();

            if let Err(err) = self.poll.poll(&mut self.events, None) {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(worker = self.index, "waiting for readiness failed: {}", err);
                break;
            }

            let ready: Vec<Token> = self
                .events
                .iter()
                .map(|event| event.token())
                .filter(|token| *token != WAKE_TOKEN)
                .collect();

            for token in ready {
                self.serve(token);
            }
        }

        // nothing may be placed here anymore; our open connections close as
        // they are dropped
        self.pollset.lock().close();
        tracing::debug!(
            worker = self.index,
            open = self.connections.len(),
            "worker stopped"
        );
    }

    /// Takes over the connections registered since the last wait.
    fn adopt_pending(&mut self) {
        let pending = self.pollset.lock().take_pending();

        for (token, stream) in pending {
            let result = Connection::new(stream, self.state.clone()).and_then(|mut connection| {
                connection.register(self.poll.registry(), token)?;
                Ok(connection)
            });

            match result {
                Ok(connection) => {
                    tracing::debug!(
                        worker = self.index,
                        token = token.0,
                        peer = %connection.peer(),
                        session = %connection.session(),
                        "adopted connection"
                    );
                    self.connections.insert(token, connection);
                }
                Err(err) => {
                    tracing::warn!(
                        worker = self.index,
                        token = token.0,
                        "dropping connection: {}",
                        err
                    );
                    self.pollset.lock().remove(token);
                }
            }
        }
    }

    fn serve(&mut self, token: Token) {
        let Some(connection) = self.connections.get_mut(&token) else {
            return;
        };

        match connection.on_ready(self.poll.registry(), token) {
            Ok(()) => {}
            Err(ConnectionErr::Closed) => self.close(token),
            Err(err) => {
                tracing::warn!(
                    worker = self.index,
                    token = token.0,
                    "closing connection: {}",
                    err
                );
                self.close(token);
            }
        }
    }

    fn close(&mut self, token: Token) {
        // the slot is freed under the lock, so the acceptor never sees a
        // half-removed entry
        let mut slots = self.pollset.lock();
        slots.remove(token);
        if let Some(mut connection) = self.connections.remove(&token) {
            if let Err(err) = connection.deregister(self.poll.registry()) {
                tracing::debug!(
                    worker = self.index,
                    token = token.0,
                    "failed to deregister: {}",
                    err
                );
            }
            tracing::debug!(
                worker = self.index,
                token = token.0,
                peer = %connection.peer(),
                "connection closed"
            );
        }
    }
}
