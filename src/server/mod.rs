//! The acceptor and its pool of connection workers.
//!
//! One acceptor thread owns the listening socket. Each accepted connection is
//! placed on the least loaded worker that still has room; a worker multiplexes
//! its connections with a private poller and never blocks on a single client.

pub mod connection;
pub mod pollset;
pub mod worker;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token, Waker,
};

use crate::{config::Config, store::SharedState};

use self::worker::{Worker, WorkerHandle};

const LISTENER: Token = Token(0);
const SHUTDOWN: Token = Token(1);

// how long a deferred accept waits before trying the backlog again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to start worker {index}: {source}")]
    Worker {
        index: usize,
        source: std::io::Error,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Asks a running [`Server`] to stop; cloneable and usable from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Starts the shutdown. Only the first call has any effect.
    pub fn trigger(&self) -> bool {
        if self.flag.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(err) = self.waker.wake() {
            tracing::error!("failed to wake the acceptor: {}", err);
        }
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    poll: Poll,
    events: Events,
    workers: Vec<WorkerHandle>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the listening socket and starts every worker.
    pub fn bind(config: &Config, state: Arc<SharedState>) -> Result<Self, ServerError> {
        let addr = config.addr();
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let shutdown = ShutdownHandle {
            flag: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Waker::new(poll.registry(), SHUTDOWN)?),
        };

        let worker_count = config.worker_count();
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let spawned = Worker::spawn(
                index,
                config.clients_per_worker,
                state.clone(),
                shutdown.flag.clone(),
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    shutdown.trigger();
                    stop_workers(workers);
                    return Err(ServerError::Worker { index, source });
                }
            }
        }

        tracing::info!(
            %local_addr,
            workers = worker_count,
            clients_per_worker = config.clients_per_worker,
            "server bound"
        );

        Ok(Self {
            listener,
            local_addr,
            poll,
            events: Events::with_capacity(128),
            workers,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Occupied slots of every worker, the wakeup slot included.
    pub fn loads(&self) -> Vec<usize> {
        self.workers
            .iter()
            .map(|worker| worker.pollset.len())
            .collect()
    }

    /// Accepts connections until the shutdown handle fires, then joins every worker.
    pub fn run(mut self) -> Result<(), ServerError> {
        let result = self.accept_loop();
        if result.is_err() {
            // still let the workers go
            self.shutdown.trigger();
        }

        tracing::info!("shutting down {} workers", self.workers.len());
        stop_workers(std::mem::take(&mut self.workers));
        tracing::info!("server stopped");
        result
    }

    fn accept_loop(&mut self) -> Result<(), ServerError> {
        let mut deferred = false;
        while !self.shutdown.is_triggered() {
            let timeout = deferred.then_some(ACCEPT_BACKOFF);
            if let Err(err) = self.poll.poll(&mut self.events, timeout) {
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            let listener_ready = self.events.iter().any(|event| event.token() == LISTENER);
            if listener_ready || deferred {
                deferred = self.accept_ready();
            }
        }

        Ok(())
    }

    /// Accepts until the backlog is drained or accepting stops working for now.
    ///
    /// Accept failures never stop the server. Returns `true` when connections
    /// may be left in the backlog, which is then retried after a short backoff.
    fn accept_ready(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    self.place(stream, peer);
                }
                Err(err) => match AcceptStep::after(&err) {
                    AcceptStep::Drained => return false,
                    AcceptStep::Retry => continue,
                    AcceptStep::Defer => {
                        tracing::warn!("failed to accept a connection: {}", err);
                        return true;
                    }
                },
            }
        }
    }

    /// Hands `stream` to the least loaded worker that accepts it.
    ///
    /// Loads are sampled without holding any lock, so a worker may fill up
    /// between sampling and registration; the next candidate is tried then.
    fn place(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut candidates: Vec<(usize, &WorkerHandle)> = self
            .workers
            .iter()
            .map(|worker| (worker.pollset.len(), worker))
            .collect();
        candidates.sort_by_key(|(load, _)| *load);

        for (_, worker) in candidates {
            match worker.pollset.register(stream) {
                Ok(token) => {
                    tracing::debug!(
                        %peer,
                        worker = worker.index,
                        token = token.0,
                        "placed connection"
                    );
                    return;
                }
                Err(err) => {
                    tracing::debug!(%peer, worker = worker.index, "{}", err);
                    stream = err.into_stream();
                }
            }
        }

        tracing::warn!(%peer, "every worker is full or stopped, refusing connection");
    }
}

/// What the acceptor does after `accept` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptStep {
    /// The backlog is empty.
    Drained,
    /// A spurious failure; try the next connection right away.
    Retry,
    /// Out of descriptors or memory; try again after a backoff.
    Defer,
}

impl AcceptStep {
    fn after(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock => Self::Drained,
            // the peer gave up before we got to it
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::ConnectionAborted => Self::Retry,
            _ => Self::Defer,
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown.trigger();
            stop_workers(std::mem::take(&mut self.workers));
        }
    }
}

fn stop_workers(workers: Vec<WorkerHandle>) {
    for worker in &workers {
        worker.pollset.wake();
    }

    for worker in workers {
        if worker.thread.join().is_err() {
            tracing::error!(worker = worker.index, "worker panicked");
        }
    }
}
