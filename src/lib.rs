//! A concurrent seat-booking server.
//!
//! Clients speak a fixed-layout binary protocol ([`protocol`]) over TCP. The
//! [`server`] accepts connections on one thread and spreads them over a pool of
//! worker threads, each multiplexing its own connections. Workers run requests
//! through [`handler`] against the shared [`store`].

pub mod client;
pub mod config;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod store;
