use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{builder::RangedU64ValueParser, Parser};

pub const DEFAULT_PORT: u16 = 3600;
pub const DEFAULT_CLIENTS_PER_WORKER: usize = 128;

/// Seat booking server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "seat-booking-server")]
#[command(about = "Concurrent seat booking server")]
#[command(version)]
pub struct Config {
    /// Port to listen on
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Number of worker threads (defaults to one per available core)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Connections each worker multiplexes, counting its reserved wakeup slot
    #[arg(
        long,
        default_value_t = DEFAULT_CLIENTS_PER_WORKER,
        value_parser = RangedU64ValueParser::<usize>::new().range(2..)
    )]
    pub clients_per_worker: usize,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(workers) => workers.max(1),
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            workers: None,
            clients_per_worker: DEFAULT_CLIENTS_PER_WORKER,
            log_level: "info".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Config;

    #[test]
    fn defaults_match_the_parser() {
        let parsed = Config::try_parse_from(["seat-booking-server"]).unwrap();
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.addr().to_string(), "0.0.0.0:3600");
    }

    #[test]
    fn parse_arguments() {
        let parsed = Config::try_parse_from([
            "seat-booking-server",
            "4000",
            "--host",
            "127.0.0.1",
            "--workers",
            "3",
            "--clients-per-worker",
            "2",
        ])
        .unwrap();

        assert_eq!(parsed.addr().to_string(), "127.0.0.1:4000");
        assert_eq!(parsed.worker_count(), 3);
        assert_eq!(parsed.clients_per_worker, 2);
    }

    #[test]
    fn reject_pollsets_without_room_for_a_client() {
        let parsed = Config::try_parse_from(["seat-booking-server", "--clients-per-worker", "1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn worker_count_is_never_zero() {
        let config = Config {
            workers: Some(0),
            ..Config::default()
        };
        assert_eq!(config.worker_count(), 1);
        assert!(Config::default().worker_count() >= 1);
    }
}
