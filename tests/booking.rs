//! End-to-end tests: a real server on an ephemeral port, driven by the
//! blocking client over TCP.

use std::{
    io::{Read, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream},
    sync::{Arc, Barrier},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use seat_booking::{
    client::{Client, ClientError},
    config::Config,
    handler::{BookError, CancelBookingError, LoginError, LogoutError, QueryError},
    protocol::{
        message::{Action, ConfirmMode, Request, STATUS_INVALID_ACTION},
        MAX_FIELD_LEN,
    },
    server::{Server, ShutdownHandle},
    store::{SharedState, NUM_SEATS},
};

struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start(workers: usize, clients_per_worker: usize) -> Self {
        let config = Config {
            port: 0,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            workers: Some(workers),
            clients_per_worker,
            ..Config::default()
        };

        let server = Server::bind(&config, Arc::new(SharedState::default())).unwrap();
        assert_eq!(server.loads(), vec![1; workers]);

        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || server.run().unwrap());

        Self {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    fn client(&self) -> Client {
        Client::connect(self.addr).unwrap()
    }

    fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn eventually(mut attempt: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !attempt() {
        assert!(Instant::now() < deadline, "gave up waiting");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn two_users_share_a_seat() {
    let server = TestServer::start(2, 8);
    let mut alice = server.client();
    let mut bob = server.client();

    alice.login("alice", "pw1").unwrap();
    alice.book(5).unwrap();

    bob.login("bob", "pw2").unwrap();
    assert!(matches!(
        bob.book(5),
        Err(ClientError::Book(BookError::SeatUnavailable))
    ));

    alice.cancel_booking(5).unwrap();
    bob.book(5).unwrap();

    let record = alice.query(5).unwrap();
    assert_eq!(record.id, 5);
    assert!(record.booked);
    assert_eq!(record.times_booked, 2);
    assert_eq!(record.times_canceled, 1);

    assert_eq!(bob.confirm_booking(ConfirmMode::Booked).unwrap(), [5]);
    assert!(alice
        .confirm_booking(ConfirmMode::Booked)
        .unwrap()
        .is_empty());
    let available = alice.confirm_booking(ConfirmMode::Available).unwrap();
    assert_eq!(available.len(), NUM_SEATS - 1);
    assert!(!available.contains(&5));

    alice.terminate().unwrap();
    bob.terminate().unwrap();
}

#[test]
fn requests_need_a_login() {
    let server = TestServer::start(1, 4);
    let mut client = server.client();

    assert!(matches!(
        client.book(1),
        Err(ClientError::Book(BookError::NotLoggedIn))
    ));
    assert!(matches!(
        client.cancel_booking(1),
        Err(ClientError::CancelBooking(CancelBookingError::NotLoggedIn))
    ));
    assert!(matches!(
        client.logout(),
        Err(ClientError::Logout(LogoutError::NotFound))
    ));

    // query is open to everyone
    assert!(!client.query(1).unwrap().booked);
    assert!(matches!(
        client.query(NUM_SEATS as u32 + 1),
        Err(ClientError::Query(QueryError::SeatOutOfRange))
    ));
}

#[test]
fn one_session_per_user() {
    let server = TestServer::start(2, 4);
    let mut first = server.client();
    let mut second = server.client();

    first.login("carol", "secret").unwrap();
    assert!(matches!(
        second.login("carol", "secret"),
        Err(ClientError::Login(LoginError::ActiveUser))
    ));

    first.logout().unwrap();
    assert!(matches!(
        second.login("carol", "wrong"),
        Err(ClientError::Login(LoginError::IncorrectPassword))
    ));
    second.login("carol", "secret").unwrap();
    assert_eq!(second.active_user(), Some(&b"carol"[..]));
}

#[test]
fn concurrent_bookings_of_one_seat() {
    const CLIENTS: usize = 8;

    let server = TestServer::start(3, 8);
    let barrier = Arc::new(Barrier::new(CLIENTS));

    let racers: Vec<_> = (0..CLIENTS)
        .map(|idx| {
            let mut client = server.client();
            let barrier = barrier.clone();
            thread::spawn(move || {
                client.login(format!("racer{idx}"), "pw").unwrap();
                barrier.wait();
                client.book(42)
            })
        })
        .collect();

    let results: Vec<_> = racers
        .into_iter()
        .map(|racer| racer.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().all(|result| matches!(
        result,
        Ok(()) | Err(ClientError::Book(BookError::SeatUnavailable))
    )));

    let record = server.client().query(42).unwrap();
    assert!(record.booked);
    assert_eq!(record.times_booked, 1);
}

#[test]
fn disconnect_logs_the_user_out() {
    let server = TestServer::start(1, 4);

    let mut gone = server.client();
    gone.login("dave", "pw").unwrap();
    gone.book(9).unwrap();
    drop(gone);

    let mut back = server.client();
    eventually(|| match back.login("dave", "pw") {
        Ok(()) => true,
        Err(ClientError::Login(LoginError::ActiveUser)) => false,
        Err(err) => panic!("unexpected: {err}"),
    });

    // bookings outlive the session
    assert_eq!(back.confirm_booking(ConfirmMode::Booked).unwrap(), [9]);
}

#[test]
fn idle_server_serves_a_late_client() {
    let server = TestServer::start(2, 4);

    // every worker is parked in its readiness wait by now
    thread::sleep(Duration::from_millis(200));

    let mut late = server.client();
    late.login("gail", "pw").unwrap();
    assert!(!late.query(3).unwrap().booked);
}

#[test]
fn oversized_request_drops_the_connection() {
    let server = TestServer::start(1, 4);

    let mut raw = TcpStream::connect(server.addr).unwrap();
    raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    raw.write_all(&1i32.to_le_bytes()).unwrap();
    raw.write_all(&(MAX_FIELD_LEN + 1).to_le_bytes()).unwrap();
    raw.write_all(&0u64.to_le_bytes()).unwrap();

    let mut buf = [0u8; 16];
    match raw.read(&mut buf) {
        Ok(0) => {}
        Err(err) if err.kind() == std::io::ErrorKind::ConnectionReset => {}
        other => panic!("expected the connection to close, got {other:?}"),
    }

    // the server keeps serving everyone else
    assert!(server.client().query(1).is_ok());
}

#[test]
fn unknown_actions_are_rejected() {
    let server = TestServer::start(1, 4);
    let mut client = server.client();

    for action in [Action::Unknown(42), Action::Termination] {
        let response = client.call(&Request::new(action, "", "")).unwrap();
        assert_eq!(response.status, STATUS_INVALID_ACTION);
        assert!(response.payload.is_empty());
    }

    // the connection is still usable afterwards
    client.login("erin", "pw").unwrap();
}

#[test]
fn full_workers_refuse_connections() {
    // two workers, each with room for two clients
    let server = TestServer::start(2, 3);

    let mut clients: Vec<Client> = (0..4).map(|_| server.client()).collect();
    for client in &mut clients {
        client.query(1).unwrap();
    }

    let mut refused = server.client();
    assert!(refused.query(1).is_err());

    // a freed slot is handed out again
    clients.pop();
    let mut late = server.client();
    eventually(|| match late.query(1) {
        Ok(_) => true,
        Err(_) => {
            late = server.client();
            false
        }
    });
}

#[test]
fn shutdown_closes_open_connections() {
    let mut server = TestServer::start(2, 4);
    let mut client = server.client();
    client.login("frank", "pw").unwrap();

    server.stop();

    assert!(client.query(1).is_err());
    assert!(TcpStream::connect(server.addr).is_err());
}
