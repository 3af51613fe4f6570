//! Integration tests for the session layer and the authentication server
//!
//! These tests wire real `Session`s to the real `AuthServer`, over the
//! in-process network and over UDP.

use server::{AuthServer, ServerConfig};
use session::{
    Clock, Directory, EventKind, MemoryNetwork, MemoryTransport, Session, SessionConfig,
    SessionEvent, SessionState, Transport, TransportEvent,
};
use shared::{AuthStatus, ConnectionStatus, NetworkServer, ServerType};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::{tempdir, TempDir};

const STEP: f64 = 0.25;

/// An `AuthServer` reachable on a `MemoryNetwork`.
struct AuthHarness {
    transport: MemoryTransport,
    server: AuthServer,
    _dir: TempDir,
}

impl AuthHarness {
    fn start(network: &MemoryNetwork, accounts: &[(&str, &str)]) -> Self {
        let dir = tempdir().unwrap();
        let mut server = AuthServer::new(&ServerConfig {
            accounts_path: dir.path().join("accounts.dat"),
            ..ServerConfig::default()
        });
        for (username, password) in accounts {
            assert_eq!(server.create_account(username, password), AuthStatus::Good);
        }
        server.start();

        let mut transport = network.endpoint();
        let address = transport.start_hosting().unwrap();
        network.directory().advertise(&NetworkServer::new(
            "auth",
            ServerType::Authentication,
            address,
            "",
        ));

        Self {
            transport,
            server,
            _dir: dir,
        }
    }

    fn tick(&mut self) {
        for event in self.transport.poll() {
            if let TransportEvent::Received { handle, packet } = event {
                if let Some(reply) = self.server.handle_packet(handle, &packet) {
                    self.transport.send(handle, &reply);
                }
            }
        }
        self.server.end_tick();
    }
}

fn new_session(network: &MemoryNetwork, clock: &Clock) -> Session {
    Session::new(
        Box::new(network.endpoint()),
        Box::new(network.directory()),
        clock.clone(),
        SessionConfig::default(),
    )
}

fn pump(
    clock: &Clock,
    sessions: &mut [&mut Session],
    auth: &mut AuthHarness,
    steps: usize,
) {
    for _ in 0..steps {
        clock.advance(STEP);
        for session in sessions.iter_mut() {
            session.tick();
        }
        auth.tick();
    }
}

type LoginResults = Rc<RefCell<Vec<AuthStatus>>>;

fn start_login(session: &mut Session, username: &str, password: &str) -> LoginResults {
    let results: LoginResults = Rc::default();
    let sink = Rc::clone(&results);
    assert!(session.login(
        username,
        password,
        5.0,
        Box::new(move |_: &mut Session, status: AuthStatus| sink.borrow_mut().push(status)),
    ));
    results
}

fn logged_in(
    network: &MemoryNetwork,
    clock: &Clock,
    auth: &mut AuthHarness,
    username: &str,
) -> Session {
    let mut session = new_session(network, clock);
    let results = start_login(&mut session, username, "pw");
    pump(clock, &mut [&mut session], auth, 12);
    assert_eq!(*results.borrow(), vec![AuthStatus::Good]);
    session
}

/// LOGIN FLOW TESTS
mod login_tests {
    use super::*;

    #[test]
    fn login_against_auth_server() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("alice", "secret")]);
        let mut session = new_session(&network, &clock);

        let results = start_login(&mut session, "alice", "secret");
        pump(&clock, &mut [&mut session], &mut auth, 12);

        assert_eq!(*results.borrow(), vec![AuthStatus::Good]);
        assert_eq!(session.state(), SessionState::LoggedIn);
        assert_eq!(session.user().username, "alice");
        assert!(session.pending_requests().is_empty());
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn rejected_credentials() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("alice", "secret")]);
        let mut wrong_password = new_session(&network, &clock);
        let mut unknown_user = new_session(&network, &clock);

        let bad_password = start_login(&mut wrong_password, "alice", "guess");
        let bad_user = start_login(&mut unknown_user, "mallory", "secret");
        pump(
            &clock,
            &mut [&mut wrong_password, &mut unknown_user],
            &mut auth,
            12,
        );

        assert_eq!(*bad_password.borrow(), vec![AuthStatus::InvalidPassword]);
        assert_eq!(*bad_user.borrow(), vec![AuthStatus::InvalidUsername]);
        assert_eq!(wrong_password.state(), SessionState::Offline);
        assert_eq!(unknown_user.state(), SessionState::Offline);
    }

    #[test]
    fn no_auth_server_reports_error() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut session = new_session(&network, &clock);

        let results = start_login(&mut session, "alice", "secret");
        for _ in 0..8 {
            clock.advance(STEP);
            session.tick();
        }

        assert_eq!(*results.borrow(), vec![AuthStatus::Error]);
        assert_eq!(session.state(), SessionState::Offline);
        assert!(session.pending_requests().is_empty());
    }

    #[test]
    fn stopped_server_times_out() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("alice", "secret")]);
        auth.server.stop(false);
        let mut session = new_session(&network, &clock);

        let results = start_login(&mut session, "alice", "secret");
        pump(&clock, &mut [&mut session], &mut auth, 40);

        assert_eq!(*results.borrow(), vec![AuthStatus::Error]);
        assert_eq!(session.state(), SessionState::Offline);
        assert!(session.pending_requests().is_empty());
    }

    #[test]
    fn only_one_login_at_a_time() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("alice", "secret")]);
        let mut session = new_session(&network, &clock);

        let results = start_login(&mut session, "alice", "secret");
        assert!(!session.login(
            "alice",
            "secret",
            5.0,
            Box::new(|_: &mut Session, _: AuthStatus| panic!("second login ran")),
        ));
        pump(&clock, &mut [&mut session], &mut auth, 12);

        assert_eq!(*results.borrow(), vec![AuthStatus::Good]);
        assert!(!session.login(
            "alice",
            "secret",
            5.0,
            Box::new(|_: &mut Session, _: AuthStatus| panic!("login while logged in ran")),
        ));
    }

    #[test]
    fn log_out_and_back_in() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("alice", "pw")]);
        let mut session = logged_in(&network, &clock, &mut auth, "alice");

        assert!(session.log_out());
        assert_eq!(session.state(), SessionState::Offline);

        let results = start_login(&mut session, "alice", "pw");
        pump(&clock, &mut [&mut session], &mut auth, 12);
        assert_eq!(*results.borrow(), vec![AuthStatus::Good]);
    }
}

/// LOBBY TESTS
mod lobby_tests {
    use super::*;

    fn join(
        clock: &Clock,
        host: &mut Session,
        client: &mut Session,
        auth: &mut AuthHarness,
    ) -> Rc<RefCell<Vec<ConnectionStatus>>> {
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&results);
        let server = host.current_server().clone();
        assert!(client.join_server(
            &server,
            5.0,
            Box::new(move |_: &mut Session, status: ConnectionStatus| {
                sink.borrow_mut().push(status)
            }),
        ));
        pump(clock, &mut [host, client], auth, 4);
        results
    }

    #[test]
    fn browse_join_and_fill_a_server() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("host", "pw"), ("bob", "pw"), ("carol", "pw")]);
        let mut host = logged_in(&network, &clock, &mut auth, "host");
        let mut bob = logged_in(&network, &clock, &mut auth, "bob");
        let mut carol = logged_in(&network, &clock, &mut auth, "carol");
        assert!(host.create_game_server("arena", 2));

        let found = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&found);
        bob.find_game_servers(
            5.0,
            Box::new(move |_: &mut Session, servers: Vec<NetworkServer>| {
                *sink.borrow_mut() = servers
            }),
        );
        pump(&clock, &mut [&mut host, &mut bob], &mut auth, 6);
        assert_eq!(found.borrow().len(), 1);
        assert_eq!(found.borrow()[0].server_name, "arena");

        let joined = join(&clock, &mut host, &mut bob, &mut auth);
        assert_eq!(*joined.borrow(), vec![ConnectionStatus::Good]);
        assert_eq!(bob.state(), SessionState::InLobby);
        assert_eq!(host.roster().map(|roster| roster.len()), Some(2));

        let rejected = join(&clock, &mut host, &mut carol, &mut auth);
        assert_eq!(*rejected.borrow(), vec![ConnectionStatus::Full]);
        assert_eq!(carol.state(), SessionState::LoggedIn);
    }

    #[test]
    fn kicked_player_returns_to_logged_in() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("host", "pw"), ("bob", "pw")]);
        let mut host = logged_in(&network, &clock, &mut auth, "host");
        let mut bob = logged_in(&network, &clock, &mut auth, "bob");
        assert!(host.create_game_server("arena", 4));
        join(&clock, &mut host, &mut bob, &mut auth);

        let kicks = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&kicks);
        bob.subscribe(
            EventKind::Kicked,
            Box::new(move |event: &SessionEvent| sink.borrow_mut().push(event.clone())),
        );

        assert!(host.kick_player("bob", "afk"));
        pump(&clock, &mut [&mut host, &mut bob], &mut auth, 4);

        assert_eq!(
            *kicks.borrow(),
            vec![SessionEvent::Kicked {
                reason: "afk".to_string()
            }]
        );
        assert_eq!(bob.state(), SessionState::LoggedIn);
        assert_eq!(host.roster().map(|roster| roster.len()), Some(1));
    }
}

/// CONSOLE TESTS
mod console_tests {
    use super::*;
    use server::{process_line, ConsoleFlow};

    #[test]
    fn console_created_account_can_log_in() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[]);
        let mut session = new_session(&network, &clock);

        let response = process_line(&mut auth.server, "create dana hunter2");
        assert_eq!(response.flow, ConsoleFlow::Continue);

        let results = start_login(&mut session, "dana", "hunter2");
        pump(&clock, &mut [&mut session], &mut auth, 12);
        assert_eq!(*results.borrow(), vec![AuthStatus::Good]);
    }

    #[test]
    fn console_stop_takes_server_offline() {
        let network = MemoryNetwork::new();
        let clock = Clock::new();
        let mut auth = AuthHarness::start(&network, &[("dana", "pw")]);

        let response = process_line(&mut auth.server, "stop");
        assert_eq!(response.flow, ConsoleFlow::Exit);
        assert_eq!(
            process_line(&mut auth.server, "isonline").lines,
            vec!["Server is offline"]
        );

        let mut session = new_session(&network, &clock);
        let results = start_login(&mut session, "dana", "pw");
        pump(&clock, &mut [&mut session], &mut auth, 40);
        assert_eq!(*results.borrow(), vec![AuthStatus::Error]);
    }
}

/// UDP NETWORK TESTS
mod network_tests {
    use super::*;
    use server::{Server, ServerMessage};
    use session::{StaticDirectory, UdpTransport};
    use std::time::Duration;
    use tokio::time::sleep;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn session_logs_in_over_udp() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            accounts_path: dir.path().join("accounts.dat"),
            ..ServerConfig::default()
        };
        let mut auth = AuthServer::new(&config);
        auth.create_account("alice", "secret");
        auth.start();

        let mut server = assert_ok!(Server::new(&config, auth).await);
        let addr = server.local_addr().unwrap();
        let control = server.sender();
        let server_task = tokio::spawn(async move { server.run().await.is_ok() });

        let directory = StaticDirectory::new(vec![NetworkServer::new(
            "auth",
            ServerType::Authentication,
            addr.to_string(),
            "",
        )]);
        let clock = Clock::new();
        let mut session = Session::new(
            Box::new(UdpTransport::bind("127.0.0.1:0").unwrap()),
            Box::new(directory),
            clock.clone(),
            SessionConfig::default(),
        );
        let results = start_login(&mut session, "alice", "secret");

        for _ in 0..200 {
            if !results.borrow().is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
            clock.advance(0.1);
            session.tick();
        }

        assert_eq!(*results.borrow(), vec![AuthStatus::Good]);
        assert_eq!(session.state(), SessionState::LoggedIn);
        assert_eq!(session.user().session_guid.len(), 32);

        control.send(ServerMessage::Shutdown).unwrap();
        assert!(server_task.await.unwrap());
    }
}
