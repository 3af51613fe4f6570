use clap::Parser;
use log::{error, info};
use session::{Clock, Session, SessionConfig, SessionState, StaticDirectory, UdpTransport};
use shared::{AuthStatus, NetworkServer, ServerType};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Authentication server address
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    #[arg(short = 'u', long)]
    username: String,

    #[arg(short = 'p', long)]
    password: String,

    /// Seconds to wait for each login step [default: the session's request timeout]
    #[arg(short = 't', long)]
    timeout: Option<f64>,

    /// Heartbeats per second
    #[arg(short = 'r', long, default_value = "30")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Authenticating against: {}", args.server);

    let transport = UdpTransport::bind("0.0.0.0:0")?;
    let directory = StaticDirectory::new(vec![NetworkServer::new(
        "auth",
        ServerType::Authentication,
        args.server.as_str(),
        "",
    )]);
    let mut config = SessionConfig::default();
    if let Some(timeout) = args.timeout {
        config.request_timeout = timeout;
    }
    let clock = Clock::new();
    let mut session = Session::new(
        Box::new(transport),
        Box::new(directory),
        clock.clone(),
        config,
    );

    let result: Rc<Cell<Option<AuthStatus>>> = Rc::new(Cell::new(None));
    let sink = Rc::clone(&result);
    let started = session.login(
        &args.username,
        &args.password,
        session.config().request_timeout,
        Box::new(move |_: &mut Session, status: AuthStatus| sink.set(Some(status))),
    );
    if !started {
        return Err("login could not be started".into());
    }

    let step = 1.0 / f64::from(args.tick_rate.max(1));
    let mut heartbeat = interval(Duration::from_secs_f64(step));
    let status = loop {
        heartbeat.tick().await;
        clock.advance(step);
        session.tick();
        if let Some(status) = result.get() {
            break status;
        }
    };

    match status {
        AuthStatus::Good => {
            info!("Logged in as {}", session.user());
            if session.state() == SessionState::LoggedIn {
                session.log_out();
            }
            Ok(())
        }
        other => {
            error!("Login failed: {}", other.describe());
            Err(other.describe().into())
        }
    }
}
