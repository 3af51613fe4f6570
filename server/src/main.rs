use clap::Parser;
use log::{error, info};
use server::{AuthServer, Server, ServerConfig, ServerMessage};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Parses command-line arguments, loads the account file, then runs the
/// network loop alongside a console reader on stdin.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "30")]
        tick_rate: u32,
        /// Account file
        #[clap(short, long, default_value = "accounts.dat")]
        accounts: PathBuf,
        /// Log every authentication request
        #[clap(short, long)]
        log_connections: bool,
    }

    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        accounts_path: args.accounts,
        tick_rate: args.tick_rate,
        log_connections: args.log_connections,
    };

    let mut auth = AuthServer::new(&config);
    auth.load();
    auth.start();

    let mut server = Server::new(&config, auth).await?;
    spawn_console_reader(server.sender());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}

/// Forwards stdin lines to the server loop until stdin closes.
fn spawn_console_reader(tx: mpsc::UnboundedSender<ServerMessage>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(ServerMessage::ConsoleLine(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    });
}
