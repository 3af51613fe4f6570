//! Text command console for operating the authentication server.

use crate::auth::AuthServer;
use log::info;

const HELP: &[&str] = &[
    "clear                        clear the console",
    "help                         list commands",
    "isonline                     report whether the server is listening",
    "create <user> <pass>         create an account",
    "delete <user> <pass>         delete an account",
    "authenticate <user> <pass>   check credentials",
    "save                         write accounts to disk",
    "load                         read accounts from disk",
    "logconnections <on|off>      toggle connection logging",
    "start                        start listening",
    "stop [true|false]            stop listening and exit, optionally saving",
];

/// What the hosting loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFlow {
    Continue,
    Clear,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleResponse {
    pub lines: Vec<String>,
    pub flow: ConsoleFlow,
}

impl ConsoleResponse {
    fn lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            flow: ConsoleFlow::Continue,
        }
    }

    fn line(line: impl Into<String>) -> Self {
        Self::lines(vec![line.into()])
    }

    fn silent() -> Self {
        Self::lines(Vec::new())
    }
}

/// Splits a raw console line and dispatches it.
pub fn process_line(server: &mut AuthServer, line: &str) -> ConsoleResponse {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    process(server, &tokens, &lowered)
}

/// Dispatches on the first token. `lowered` holds the same tokens in lower
/// case; credentials are taken from `tokens` unchanged. Unknown commands
/// produce no output.
pub fn process(server: &mut AuthServer, tokens: &[&str], lowered: &[String]) -> ConsoleResponse {
    let Some(command) = lowered.first() else {
        return ConsoleResponse::silent();
    };

    let response = match command.as_str() {
        "clear" => ConsoleResponse {
            lines: Vec::new(),
            flow: ConsoleFlow::Clear,
        },
        "help" => ConsoleResponse::lines(HELP.iter().map(|l| l.to_string()).collect()),
        "isonline" => ConsoleResponse::line(if server.is_listening() {
            "Server is online"
        } else {
            "Server is offline"
        }),
        "create" | "delete" | "authenticate" => account_command(server, command, tokens),
        "save" => ConsoleResponse::line(if server.save() {
            format!("Saved {} accounts", server.accounts().len())
        } else {
            "Save failed".to_string()
        }),
        "load" => ConsoleResponse::line(if server.load() {
            format!("Loaded {} accounts", server.accounts().len())
        } else {
            "Load failed; account store is empty".to_string()
        }),
        "logconnections" => match lowered.get(1).map(String::as_str) {
            Some("on") | Some("true") => {
                server.set_log_connections(true);
                ConsoleResponse::line("Connection logging on")
            }
            Some("off") | Some("false") => {
                server.set_log_connections(false);
                ConsoleResponse::line("Connection logging off")
            }
            _ => ConsoleResponse::line("Usage: logconnections <on|off>"),
        },
        "start" => ConsoleResponse::line(if server.start() {
            "Server started"
        } else {
            "Server is already online"
        }),
        "stop" => {
            let save = matches!(lowered.get(1).map(String::as_str), Some("true"));
            server.stop(save);
            ConsoleResponse {
                lines: vec!["Server stopped".to_string()],
                flow: ConsoleFlow::Exit,
            }
        }
        _ => ConsoleResponse::silent(),
    };

    for line in &response.lines {
        info!("{}", line);
    }
    response
}

fn account_command(server: &mut AuthServer, command: &str, tokens: &[&str]) -> ConsoleResponse {
    let (Some(username), Some(password)) = (tokens.get(1), tokens.get(2)) else {
        return ConsoleResponse::line(format!("Usage: {} <user> <pass>", command));
    };

    let status = match command {
        "create" => server.create_account(username, password),
        "delete" => server.delete_account(username, password),
        _ => server.authenticate(username, password),
    };
    ConsoleResponse::line(format!("{} {}: {}", command, username, status.describe()))
}
