use std::path::PathBuf;

/// Settings for the authentication server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub accounts_path: PathBuf,
    /// Heartbeats per second. Deferred saves flush on the heartbeat.
    pub tick_rate: u32,
    pub log_connections: bool,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            accounts_path: PathBuf::from("accounts.dat"),
            tick_rate: 30,
            log_connections: false,
        }
    }
}
