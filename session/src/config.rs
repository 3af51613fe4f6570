/// Tunables for a `Session`. Times are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Timeout for login, join and discovery calls given zero or less.
    pub request_timeout: f64,
    /// Delay between asking the directory for servers and harvesting results.
    pub poll_interval: f64,
    /// How often a hosted game server is re-advertised.
    pub advertise_interval: f64,
    /// Roster size for `create_game_server` calls given zero.
    pub default_max_users: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: 10.0,
            poll_interval: 1.0,
            advertise_interval: 5.0,
            default_max_users: 8,
        }
    }
}
