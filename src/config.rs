use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
/// Upper bound on per-session buffering; larger settings are clamped.
pub const MAX_MAILBOX_CAPACITY: usize = 65_536;
pub const DEFAULT_MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory served at `/` when set. Unset means no static assets.
    pub static_dir: Option<PathBuf>,
    /// Outbound frames buffered per session before new frames are dropped.
    pub mailbox_capacity: usize,
    pub max_username_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: None,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let static_dir = std::env::var("RELAY_STATIC_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            static_dir,
            mailbox_capacity: positive_from_env("RELAY_MAILBOX_CAPACITY")
                .map(|c| c.min(MAX_MAILBOX_CAPACITY))
                .unwrap_or(DEFAULT_MAILBOX_CAPACITY),
            max_username_len: positive_from_env("RELAY_MAX_USERNAME_LEN")
                .unwrap_or(DEFAULT_MAX_USERNAME_LEN),
        }
    }
}

// A zero capacity would make every mailbox permanently full.
fn positive_from_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
}
