//! Server settings from the environment.

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_GAMES_DIR: &str = "games";
pub const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the WebSocket listener binds (`SERVER_ADDR`)
    pub addr: SocketAddr,
    /// Directory holding saved matches (`SAFFOLD_GAMES_DIR`)
    pub games_dir: PathBuf,
    /// How long a dropped seat may stay away (`SAFFOLD_DISCONNECT_TIMEOUT_SECS`)
    pub disconnect_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let addr = lookup("SERVER_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.into())
            .parse()
            .context("SERVER_ADDR is not a socket address")?;

        let games_dir = lookup("SAFFOLD_GAMES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_GAMES_DIR));

        let secs = match lookup("SAFFOLD_DISCONNECT_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .context("SAFFOLD_DISCONNECT_TIMEOUT_SECS must be a whole number of seconds")?,
            None => DEFAULT_DISCONNECT_TIMEOUT_SECS,
        };

        Ok(Self {
            addr,
            games_dir,
            disconnect_timeout: Duration::from_secs(secs),
        })
    }
}
