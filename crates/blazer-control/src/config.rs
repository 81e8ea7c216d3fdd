use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";

pub fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub listen_addr: SocketAddr,
    /// Reject every mutating request with `read_only`.
    pub read_only: bool,
    /// Also write the manager's own log to a daily file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl ControlSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("BLAZER_LISTEN_ADDR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = raw
            .parse::<SocketAddr>()
            .with_context(|| format!("BLAZER_LISTEN_ADDR is not a socket address: {raw}"))?;

        Ok(Self {
            listen_addr,
            read_only: env_flag("BLAZER_READ_ONLY"),
            log_dir: std::env::var_os("BLAZER_LOG_DIR")
                .map(PathBuf::from)
                .filter(|p| !p.as_os_str().is_empty()),
        })
    }
}
