//! Filesystem and environment conventions for the `hookbridge` binary
//! (§6): home directory, PID file, and the environment variables the
//! `start` command reads at boot.

use std::path::PathBuf;

/// `~/.hookbridge`, overridable via `HOOKBRIDGE_HOME`.
pub fn hookbridge_home() -> PathBuf {
    hookbridge_logging::hookbridge_home()
}

pub fn ensure_hookbridge_home() -> std::io::Result<PathBuf> {
    let home = hookbridge_home();
    std::fs::create_dir_all(&home)?;
    Ok(home)
}

/// `~/.hookbridge/hookbridge.pid`, written by `start` and read by
/// `stop`/`status` to locate the running process.
pub fn pid_file_path() -> PathBuf {
    hookbridge_home().join("hookbridge.pid")
}

pub const DEFAULT_HTTP_PORT: u16 = 8787;

pub fn http_port() -> u16 {
    std::env::var("BRIDGE_HTTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_HTTP_PORT)
}

pub fn http_host() -> String {
    std::env::var("BRIDGE_HTTP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

pub fn admin_base_url(port: Option<u16>) -> String {
    let port = port.unwrap_or_else(http_port);
    format!("http://{}:{}", http_host(), port)
}
