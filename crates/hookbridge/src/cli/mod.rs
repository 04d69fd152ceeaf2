//! CLI surface (§6): `start`, `stop`, `status`, and the administrative
//! verbs that reach a running instance over its own HTTP API.

pub mod config;
pub mod error;

use clap::{Parser, Subcommand};
use error::CliError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "hookbridge", about = "Hook Dispatch & Orchestration Core")]
pub struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the service in the foreground
    Start {
        /// HTTP port to bind (overrides BRIDGE_HTTP_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Stop a running instance
    Stop,

    /// Report whether an instance is running and its health snapshot
    Status,

    /// Register a worker against a running instance
    RegisterWorker {
        /// Path to a JSON worker registration spec
        spec: PathBuf,
    },

    /// Unregister a worker from a running instance
    UnregisterWorker {
        /// Worker name
        name: String,
    },

    /// Evict cache entries matching a pattern
    InvalidateCache {
        /// Glob-style key pattern
        pattern: String,
    },

    /// Reset a worker's circuit breaker to closed
    CircuitReset {
        /// Worker name
        worker: String,
    },
}

fn admin_token() -> Result<String, CliError> {
    let verifier = hookbridge_security::TokenVerifier::from_env()
        .map_err(|e| CliError::Auth(e.to_string()))?;
    verifier
        .issue_token("hookbridge-cli", vec!["*".to_string()], Duration::from_secs(60))
        .map_err(|e| CliError::Auth(e.to_string()))
}

fn admin_client() -> Result<(reqwest::Client, String, String), CliError> {
    let token = admin_token()?;
    Ok((reqwest::Client::new(), config::admin_base_url(None), token))
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Start { port } => crate::server::run(port).await.map_err(CliError::from),
        Commands::Stop => stop().await,
        Commands::Status => status().await,
        Commands::RegisterWorker { spec } => register_worker(spec).await,
        Commands::UnregisterWorker { name } => unregister_worker(name).await,
        Commands::InvalidateCache { pattern } => invalidate_cache(pattern).await,
        Commands::CircuitReset { worker } => circuit_reset(worker).await,
    }
}

async fn stop() -> Result<(), CliError> {
    let pid_file = config::pid_file_path();
    let contents = std::fs::read_to_string(&pid_file)
        .map_err(|e| CliError::Registry(format!("no running instance found ({e})")))?;
    let pid: i32 = contents
        .trim()
        .parse()
        .map_err(|_| CliError::Registry("pid file is corrupt".to_string()))?;

    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            return Err(CliError::Registry(format!("failed to signal pid {pid}")));
        }
        println!("Sent SIGTERM to hookbridge (pid {pid})");
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(CliError::Other(anyhow::anyhow!(
            "stop is only implemented for unix targets in this build; terminate the process manually"
        )))
    }
}

async fn status() -> Result<(), CliError> {
    let pid_file = config::pid_file_path();
    if std::fs::read_to_string(&pid_file).is_err() {
        println!("hookbridge is not running");
        return Ok(());
    }

    let client = reqwest::Client::new();
    let url = format!("{}/health", config::admin_base_url(None));
    match client.get(&url).send().await {
        Ok(response) => {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            Ok(())
        }
        Err(e) => Err(CliError::Registry(format!("instance not reachable: {e}"))),
    }
}

async fn register_worker(spec_path: PathBuf) -> Result<(), CliError> {
    let body = std::fs::read_to_string(&spec_path)
        .map_err(|e| CliError::Usage(format!("cannot read {}: {e}", spec_path.display())))?;
    let spec: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| CliError::Usage(format!("invalid worker spec JSON: {e}")))?;

    let (client, base, token) = admin_client()?;
    let response = client
        .post(format!("{base}/admin/workers"))
        .bearer_auth(token)
        .json(&spec)
        .send()
        .await
        .map_err(|e| CliError::Registry(e.to_string()))?;
    print_admin_response(response).await
}

async fn unregister_worker(name: String) -> Result<(), CliError> {
    let (client, base, token) = admin_client()?;
    let response = client
        .delete(format!("{base}/admin/workers/{name}"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| CliError::Registry(e.to_string()))?;
    print_admin_response(response).await
}

async fn invalidate_cache(pattern: String) -> Result<(), CliError> {
    let (client, base, token) = admin_client()?;
    let response = client
        .post(format!("{base}/admin/cache/invalidate"))
        .bearer_auth(token)
        .json(&serde_json::json!({"pattern": pattern}))
        .send()
        .await
        .map_err(|e| CliError::Registry(e.to_string()))?;
    print_admin_response(response).await
}

async fn circuit_reset(worker: String) -> Result<(), CliError> {
    let (client, base, token) = admin_client()?;
    let response = client
        .post(format!("{base}/admin/circuit-breaker/{worker}/reset"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| CliError::Registry(e.to_string()))?;
    print_admin_response(response).await
}

async fn print_admin_response(response: reqwest::Response) -> Result<(), CliError> {
    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    if status.is_success() {
        Ok(())
    } else {
        Err(CliError::Registry(format!("request failed: {status}")))
    }
}
