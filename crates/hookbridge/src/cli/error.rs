//! CLI error taxonomy and its exit-code mapping: 0 success, 2 usage
//! error, 3 auth error, 4 registry error, 1 unspecified failure.

use std::fmt;
use std::process::ExitCode;

#[derive(Debug)]
pub enum CliError {
    Usage(String),
    Auth(String),
    Registry(String),
    Other(anyhow::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "usage error: {msg}"),
            CliError::Auth(msg) => write!(f, "authentication error: {msg}"),
            CliError::Registry(msg) => write!(f, "registry error: {msg}"),
            CliError::Other(err) => write!(f, "{err:?}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err)
    }
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Usage(_) => ExitCode::from(2),
            CliError::Auth(_) => ExitCode::from(3),
            CliError::Registry(_) => ExitCode::from(4),
            CliError::Other(_) => ExitCode::from(1),
        }
    }
}
