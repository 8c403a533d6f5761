//! Errors ending a run, and the exit code each one maps to.
use rpcurl_core::status::{EXIT_FATAL, EXIT_USAGE, exit_code_for};
use rpcurl_core::tonic::Code;
use rpcurl_core::transport::{ConnectError, TransportConfigError};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// The command line is malformed.
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] TransportConfigError),
    #[error("Failed to dial target host: {0}")]
    Connect(#[from] ConnectError),
    /// A symbol or service could not be resolved by any schema source.
    #[error("{0:#}")]
    Schema(anyhow::Error),
    #[error("{0:#}")]
    Fatal(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => EXIT_USAGE,
            CliError::Config(_)
            | CliError::Connect(_)
            | CliError::Schema(_)
            | CliError::Fatal(_) => EXIT_FATAL,
        }
    }
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The invoked RPC ended with this non-OK status.
    Status(Code),
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Status(code) => exit_code_for(code),
        }
    }
}
