use std::io;
use std::net::AddrParseError;

use crate::vm::VmError;

/// Crate-wide result alias for anything that can abort startup.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    Addr(#[from] AddrParseError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to load bytecode: {0}")]
    Bytecode(String),

    #[error("switch-mode VM fault during construction: {0}")]
    Vm(#[from] VmError),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
