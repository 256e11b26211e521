use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("option {code} needs {needed} bytes, {remaining} left in buffer")]
    OptionOverflow {
        code: u16,
        needed: usize,
        remaining: usize,
    },

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
