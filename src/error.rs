use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    EmptyPayload,
    ShortRead { expected: usize, got: usize },
    Corrupt(&'static str),
    CrcMismatch { expected: u32, got: u32 },
    CorruptTail(&'static str),
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::EmptyPayload => write!(f, "payload is empty"),
            Error::ShortRead { expected, got } => {
                write!(f, "short read: expected {expected} bytes, got {got}")
            }
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::CrcMismatch { expected, got } => {
                write!(f, "crc mismatch: expected {expected:010}, got {got:010}")
            }
            Error::CorruptTail(msg) => write!(f, "corrupt pop log tail: {msg}"),
            Error::Closed => write!(f, "queue is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
