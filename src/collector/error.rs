use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Integer(ParseIntError),
    #[error(transparent)]
    Float(ParseFloatError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(ParseError),
    #[error("invalid number of fields {got}, expected at least {min}")]
    TooFewFields { got: usize, min: usize },
    #[error("invalid {record} line {values:?}")]
    Decode {
        record: &'static str,
        values: Vec<u64>,
    },
    #[error("unknown label {0:?}")]
    UnknownLabel(String),
    #[error("{0}")]
    Other(String),

    #[error("no data")]
    NoData,
}

impl From<&'static str> for Error {
    fn from(value: &'static str) -> Self {
        Error::Other(value.into())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

impl From<ParseIntError> for Error {
    fn from(value: ParseIntError) -> Self {
        Error::Parse(ParseError::Integer(value))
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error::Parse(ParseError::Float(value))
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
