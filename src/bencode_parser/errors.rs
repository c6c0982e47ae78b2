use std::num::ParseIntError;

use nom::error::{ErrorKind, ParseError};
use thiserror::Error;

/// Parser-internal error, carrying the input where it happened.
#[derive(Debug, Error)]
pub enum BencodeError<I> {
    #[error("invalid integer")]
    InvalidInteger(I),

    #[error("invalid number: {1}")]
    ParseIntError(I, ParseIntError),

    #[error("byte string longer than the input")]
    InvalidBytesLength(I),

    #[error("nesting deeper than {}", crate::bencode_parser::parser::MAX_DEPTH)]
    TooDeep(I),

    #[error("unexpected input ({1:?})")]
    Nom(I, ErrorKind),
}

impl<I> BencodeError<I> {
    pub fn input(&self) -> &I {
        match self {
            Self::InvalidInteger(i)
            | Self::ParseIntError(i, _)
            | Self::InvalidBytesLength(i)
            | Self::TooDeep(i)
            | Self::Nom(i, _) => i,
        }
    }
}

impl<I> ParseError<I> for BencodeError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self::Nom(input, kind)
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}

/// Error returned by [`super::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bencode error at byte {offset}: {reason}")]
pub struct DecodeError {
    pub offset: usize,
    pub reason: String,
}
