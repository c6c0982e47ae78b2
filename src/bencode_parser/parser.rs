use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take,
    character::complete::{char, digit1},
    combinator::{eof, recognize},
    multi::{many_till, many0},
    sequence::{delimited, pair, preceded},
};
use std::collections::HashMap;

use crate::bencode_parser::errors::{BencodeError, DecodeError};

type BenResult<'a, T = Value<'a>> = IResult<&'a [u8], T, BencodeError<&'a [u8]>>;

/// Lists and dictionaries nested deeper than this are rejected.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    Bytes(&'a [u8]),
    Integer(i64),
    List(Vec<Self>),
    /// `raw` is the exact encoded form, kept so callers can hash it.
    Dictionary {
        entries: HashMap<&'a [u8], Self>,
        raw: &'a [u8],
    },
}

impl<'a> Value<'a> {
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Looks up `key` if this is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value<'a>> {
        match self {
            Value::Dictionary { entries, .. } => entries.get(key),
            _ => None,
        }
    }

    fn parse_value(inp: &'a [u8], depth: usize) -> BenResult<'a> {
        if depth > MAX_DEPTH {
            return Err(nom::Err::Failure(BencodeError::TooDeep(inp)));
        }
        alt((
            Self::parse_bytes,
            Self::parse_integer,
            |i: &'a [u8]| Self::parse_list(i, depth),
            |i: &'a [u8]| Self::parse_dict(i, depth),
        ))
        .parse(inp)
    }

    fn parse_integer(start_inp: &'a [u8]) -> BenResult<'a> {
        let digits: BenResult<'a, &'a [u8]> = delimited(
            char('i'),
            alt((recognize(pair(char('-'), digit1)), digit1)),
            char('e'),
        )
        .parse(start_inp);
        let (inp, value) = digits?;

        // digit1 only matches ASCII digits, so this is valid UTF-8
        let value_str = std::str::from_utf8(value).unwrap_or_default();

        if value_str.starts_with("-0") || (value_str.starts_with('0') && value_str.len() > 1) {
            return Err(nom::Err::Failure(BencodeError::InvalidInteger(start_inp)));
        }

        match value_str.parse::<i64>() {
            Ok(value) => Ok((inp, Value::Integer(value))),
            Err(e) => Err(nom::Err::Failure(BencodeError::ParseIntError(start_inp, e))),
        }
    }

    fn parse_byte_string(start_inp: &'a [u8]) -> BenResult<'a, &'a [u8]> {
        let prefix: BenResult<'a, (&'a [u8], char)> = pair(digit1, char(':')).parse(start_inp);
        let (inp, (length, _)) = prefix?;

        let length = std::str::from_utf8(length).unwrap_or_default();
        let length: usize = length
            .parse()
            .map_err(|e| nom::Err::Failure(BencodeError::ParseIntError(start_inp, e)))?;

        if length > inp.len() {
            return Err(nom::Err::Failure(BencodeError::InvalidBytesLength(start_inp)));
        }

        take(length).parse(inp)
    }

    fn parse_bytes(start_inp: &'a [u8]) -> BenResult<'a> {
        let (inp, characters) = Self::parse_byte_string(start_inp)?;
        Ok((inp, Value::Bytes(characters)))
    }

    fn parse_list(start_inp: &'a [u8], depth: usize) -> BenResult<'a> {
        let item = |i: &'a [u8]| Self::parse_value(i, depth + 1);
        let (inp, (items, _)) =
            preceded(char('l'), many_till(item, char('e'))).parse(start_inp)?;

        Ok((inp, Value::List(items)))
    }

    fn parse_dict(start_inp: &'a [u8], depth: usize) -> BenResult<'a> {
        let value = |i: &'a [u8]| Self::parse_value(i, depth + 1);
        let (inp, (pairs, _)) = preceded(
            char('d'),
            many_till(pair(Self::parse_byte_string, value), char('e')),
        )
        .parse(start_inp)?;

        let raw = &start_inp[..start_inp.len() - inp.len()];
        Ok((
            inp,
            Value::Dictionary {
                entries: pairs.into_iter().collect(),
                raw,
            },
        ))
    }
}

/// Parses every value in `source`, which must be consumed entirely.
pub fn parse(source: &[u8]) -> Result<Vec<Value<'_>>, DecodeError> {
    let result = many0(|i| Value::parse_value(i, 0))
        .parse(source)
        .and_then(|(rest, items)| eof(rest).map(|_| items));

    result.map_err(|err| match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => DecodeError {
            offset: source.len() - e.input().len(),
            reason: e.to_string(),
        },
        nom::Err::Incomplete(_) => DecodeError {
            offset: source.len(),
            reason: "incomplete input".to_string(),
        },
    })
}
