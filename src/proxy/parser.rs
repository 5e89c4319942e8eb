//! Parser for newline-separated endpoint lists
//!
//! Accepts `host:port`, `host:port:user:pass`, `host|port` and
//! `host|port|user|pass`. Malformed lines never abort a batch: each
//! non-blank line yields either an [`Endpoint`] or a [`ParseError`]
//! carrying the 1-based line number and the raw text.

use crate::proxy::models::Endpoint;
use crate::Result;
use std::fmt;
use std::fs;
use std::path::Path;

/// Why a single line failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Neither 2 nor 4 delimited fields
    WrongFieldCount(usize),
    /// Both `:` and `|` appear in the same line
    MixedDelimiters,
    /// Port field is not a number
    InvalidPort(String),
    /// Port parsed but falls outside 1-65535
    PortOutOfRange(u64),
    /// Host field is empty
    EmptyHost,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::WrongFieldCount(n) => {
                write!(f, "expected 2 or 4 fields, found {}", n)
            }
            ParseErrorKind::MixedDelimiters => {
                write!(f, "line mixes ':' and '|' delimiters")
            }
            ParseErrorKind::InvalidPort(raw) => write!(f, "port is not a number: {:?}", raw),
            ParseErrorKind::PortOutOfRange(port) => {
                write!(f, "port {} is outside 1-65535", port)
            }
            ParseErrorKind::EmptyHost => write!(f, "host field is empty"),
        }
    }
}

/// A malformed input line, localized to its position in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number in the original input
    pub line: usize,
    /// The raw line as supplied
    pub raw: String,
    pub kind: ParseErrorKind,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.kind, self.raw)
    }
}

impl std::error::Error for ParseError {}

/// Parser for raw endpoint lists
pub struct EndpointParser;

impl EndpointParser {
    /// Parse a single line into an endpoint.
    ///
    /// The delimiter is `|` when present, `:` otherwise; a line carrying
    /// both is rejected rather than guessed at.
    pub fn parse_line(line: &str) -> std::result::Result<Endpoint, ParseErrorKind> {
        let line = line.trim();

        let delimiter = if line.contains('|') {
            if line.contains(':') {
                return Err(ParseErrorKind::MixedDelimiters);
            }
            '|'
        } else {
            ':'
        };

        let parts: Vec<&str> = line.split(delimiter).collect();
        let (host, port_raw, auth) = match parts.as_slice() {
            [host, port] => (*host, *port, None),
            [host, port, user, pass] => (*host, *port, Some((*user, *pass))),
            _ => return Err(ParseErrorKind::WrongFieldCount(parts.len())),
        };

        if host.is_empty() {
            return Err(ParseErrorKind::EmptyHost);
        }

        let port: u64 = port_raw
            .parse()
            .map_err(|_| ParseErrorKind::InvalidPort(port_raw.to_string()))?;
        if port == 0 || port > u16::MAX as u64 {
            return Err(ParseErrorKind::PortOutOfRange(port));
        }
        let port = port as u16;

        Ok(match auth {
            Some((user, pass)) => {
                Endpoint::with_auth(host.to_string(), port, user.to_string(), pass.to_string())
            }
            None => Endpoint::new(host.to_string(), port),
        })
    }

    /// Lazily parse a text block, one result per non-blank line.
    ///
    /// Line numbers are 1-based and count blank lines too, so errors point
    /// at the line the user actually typed.
    pub fn parse_text(
        text: &str,
    ) -> impl Iterator<Item = std::result::Result<Endpoint, ParseError>> + '_ {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                Self::parse_line(line).map_err(|kind| ParseError {
                    line: idx + 1,
                    raw: line.trim().to_string(),
                    kind,
                })
            })
    }

    /// Parse endpoints from a file
    pub fn parse_file<P: AsRef<Path>>(
        path: P,
    ) -> Result<Vec<std::result::Result<Endpoint, ParseError>>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_text(&content).collect())
    }
}
