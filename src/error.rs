use std::io;

use thiserror::Error;

/// Errors raised while parsing a single Pyre rule line.
///
/// In non-strict mode [`UnknownKeyword`](RuleError::UnknownKeyword) and
/// [`InvalidPort`](RuleError::InvalidPort) conditions degrade to warnings
/// (the rule or port is dropped); the remaining variants are always fatal
/// to the line that produced them.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("syntax error in rule: {0}")]
    Syntax(String),

    #[error("{0:?} is not a valid port number (1-65535)")]
    InvalidPort(String),

    #[error("no handler for keyword {0:?}")]
    UnknownKeyword(String),

    #[error("{0:?} is not a chain rules can be attached to")]
    UnknownChain(String),

    #[error("{0:?} is not a valid IPv4 or IPv6 network")]
    InvalidNetwork(String),

    #[error("{0:?} is not a connection tracking state")]
    UnknownState(String),
}

/// Errors raised while parsing a whole Pyre file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("directive {directive} expects at least {expected} argument(s)")]
    BadDirective {
        directive: &'static str,
        expected: usize,
    },

    #[error("file {0:?} could not be found in any of the search paths")]
    FileNotFound(String),

    #[error("I/O error while reading rules")]
    Io(#[from] io::Error),
}
