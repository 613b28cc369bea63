// SPDX-License-Identifier: CC0-1.0

//! Errors

use core::fmt;
use std::error;

use crate::descriptor::KeyParseError;
use crate::expression::{self, ParseTreeError};

/// An error parsing a descriptor, pointing at the fragment of input which caused it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    /// The offending part of the input.
    pub fragment: String,
    /// Byte position of the fragment in the input.
    pub position: usize,
    /// What went wrong.
    pub kind: ParseErrorKind,
}

/// The ways a descriptor can fail to parse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The expression itself is malformed.
    Tree(ParseTreeError),
    /// A function name which is not part of the grammar.
    UnknownFunction,
    /// A function was given the wrong number of arguments.
    WrongArity {
        /// The accepted number of arguments.
        expected: &'static str,
        /// The number actually given.
        found: usize,
    },
    /// A key expression could not be parsed.
    MalformedKey(KeyParseError),
    /// Hex data could not be parsed.
    InvalidHex,
    /// A key was expected but a function or tree was found.
    ExpectedKey,
    /// An uncompressed key inside a Taproot descriptor.
    UncompressedKeyInTaproot,
    /// An x-only key outside a Taproot descriptor.
    XOnlyKeyOutsideTaproot,
    /// A fragment which is only valid at a different nesting level, such as `tap`
    /// inside a tree or `raw` at the top.
    NestingNotAllowed,
    /// A Taproot tree deeper than 128 levels.
    TreeTooDeep,
}

impl ParseError {
    pub(crate) fn new(tree: &expression::Tree, kind: ParseErrorKind) -> Self {
        ParseError { fragment: tree.text.to_owned(), position: tree.pos, kind }
    }

    pub(crate) fn from_tree_error(input: &str, e: ParseTreeError) -> Self {
        let position = e.position();
        let fragment = input.get(position..).unwrap_or("").chars().take(16).collect();
        ParseError { fragment, position, kind: ParseErrorKind::Tree(e) }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ParseErrorKind::Tree(ref e) => fmt::Display::fmt(e, f),
            ParseErrorKind::UnknownFunction => {
                write!(f, "unknown function `{}` (position {})", self.fragment, self.position)
            }
            ParseErrorKind::WrongArity { expected, found } => write!(
                f,
                "`{}` (position {}) takes {} argument(s), found {}",
                self.fragment, self.position, expected, found
            ),
            ParseErrorKind::MalformedKey(ref e) => {
                write!(f, "malformed key `{}` (position {}): {}", self.fragment, self.position, e)
            }
            ParseErrorKind::InvalidHex => {
                write!(f, "invalid hex `{}` (position {})", self.fragment, self.position)
            }
            ParseErrorKind::ExpectedKey => {
                write!(f, "expected a key, found `{}` (position {})", self.fragment, self.position)
            }
            ParseErrorKind::UncompressedKeyInTaproot => write!(
                f,
                "uncompressed key `{}` (position {}) not allowed in taproot",
                self.fragment, self.position
            ),
            ParseErrorKind::XOnlyKeyOutsideTaproot => write!(
                f,
                "x-only key `{}` (position {}) only allowed in taproot",
                self.fragment, self.position
            ),
            ParseErrorKind::NestingNotAllowed => write!(
                f,
                "`{}` (position {}) not allowed at this position",
                self.fragment, self.position
            ),
            ParseErrorKind::TreeTooDeep => write!(
                f,
                "taproot tree `{}` (position {}) exceeds 128 levels",
                self.fragment, self.position
            ),
        }
    }
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.kind {
            ParseErrorKind::Tree(ref e) => Some(e),
            ParseErrorKind::MalformedKey(ref e) => Some(e),
            ParseErrorKind::UnknownFunction
            | ParseErrorKind::WrongArity { .. }
            | ParseErrorKind::InvalidHex
            | ParseErrorKind::ExpectedKey
            | ParseErrorKind::UncompressedKeyInTaproot
            | ParseErrorKind::XOnlyKeyOutsideTaproot
            | ParseErrorKind::NestingNotAllowed
            | ParseErrorKind::TreeTooDeep => None,
        }
    }
}
