// SPDX-License-Identifier: CC0-1.0

//! Expression-related errors

use core::fmt;
use std::error;

/// An error parsing an expression tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseTreeError {
    /// Expression tree had depth exceeding our hard cap.
    MaxRecursionDepthExceeded {
        /// The position at which the cap was hit.
        pos: usize,
        /// The maximum depth.
        maximum: u32,
    },
    /// Character occurred which was not part of the valid descriptor character set.
    InvalidCharacter {
        /// The character in question.
        ch: char,
        /// Its byte-index into the string.
        pos: usize,
    },
    /// After a close-paren, the only valid next characters are close-parens and commas. Got
    /// something else.
    ExpectedParenOrComma {
        /// What we got instead.
        ch: char,
        /// Its byte-index into the string.
        pos: usize,
    },
    /// A `{` directly followed a name; braces only group sub-trees.
    IllegalCurlyBrace {
        /// Its byte-index into the string.
        pos: usize,
    },
    /// An open-parenthesis had no corresponding close-parenthesis.
    UnmatchedOpenParen {
        /// The character in question ('(' or '{')
        ch: char,
        /// Its byte-index into the string.
        pos: usize,
    },
    /// A close-parenthesis had no corresponding open-parenthesis.
    UnmatchedCloseParen {
        /// The character in question (')' or '}')
        ch: char,
        /// Its byte-index into the string.
        pos: usize,
    },
    /// A `(` was matched with a `}` or vice-versa.
    MismatchedParens {
        /// The opening parenthesis ('(' or '{')
        open_ch: char,
        /// The position of the opening parethesis.
        open_pos: usize,
        /// The closing parenthesis (')' or '}')
        close_ch: char,
        /// The position of the closing parethesis.
        close_pos: usize,
    },
    /// Data occurred after the final ).
    TrailingCharacter {
        /// The first trailing character.
        ch: char,
        /// Its byte-index into the string.
        pos: usize,
    },
}

impl ParseTreeError {
    /// The byte position in the input at which the error was detected.
    pub fn position(&self) -> usize {
        match *self {
            ParseTreeError::MaxRecursionDepthExceeded { pos, .. }
            | ParseTreeError::InvalidCharacter { pos, .. }
            | ParseTreeError::ExpectedParenOrComma { pos, .. }
            | ParseTreeError::IllegalCurlyBrace { pos }
            | ParseTreeError::UnmatchedOpenParen { pos, .. }
            | ParseTreeError::UnmatchedCloseParen { pos, .. }
            | ParseTreeError::TrailingCharacter { pos, .. } => pos,
            ParseTreeError::MismatchedParens { close_pos, .. } => close_pos,
        }
    }
}

impl fmt::Display for ParseTreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseTreeError::MaxRecursionDepthExceeded { pos, maximum } => {
                write!(f, "maximum recursion depth {} exceeded (position {})", maximum, pos)
            }
            ParseTreeError::InvalidCharacter { ch, pos } => {
                write!(f, "character `{}` (position {}) not allowed in descriptor", ch, pos)
            }
            ParseTreeError::ExpectedParenOrComma { ch, pos } => {
                write!(
                    f,
                    "invalid character `{}` (position {}); expected comma or close-paren",
                    ch, pos
                )
            }
            ParseTreeError::IllegalCurlyBrace { pos } => {
                write!(f, "illegal `{{` (position {}) after a name", pos)
            }
            ParseTreeError::UnmatchedOpenParen { ch, pos } => {
                write!(f, "`{}` (position {}) not closed", ch, pos)
            }
            ParseTreeError::UnmatchedCloseParen { ch, pos } => {
                write!(f, "`{}` (position {}) not opened", ch, pos)
            }
            ParseTreeError::MismatchedParens { open_ch, open_pos, close_ch, close_pos } => {
                write!(
                    f,
                    "`{}` (position {}) closed by `{}` (position {})",
                    open_ch, open_pos, close_ch, close_pos
                )
            }
            ParseTreeError::TrailingCharacter { ch, pos } => {
                write!(f, "trailing data `{}...` (position {})", ch, pos)
            }
        }
    }
}

impl error::Error for ParseTreeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> { None }
}
