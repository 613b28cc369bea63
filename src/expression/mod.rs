// SPDX-License-Identifier: CC0-1.0

//! # Function-like Expression Language
//!
//! Descriptors are written as nested function calls, `name(arg,arg,...)`, with
//! `{left,right}` grouping the two halves of a Taproot tree. This module turns
//! such a string into a [`Tree`] which remembers where in the input every node
//! came from, so that later stages can point at the offending fragment.

mod error;

pub use self::error::ParseTreeError;
use crate::MAX_RECURSION_DEPTH;

/// Allowed characters are descriptor strings.
pub const INPUT_CHARSET: &str = "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";

/// Map of valid characters in descriptor strings.
#[rustfmt::skip]
pub const VALID_CHARS: [Option<u8>; 128] = [
    None, None, None, None, None, None, None, None, None, None, None, None, None,
    None, None, None, None, None, None, None, None, None, None, None, None, None,
    None, None, None, None, None, None, Some(94), Some(59), Some(92), Some(91),
    Some(28), Some(29), Some(50), Some(15), Some(10), Some(11), Some(17), Some(51),
    Some(14), Some(52), Some(53), Some(16), Some(0), Some(1), Some(2), Some(3),
    Some(4), Some(5), Some(6), Some(7), Some(8), Some(9), Some(27), Some(54),
    Some(55), Some(56), Some(57), Some(58), Some(26), Some(82), Some(83),
    Some(84), Some(85), Some(86), Some(87), Some(88), Some(89), Some(32), Some(33),
    Some(34), Some(35), Some(36), Some(37), Some(38), Some(39), Some(40), Some(41),
    Some(42), Some(43), Some(44), Some(45), Some(46), Some(47), Some(48), Some(49),
    Some(12), Some(93), Some(13), Some(60), Some(61), Some(90), Some(18), Some(19),
    Some(20), Some(21), Some(22), Some(23), Some(24), Some(25), Some(64), Some(65),
    Some(66), Some(67), Some(68), Some(69), Some(70), Some(71), Some(72), Some(73),
    Some(74), Some(75), Some(76), Some(77), Some(78), Some(79), Some(80), Some(81),
    Some(30), Some(62), Some(31), Some(63), None,
];

/// The kind of brackets following a node's name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parens {
    /// A bare terminal, `x`.
    None,
    /// A function call, `x(...)`.
    Round,
    /// A tree branch, `{...}`. Branches have an empty name.
    Curly,
}

/// A token of the form `x(...)`, `{...}` or `x`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree<'a> {
    /// The name `x`
    pub name: &'a str,
    /// The brackets following the name, if any.
    pub parens: Parens,
    /// The comma-separated contents of the brackets, if any
    pub args: Vec<Tree<'a>>,
    /// Byte offset of this node in the parsed string.
    pub pos: usize,
    /// The full text of this node, including its arguments.
    pub text: &'a str,
}

impl<'a> Tree<'a> {
    /// Parses a whole expression.
    pub fn from_str(s: &'a str) -> Result<Tree<'a>, ParseTreeError> {
        check_valid_chars(s)?;

        let (tree, end) = Tree::parse_at(s, 0, 0)?;
        match s[end..].chars().next() {
            None => Ok(tree),
            Some(ch @ (')' | '}')) => Err(ParseTreeError::UnmatchedCloseParen { ch, pos: end }),
            Some(ch) => Err(ParseTreeError::TrailingCharacter { ch, pos: end }),
        }
    }

    /// Parses the node starting at `start`, returning it with the position just past it.
    fn parse_at(s: &'a str, start: usize, depth: u32) -> Result<(Tree<'a>, usize), ParseTreeError> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(ParseTreeError::MaxRecursionDepthExceeded {
                pos: start,
                maximum: MAX_RECURSION_DEPTH,
            });
        }

        let bytes = s.as_bytes();
        let mut pos = start;
        while pos < bytes.len() && !matches!(bytes[pos], b'(' | b')' | b'{' | b'}' | b',') {
            pos += 1;
        }
        let name = &s[start..pos];

        let (close, parens) = match bytes.get(pos) {
            Some(b'(') => (b')', Parens::Round),
            Some(b'{') if name.is_empty() => (b'}', Parens::Curly),
            Some(b'{') => return Err(ParseTreeError::IllegalCurlyBrace { pos }),
            _ => {
                let tree = Tree { name, parens: Parens::None, args: vec![], pos: start, text: name };
                return Ok((tree, pos));
            }
        };

        let open_pos = pos;
        let open_ch = char::from(bytes[open_pos]);
        let mut args = vec![];
        pos += 1;
        loop {
            let (arg, next) = Tree::parse_at(s, pos, depth + 1)?;
            args.push(arg);
            match bytes.get(next) {
                Some(b',') => pos = next + 1,
                Some(&ch) if ch == close => {
                    pos = next + 1;
                    break;
                }
                Some(&ch @ (b')' | b'}')) => {
                    return Err(ParseTreeError::MismatchedParens {
                        open_ch,
                        open_pos,
                        close_ch: char::from(ch),
                        close_pos: next,
                    })
                }
                Some(&ch) => {
                    return Err(ParseTreeError::ExpectedParenOrComma {
                        ch: char::from(ch),
                        pos: next,
                    })
                }
                None => return Err(ParseTreeError::UnmatchedOpenParen { ch: open_ch, pos: open_pos }),
            }
        }

        Ok((Tree { name, parens, args, pos: start, text: &s[start..pos] }, pos))
    }

    /// Whether this node is a bare terminal without brackets.
    pub fn is_terminal(&self) -> bool { self.parens == Parens::None }
}

/// Checks that every character of `s` is in [`INPUT_CHARSET`].
pub fn check_valid_chars(s: &str) -> Result<(), ParseTreeError> {
    for (pos, ch) in s.char_indices() {
        if VALID_CHARS.get(ch as usize).copied().flatten().is_none() {
            return Err(ParseTreeError::InvalidCharacter { ch, pos });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_char_map() {
        let mut valid_chars = [None; 128];
        for (i, ch) in super::INPUT_CHARSET.chars().enumerate() {
            valid_chars[ch as usize] = Some(i as u8);
        }
        assert_eq!(valid_chars, super::VALID_CHARS);
    }

    #[test]
    fn parse_nested() {
        let tree = Tree::from_str("tap(K,{pk(A),pkh(B)},raw(51))").unwrap();
        assert_eq!(tree.name, "tap");
        assert_eq!(tree.parens, Parens::Round);
        assert_eq!(tree.args.len(), 3);

        assert!(tree.args[0].is_terminal());
        assert_eq!(tree.args[0].name, "K");
        assert_eq!(tree.args[0].pos, 4);

        let branch = &tree.args[1];
        assert_eq!(branch.name, "");
        assert_eq!(branch.parens, Parens::Curly);
        assert_eq!(branch.text, "{pk(A),pkh(B)}");
        assert_eq!(branch.pos, 6);
        assert_eq!(branch.args[1].name, "pkh");
        assert_eq!(branch.args[1].args[0].name, "B");
        assert_eq!(branch.args[1].args[0].pos, 17);

        assert_eq!(tree.args[2].text, "raw(51)");
        assert_eq!(tree.text, "tap(K,{pk(A),pkh(B)},raw(51))");
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            Tree::from_str("pk(A"),
            Err(ParseTreeError::UnmatchedOpenParen { ch: '(', pos: 2 })
        );
        assert_eq!(
            Tree::from_str("pk(A))"),
            Err(ParseTreeError::UnmatchedCloseParen { ch: ')', pos: 5 })
        );
        assert_eq!(
            Tree::from_str("tap(K,{A,B)"),
            Err(ParseTreeError::MismatchedParens {
                open_ch: '{',
                open_pos: 6,
                close_ch: ')',
                close_pos: 10
            })
        );
        assert_eq!(
            Tree::from_str("pk(A)x"),
            Err(ParseTreeError::TrailingCharacter { ch: 'x', pos: 5 })
        );
        assert_eq!(
            Tree::from_str("pk(A(B)C)"),
            Err(ParseTreeError::ExpectedParenOrComma { ch: 'C', pos: 7 })
        );
        assert_eq!(Tree::from_str("tap{A,B}"), Err(ParseTreeError::IllegalCurlyBrace { pos: 3 }));
        assert_eq!(
            Tree::from_str("pk(Ü)"),
            Err(ParseTreeError::InvalidCharacter { ch: 'Ü', pos: 3 })
        );
    }

    #[test]
    fn recursion_limit() {
        let depth = MAX_RECURSION_DEPTH as usize;
        let deep = format!("{}A{}", "x(".repeat(depth), ")".repeat(depth));
        assert!(matches!(
            Tree::from_str(&deep),
            Err(ParseTreeError::MaxRecursionDepthExceeded { .. })
        ));

        let shallow = format!("{}A{}", "x(".repeat(depth - 1), ")".repeat(depth - 1));
        assert!(Tree::from_str(&shallow).is_ok());
    }
}
