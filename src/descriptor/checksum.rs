// SPDX-License-Identifier: CC0-1.0

//! Descriptor checksum
//!
//! This module contains a re-implementation of the function used by Bitcoin Core to calculate the
//! checksum of a descriptor. The checksum algorithm is specified in [BIP-380].
//!
//! [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>

use core::convert::TryFrom;
use core::fmt;
use std::error;

use bech32::primitives::checksum::PackedFe32;
use bech32::{Checksum, Fe32};

pub use crate::expression::VALID_CHARS;

const CHECKSUM_LENGTH: usize = 8;
const CODE_LENGTH: usize = 32767;

/// Compute the checksum of a descriptor.
///
/// Note that this function does not check if the descriptor string is
/// syntactically correct or not. This only computes the checksum.
pub fn desc_checksum(desc: &str) -> Result<String, ChecksumError> {
    let mut eng = Engine::new();
    eng.input(desc)?;
    Ok(eng.checksum())
}

/// Appends `#` and the checksum to a descriptor.
pub fn descsum_create(desc: &str) -> Result<String, ChecksumError> {
    Ok(format!("{}#{}", desc, desc_checksum(desc)?))
}

/// Checks and verifies the checksum if it is present and returns the descriptor
/// string without the checksum.
pub(crate) fn verify_checksum(s: &str) -> Result<&str, ChecksumError> {
    for (pos, ch) in s.char_indices() {
        if !(' '..='~').contains(&ch) {
            return Err(ChecksumError::InvalidCharacter { ch, pos });
        }
    }

    let (desc_str, checksum_str) = match s.split_once('#') {
        Some((desc_str, checksum_str)) => (desc_str, checksum_str),
        None => return Ok(s),
    };
    if checksum_str.len() != CHECKSUM_LENGTH {
        return Err(ChecksumError::InvalidLength {
            actual: checksum_str.len(),
            expected: CHECKSUM_LENGTH,
        });
    }
    let expected = desc_checksum(desc_str)?;
    if checksum_str != expected {
        return Err(ChecksumError::Mismatch { expected, found: checksum_str.to_owned() });
    }
    Ok(desc_str)
}

/// Whether `s` carries a `#checksum` suffix, without validating it.
pub(crate) fn has_checksum(s: &str) -> bool { s.contains('#') }

/// An error in a descriptor checksum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChecksumError {
    /// A character outside the descriptor character set.
    InvalidCharacter {
        /// The character in question.
        ch: char,
        /// Its byte-index into the string.
        pos: usize,
    },
    /// The checksum after `#` has the wrong length.
    InvalidLength {
        /// Length of the given checksum.
        actual: usize,
        /// The required length.
        expected: usize,
    },
    /// The checksum does not match the descriptor.
    Mismatch {
        /// The checksum computed from the descriptor.
        expected: String,
        /// The checksum found after `#`.
        found: String,
    },
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ChecksumError::InvalidCharacter { ch, pos } => {
                write!(f, "invalid character in checksum: '{}' (position {})", ch, pos)
            }
            ChecksumError::InvalidLength { actual, expected } => {
                write!(f, "checksum has {} characters, expected {}", actual, expected)
            }
            ChecksumError::Mismatch { ref expected, ref found } => {
                write!(f, "invalid checksum '{}', expected '{}'", found, expected)
            }
        }
    }
}

impl error::Error for ChecksumError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> { None }
}

/// An engine to compute a checksum from a string.
pub struct Engine {
    inner: bech32::primitives::checksum::Engine<DescriptorChecksum>,
    cls: u64,
    clscount: u64,
    pos: usize,
}

impl Default for Engine {
    fn default() -> Engine { Engine::new() }
}

impl Engine {
    /// Constructs an engine with no input.
    pub fn new() -> Self {
        Engine { inner: bech32::primitives::checksum::Engine::new(), cls: 0, clscount: 0, pos: 0 }
    }

    /// Inputs some data into the checksum engine.
    ///
    /// If this function returns an error, the `Engine` will be left in an indeterminate
    /// state! It is safe to continue feeding it data but the result will not be meaningful.
    pub fn input(&mut self, s: &str) -> Result<(), ChecksumError> {
        for ch in s.chars() {
            let pos = self.pos;
            self.pos += ch.len_utf8();
            let class = VALID_CHARS
                .get(ch as usize)
                .copied()
                .flatten()
                .ok_or(ChecksumError::InvalidCharacter { ch, pos })? as u64;

            let fe = Fe32::try_from(class & 31).expect("class is valid because of the mask");
            self.inner.input_fe(fe);

            self.cls = self.cls * 3 + (class >> 5);
            self.clscount += 1;
            if self.clscount == 3 {
                let fe = Fe32::try_from(self.cls).expect("cls is valid");
                self.inner.input_fe(fe);
                self.cls = 0;
                self.clscount = 0;
            }
        }
        Ok(())
    }

    /// Obtains the checksum characters of all the data thus-far fed to the
    /// engine without allocating, to get a string use [`Self::checksum`].
    pub fn checksum_chars(&mut self) -> [char; CHECKSUM_LENGTH] {
        if self.clscount > 0 {
            let fe = Fe32::try_from(self.cls).expect("cls is valid");
            self.inner.input_fe(fe);
        }
        self.inner.input_target_residue();

        let mut chars = [0 as char; CHECKSUM_LENGTH];
        let mut checksum_remaining = CHECKSUM_LENGTH;

        for checksum_ch in &mut chars {
            checksum_remaining -= 1;
            let unpacked = self.inner.residue().unpack(checksum_remaining);
            let fe = Fe32::try_from(unpacked).expect("5 bits fits in an fe32");
            *checksum_ch = fe.to_char();
        }
        chars
    }

    /// Obtains the checksum of all the data thus-far fed to the engine.
    pub fn checksum(&mut self) -> String { self.checksum_chars().iter().collect() }
}

/// The Output Script Descriptor checksum algorithm, defined in [BIP-380].
///
/// [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum DescriptorChecksum {}

/// Generator coefficients, taken from BIP-380.
#[rustfmt::skip]
const GEN: [u64; 5] = [0xf5dee51989, 0xa9fdca3312, 0x1bab10e32d, 0x3706b1677a, 0x644d626ffd];

impl Checksum for DescriptorChecksum {
    type MidstateRepr = u64; // We need 40 bits (8 * 5).
    const CHECKSUM_LENGTH: usize = CHECKSUM_LENGTH;
    const CODE_LENGTH: usize = CODE_LENGTH;
    const GENERATOR_SH: [u64; 5] = GEN;
    const TARGET_RESIDUE: u64 = 1;
}

/// A wrapper around a `fmt::Formatter` which provides checksumming ability.
pub struct Formatter<'f, 'a> {
    fmt: &'f mut fmt::Formatter<'a>,
    eng: Engine,
}

impl<'f, 'a> Formatter<'f, 'a> {
    /// Contructs a new `Formatter`, wrapping a given `fmt::Formatter`.
    pub fn new(f: &'f mut fmt::Formatter<'a>) -> Self { Formatter { fmt: f, eng: Engine::new() } }

    /// Writes the checksum into the underlying `fmt::Formatter`, unless it has "alternate" display on.
    pub fn write_checksum_if_not_alt(&mut self) -> fmt::Result {
        use fmt::Write;

        if !self.fmt.alternate() {
            self.fmt.write_char('#')?;
            for ch in self.eng.checksum_chars().iter().copied() {
                self.fmt.write_char(ch)?;
            }
        }
        Ok(())
    }
}

impl<'f, 'a> fmt::Write for Formatter<'f, 'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.fmt.write_str(s)?;
        self.eng.input(s).map_err(|_| fmt::Error)
    }
}
