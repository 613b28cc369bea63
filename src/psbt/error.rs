// SPDX-License-Identifier: CC0-1.0

use core::fmt;
use std::error;

use bitcoin::Transaction;

use super::raw;

/// Ways that a PSBT might fail to decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Magic bytes for a PSBT must be the ASCII for "psbt" serialized in most
    /// significant byte order, followed by `0xff`.
    InvalidMagic,
    /// The global map has no unsigned transaction.
    MissingUnsignedTx,
    /// The unsigned transaction has script sigs.
    UnsignedTxHasScriptSigs,
    /// The unsigned transaction has script witnesses.
    UnsignedTxHasScriptWitnesses,
    /// A key appears twice in the same map.
    DuplicateKey(raw::Key),
    /// The key data does not fit the key type.
    InvalidKey(raw::Key),
    /// The value of a known key could not be decoded.
    InvalidValue {
        /// The key whose value is malformed.
        key: raw::Key,
        /// What is wrong with it.
        reason: String,
    },
    /// A length, a compact size or a key type is not encoded correctly.
    InvalidEncoding(String),
    /// The data ended in the middle of a record.
    UnexpectedEof,
    /// The data ended before every input and output had its map.
    MapCountMismatch {
        /// Number of maps the unsigned transaction calls for.
        expected: usize,
        /// Number of maps found.
        found: usize,
    },
    /// Bytes remained after the last output map.
    TrailingData(usize),
    /// The PSBT version is not supported.
    UnsupportedVersion(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecodeError::InvalidMagic => f.write_str("invalid magic"),
            DecodeError::MissingUnsignedTx => f.write_str("missing unsigned transaction"),
            DecodeError::UnsignedTxHasScriptSigs => {
                f.write_str("the unsigned transaction has script sigs")
            }
            DecodeError::UnsignedTxHasScriptWitnesses => {
                f.write_str("the unsigned transaction has script witnesses")
            }
            DecodeError::DuplicateKey(ref key) => write!(f, "duplicate key: {}", key),
            DecodeError::InvalidKey(ref key) => write!(f, "invalid key: {}", key),
            DecodeError::InvalidValue { ref key, ref reason } => {
                write!(f, "invalid value for key {}: {}", key, reason)
            }
            DecodeError::InvalidEncoding(ref e) => write!(f, "invalid encoding: {}", e),
            DecodeError::UnexpectedEof => f.write_str("unexpected end of data"),
            DecodeError::MapCountMismatch { expected, found } => {
                write!(f, "expected {} input and output maps, found {}", expected, found)
            }
            DecodeError::TrailingData(n) => write!(f, "{} bytes of trailing data", n),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported PSBT version {}", v),
        }
    }
}

impl error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> { None }
}

/// Which map of a PSBT a field belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// The global map.
    Global,
    /// The map of an input.
    Input(usize),
    /// The map of an output.
    Output(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Location::Global => f.write_str("global map"),
            Location::Input(index) => write!(f, "input {}", index),
            Location::Output(index) => write!(f, "output {}", index),
        }
    }
}

/// Ways a PSBT operation can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The serialized PSBT is malformed.
    Malformed(DecodeError),
    /// The base64 string is malformed.
    Base64(bitcoin::base64::DecodeError),
    /// Two PSBTs to be combined have different unsigned transactions.
    UnexpectedUnsignedTx {
        /// The unsigned transaction of this PSBT.
        expected: Box<Transaction>,
        /// The unsigned transaction of the other PSBT.
        actual: Box<Transaction>,
    },
    /// The same field holds different values in two sources.
    ConflictingData {
        /// Where the field is.
        location: Location,
        /// The `decodepsbt` name of the field.
        field: &'static str,
    },
    /// An input has no final scriptSig or witness.
    NotFinalized {
        /// Index of the input.
        index: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Malformed(ref e) => write!(f, "malformed PSBT: {}", e),
            Error::Base64(ref e) => write!(f, "invalid base64: {}", e),
            Error::UnexpectedUnsignedTx { ref expected, ref actual } => write!(
                f,
                "different unsigned transaction: expected {}, actual {}",
                expected.compute_txid(),
                actual.compute_txid()
            ),
            Error::ConflictingData { location, field } => {
                write!(f, "conflicting values for {} in {}", field, location)
            }
            Error::NotFinalized { index } => write!(f, "input {} is not finalized", index),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Malformed(ref e) => Some(e),
            Error::Base64(ref e) => Some(e),
            Error::UnexpectedUnsignedTx { .. }
            | Error::ConflictingData { .. }
            | Error::NotFinalized { .. } => None,
        }
    }
}

#[doc(hidden)]
impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Error { Error::Malformed(e) }
}

#[doc(hidden)]
impl From<bitcoin::base64::DecodeError> for Error {
    fn from(e: bitcoin::base64::DecodeError) -> Error { Error::Base64(e) }
}
