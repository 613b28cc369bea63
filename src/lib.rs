// SPDX-License-Identifier: CC0-1.0

//! Taproot PSBT
//!
//! This library builds, updates, signs and finalizes Partially Signed Bitcoin
//! Transactions ([BIP-174]) which spend Taproot outputs ([BIP-341], [BIP-371]).
//!
//! The pipeline has four stages:
//!
//! 1. [`taproot`] commits an internal key and a set of leaf scripts to a Taproot
//!    output key, and derives one control block per leaf.
//! 2. [`Descriptor`] parses output descriptors such as `tap(KEY,pkh(KEY))`,
//!    verifies their [BIP-380] checksum and resolves them into the data a PSBT
//!    needs.
//! 3. [`Psbt`] is the typed key-value document, with its binary and base64
//!    encodings, merging, and the updater, signer and finalizer roles.
//! 4. [`wallet`] ties everything together into the operations a node exposes
//!    to its users (`createpsbt`, `utxoupdatepsbt`, `walletprocesspsbt`, ...).
//!
//! # Example: deriving a Taproot address
//!
//! ```rust
//! use std::str::FromStr;
//!
//! use taproot_psbt::bitcoin::Network;
//! use taproot_psbt::{Descriptor, KeyPath};
//!
//! let desc = Descriptor::from_str(
//!     "tap(50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0,\
//!      pk(0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798))",
//! )
//! .unwrap();
//!
//! // The NUMS internal key is recognised, so the key path cannot be used.
//! let resolution = desc.resolve();
//! assert_eq!(resolution.taproot().unwrap().key_path, KeyPath::Unspendable);
//! assert!(desc.address(Network::Bitcoin).unwrap().to_string().starts_with("bc1p"));
//!
//! // Display includes the checksum, the alternate form leaves it off.
//! let with_checksum = desc.to_string();
//! assert!(with_checksum.starts_with(&format!("{:#}", desc)));
//! assert_eq!(with_checksum.len(), format!("{:#}", desc).len() + 9);
//! ```
//!
//! [BIP-174]: <https://github.com/bitcoin/bips/blob/master/bip-0174.mediawiki>
//! [BIP-341]: <https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki>
//! [BIP-371]: <https://github.com/bitcoin/bips/blob/master/bip-0371.mediawiki>
//! [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>

#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Coding conventions
#![deny(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(missing_docs)]

#[cfg(feature = "serde")]
pub use actual_serde as serde;
pub use bitcoin;

pub mod descriptor;
mod error;
pub mod expression;
pub mod psbt;
pub mod taproot;
mod util;
pub mod wallet;

use core::fmt;

pub use crate::descriptor::checksum::{desc_checksum, descsum_create, ChecksumError};
pub use crate::descriptor::{
    Descriptor, DescriptorKey, KeyParseError, KeyPath, NumsPoint, Resolution,
};
pub use crate::error::{ParseError, ParseErrorKind};
pub use crate::psbt::{IncompleteData, KeyStore, Psbt, UtxoLookup};
pub use crate::taproot::{ControlBlock, TaprootBuilder, TaprootError, TaprootSpendInfo};
pub use crate::wallet::{Config, Wallet};

/// Maximum nesting depth of an expression.
///
/// Deeper expressions are rejected before they are turned into descriptors.
// https://github.com/sipa/miniscript/pull/5 for discussion on this number
pub const MAX_RECURSION_DEPTH: u32 = 402;

/// Top-level error type, unifying the failures of every stage.
#[derive(Debug)]
pub enum Error {
    /// A descriptor string could not be parsed.
    Parse(ParseError),
    /// A descriptor checksum was malformed or did not match.
    Checksum(ChecksumError),
    /// A descriptor was imported without the mandatory checksum.
    MissingChecksum(String),
    /// Taproot output construction failed.
    Taproot(TaprootError),
    /// A PSBT could not be decoded, merged or updated.
    Psbt(psbt::Error),
    /// Signing a PSBT failed.
    Sign(psbt::SignError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Parse(ref e) => fmt::Display::fmt(e, f),
            Error::Checksum(ref e) => fmt::Display::fmt(e, f),
            Error::MissingChecksum(ref desc) => {
                write!(f, "descriptor `{}` is missing its checksum", desc)
            }
            Error::Taproot(ref e) => fmt::Display::fmt(e, f),
            Error::Psbt(ref e) => fmt::Display::fmt(e, f),
            Error::Sign(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Parse(ref e) => Some(e),
            Error::Checksum(ref e) => Some(e),
            Error::MissingChecksum(..) => None,
            Error::Taproot(ref e) => Some(e),
            Error::Psbt(ref e) => Some(e),
            Error::Sign(ref e) => Some(e),
        }
    }
}

#[doc(hidden)]
impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error { Error::Parse(e) }
}

#[doc(hidden)]
impl From<ChecksumError> for Error {
    fn from(e: ChecksumError) -> Error { Error::Checksum(e) }
}

#[doc(hidden)]
impl From<TaprootError> for Error {
    fn from(e: TaprootError) -> Error { Error::Taproot(e) }
}

#[doc(hidden)]
impl From<psbt::Error> for Error {
    fn from(e: psbt::Error) -> Error { Error::Psbt(e) }
}

#[doc(hidden)]
impl From<psbt::SignError> for Error {
    fn from(e: psbt::SignError) -> Error { Error::Sign(e) }
}

/// Helper function used by tests
#[cfg(test)]
fn hex_script(s: &str) -> bitcoin::ScriptBuf {
    use bitcoin::hex::FromHex;

    let v = Vec::<u8>::from_hex(s).unwrap();
    bitcoin::ScriptBuf::from_bytes(v)
}
