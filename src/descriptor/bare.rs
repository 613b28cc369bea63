// SPDX-License-Identifier: CC0-1.0

//! # Bare Output Descriptors
//!
//! Pay-to-pubkey (`pk`) and pay-to-pubkey-hash (`pkh`) outputs, spent with
//! ECDSA signatures in the scriptSig.

use core::fmt;

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};
use bitcoin::script::Builder;
use bitcoin::{Address, Network, ScriptBuf};

use crate::descriptor::DescriptorKey;
use crate::error::ParseErrorKind;

fn check_legacy_key(key: &DescriptorKey) -> Result<(), ParseErrorKind> {
    if key.is_x_only_key() {
        return Err(ParseErrorKind::XOnlyKeyOutsideTaproot);
    }
    Ok(())
}

/// A pay-to-pubkey output, `<key> OP_CHECKSIG`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pk {
    key: DescriptorKey,
}

impl Pk {
    /// Creates a `pk` descriptor. The key must be a full public or private key.
    pub fn new(key: DescriptorKey) -> Result<Self, ParseErrorKind> {
        check_legacy_key(&key)?;
        Ok(Pk { key })
    }

    /// The key.
    pub fn as_inner(&self) -> &DescriptorKey { &self.key }

    /// Obtains the corresponding script pubkey for this descriptor.
    pub fn script_pubkey(&self) -> ScriptBuf {
        Builder::new()
            .push_key(&self.key.to_public_key())
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Pay-to-pubkey outputs have no address.
    pub fn address(&self, _network: Network) -> Option<Address> { None }

    /// This descriptor with any private key replaced by its public key.
    pub fn to_public(&self) -> Pk { Pk { key: self.key.to_public() } }
}

impl fmt::Display for Pk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "pk({})", self.key) }
}

/// A pay-to-pubkey-hash output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pkh {
    key: DescriptorKey,
}

impl Pkh {
    /// Creates a `pkh` descriptor. The key must be a full public or private key.
    pub fn new(key: DescriptorKey) -> Result<Self, ParseErrorKind> {
        check_legacy_key(&key)?;
        Ok(Pkh { key })
    }

    /// The key.
    pub fn as_inner(&self) -> &DescriptorKey { &self.key }

    /// Obtains the corresponding script pubkey for this descriptor.
    pub fn script_pubkey(&self) -> ScriptBuf {
        let hash = self.key.to_public_key().pubkey_hash();
        Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(hash.to_byte_array())
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// The P2PKH address.
    pub fn address(&self, network: Network) -> Option<Address> {
        Address::from_script(&self.script_pubkey(), network).ok()
    }

    /// This descriptor with any private key replaced by its public key.
    pub fn to_public(&self) -> Pkh { Pkh { key: self.key.to_public() } }
}

impl fmt::Display for Pkh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "pkh({})", self.key) }
}
