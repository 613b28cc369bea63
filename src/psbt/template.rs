// SPDX-License-Identifier: CC0-1.0

//! Script templates
//!
//! The handful of script shapes the signer and finalizer know how to satisfy.
//! Anything else is left for another party to sign.

use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::Script;

/// A recognised tapscript leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LeafTemplate {
    /// `<xonly> OP_CHECKSIG`
    Pk(XOnlyPublicKey),
    /// `OP_DUP OP_HASH160 <hash160(pubkey)> OP_EQUALVERIFY OP_CHECKSIG`
    Pkh([u8; 20]),
}

impl LeafTemplate {
    pub(crate) fn parse(script: &Script) -> Option<Self> {
        let b = script.as_bytes();
        if b.len() == 34 && b[0] == 0x20 && b[33] == OP_CHECKSIG.to_u8() {
            return XOnlyPublicKey::from_slice(&b[1..33]).ok().map(LeafTemplate::Pk);
        }
        pkh_hash(b).map(LeafTemplate::Pkh)
    }
}

/// A recognised legacy output script.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LegacyTemplate {
    /// `<pubkey> OP_CHECKSIG`
    Pk(bitcoin::PublicKey),
    /// `OP_DUP OP_HASH160 <hash160(pubkey)> OP_EQUALVERIFY OP_CHECKSIG`
    Pkh([u8; 20]),
}

impl LegacyTemplate {
    pub(crate) fn parse(script: &Script) -> Option<Self> {
        let b = script.as_bytes();
        let key_len = match b.len() {
            35 | 67 => b.len() - 2,
            _ => return pkh_hash(b).map(LegacyTemplate::Pkh),
        };
        if b[0] as usize != key_len || b[b.len() - 1] != OP_CHECKSIG.to_u8() {
            return None;
        }
        bitcoin::PublicKey::from_slice(&b[1..1 + key_len]).ok().map(LegacyTemplate::Pk)
    }
}

fn pkh_hash(b: &[u8]) -> Option<[u8; 20]> {
    if b.len() == 25
        && b[0] == OP_DUP.to_u8()
        && b[1] == OP_HASH160.to_u8()
        && b[2] == 0x14
        && b[23] == OP_EQUALVERIFY.to_u8()
        && b[24] == OP_CHECKSIG.to_u8()
    {
        let mut hash = [0; 20];
        hash.copy_from_slice(&b[3..23]);
        Some(hash)
    } else {
        None
    }
}
