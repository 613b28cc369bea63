// SPDX-License-Identifier: CC0-1.0

use bitcoin::consensus::encode::{self, VarInt};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Parity, XOnlyPublicKey};

pub(crate) fn varint_len(n: usize) -> usize { VarInt(n as u64).size() }

/// Appends `n` as a compact size integer.
pub(crate) fn push_varint(buf: &mut Vec<u8>, n: usize) {
    buf.extend_from_slice(&encode::serialize(&VarInt(n as u64)));
}

/// Appends `data` prefixed with its compact size length.
pub(crate) fn push_var_slice(buf: &mut Vec<u8>, data: &[u8]) {
    push_varint(buf, data.len());
    buf.extend_from_slice(data);
}

/// The compressed key over the x coordinate `key` whose HASH160 is `hash`.
///
/// A tapscript `pkh` leaf commits to a compressed key, while PSBT signatures
/// are indexed by x-only keys, so both parities are tried.
pub(crate) fn compressed_key_with_hash(key: &XOnlyPublicKey, hash: &[u8; 20]) -> Option<bitcoin::PublicKey> {
    [Parity::Even, Parity::Odd]
        .iter()
        .map(|parity| bitcoin::PublicKey::new(key.public_key(*parity)))
        .find(|pk| pk.pubkey_hash().to_byte_array() == *hash)
}
