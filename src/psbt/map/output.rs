// SPDX-License-Identifier: CC0-1.0

use std::collections::BTreeMap;

use bitcoin::bip32::KeySource;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::taproot::{LeafVersion, TapLeafHash, TAPROOT_CONTROL_MAX_NODE_COUNT};
use bitcoin::ScriptBuf;

use super::{
    decode_key_source, decode_tap_key_origin, encode_key_source, encode_tap_key_origin,
    expect_empty_key, invalid_value, keep_existing, key_pubkey, key_xonly, merge_map,
    merge_option, Map,
};
use crate::psbt::error::{DecodeError, Error, Location};
use crate::psbt::raw;
use crate::util::push_var_slice;

/// Type: Redeem ScriptBuf PSBT_OUT_REDEEM_SCRIPT = 0x00
const PSBT_OUT_REDEEM_SCRIPT: u64 = 0x00;
/// Type: Witness ScriptBuf PSBT_OUT_WITNESS_SCRIPT = 0x01
const PSBT_OUT_WITNESS_SCRIPT: u64 = 0x01;
/// Type: BIP 32 Derivation Path PSBT_OUT_BIP32_DERIVATION = 0x02
const PSBT_OUT_BIP32_DERIVATION: u64 = 0x02;
/// Type: Taproot Internal Key PSBT_OUT_TAP_INTERNAL_KEY = 0x05
const PSBT_OUT_TAP_INTERNAL_KEY: u64 = 0x05;
/// Type: Taproot Tree PSBT_OUT_TAP_TREE = 0x06
const PSBT_OUT_TAP_TREE: u64 = 0x06;
/// Type: Taproot Key BIP 32 Derivation Path PSBT_OUT_TAP_BIP32_DERIVATION = 0x07
const PSBT_OUT_TAP_BIP32_DERIVATION: u64 = 0x07;

/// One leaf of a `PSBT_OUT_TAP_TREE` value, in depth-first order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapTreeLeaf {
    /// Depth of the leaf.
    pub depth: u8,
    /// Leaf version.
    pub leaf_version: LeafVersion,
    /// The leaf script.
    pub script: ScriptBuf,
}

/// A key-value map for an output of the corresponding index in the unsigned
/// transaction.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Output {
    /// The redeem script for this output.
    pub redeem_script: Option<ScriptBuf>,
    /// The witness script for this output.
    pub witness_script: Option<ScriptBuf>,
    /// A map from public keys needed to spend this output to their
    /// corresponding master key fingerprints and derivation paths.
    pub bip32_derivation: BTreeMap<bitcoin::PublicKey, KeySource>,
    /// The internal pubkey.
    pub tap_internal_key: Option<XOnlyPublicKey>,
    /// Taproot Output tree.
    pub tap_tree: Option<Vec<TapTreeLeaf>>,
    /// Map of tap root x only keys to origin info and leaf hashes contained in it.
    pub tap_key_origins: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>,
    /// Unknown key-value pairs for this output.
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

impl Output {
    /// Names of the fields present, as `decodepsbt` reports them.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = vec![];
        let mut push = |present: bool, name: &'static str| {
            if present {
                names.push(name);
            }
        };
        push(self.redeem_script.is_some(), "redeem_script");
        push(self.witness_script.is_some(), "witness_script");
        push(!self.bip32_derivation.is_empty(), "bip32_derivs");
        push(self.tap_internal_key.is_some(), "taproot_internal_key");
        push(self.tap_tree.is_some(), "taproot_tree");
        push(!self.tap_key_origins.is_empty(), "taproot_bip32_derivs");
        push(!self.unknown.is_empty(), "unknown");
        names
    }

    /// Merges `other` into this output. Differing values are a conflict.
    pub fn combine(&mut self, index: usize, other: Output) -> Result<(), Error> {
        let loc = Location::Output(index);
        merge_option(loc, "redeem_script", &mut self.redeem_script, other.redeem_script)?;
        merge_option(loc, "witness_script", &mut self.witness_script, other.witness_script)?;
        merge_map(loc, "bip32_derivs", &mut self.bip32_derivation, other.bip32_derivation)?;
        merge_option(loc, "taproot_internal_key", &mut self.tap_internal_key, other.tap_internal_key)?;
        merge_option(loc, "taproot_tree", &mut self.tap_tree, other.tap_tree)?;
        merge_map(loc, "taproot_bip32_derivs", &mut self.tap_key_origins, other.tap_key_origins)?;
        keep_existing(&mut self.unknown, other.unknown);
        Ok(())
    }

    pub(crate) fn decode(pairs: Vec<raw::Pair>) -> Result<Output, DecodeError> {
        let mut output = Output::default();
        for raw::Pair { key, value } in pairs {
            match key.type_value {
                PSBT_OUT_REDEEM_SCRIPT => {
                    expect_empty_key(&key)?;
                    output.redeem_script = Some(ScriptBuf::from_bytes(value));
                }
                PSBT_OUT_WITNESS_SCRIPT => {
                    expect_empty_key(&key)?;
                    output.witness_script = Some(ScriptBuf::from_bytes(value));
                }
                PSBT_OUT_BIP32_DERIVATION => {
                    let pk = key_pubkey(&key)?;
                    output.bip32_derivation.insert(pk, decode_key_source(&key, &value)?);
                }
                PSBT_OUT_TAP_INTERNAL_KEY => {
                    expect_empty_key(&key)?;
                    let xonly =
                        XOnlyPublicKey::from_slice(&value).map_err(|e| invalid_value(&key, e))?;
                    output.tap_internal_key = Some(xonly);
                }
                PSBT_OUT_TAP_TREE => {
                    expect_empty_key(&key)?;
                    output.tap_tree = Some(decode_tap_tree(&key, &value)?);
                }
                PSBT_OUT_TAP_BIP32_DERIVATION => {
                    let xonly = key_xonly(&key)?;
                    output.tap_key_origins.insert(xonly, decode_tap_key_origin(&key, &value)?);
                }
                _ => {
                    output.unknown.insert(key, value);
                }
            }
        }
        Ok(output)
    }
}

fn decode_tap_tree(key: &raw::Key, value: &[u8]) -> Result<Vec<TapTreeLeaf>, DecodeError> {
    let mut reader = raw::Reader::new(value);
    let mut leaves = vec![];
    while reader.remaining() > 0 {
        let header = reader.read_slice(2).map_err(|e| invalid_value(key, e))?;
        let depth = header[0];
        if usize::from(depth) > TAPROOT_CONTROL_MAX_NODE_COUNT {
            return Err(invalid_value(key, format_args!("leaf depth {} too large", depth)));
        }
        let leaf_version = LeafVersion::from_consensus(header[1]).map_err(|e| invalid_value(key, e))?;
        let len = reader.read_varint().map_err(|e| invalid_value(key, e))?;
        if len > reader.remaining() as u64 {
            return Err(invalid_value(key, DecodeError::UnexpectedEof));
        }
        let script = reader.read_slice(len as usize).map_err(|e| invalid_value(key, e))?;
        leaves.push(TapTreeLeaf { depth, leaf_version, script: ScriptBuf::from_bytes(script.to_vec()) });
    }
    if leaves.is_empty() {
        return Err(invalid_value(key, "empty taproot tree"));
    }
    Ok(leaves)
}

impl Map for Output {
    fn get_pairs(&self) -> Vec<raw::Pair> {
        let mut rv: Vec<raw::Pair> = Default::default();
        let mut push = |key: raw::Key, value: Vec<u8>| rv.push(raw::Pair { key, value });

        if let Some(ref script) = self.redeem_script {
            push(raw::Key::new(PSBT_OUT_REDEEM_SCRIPT), script.to_bytes());
        }
        if let Some(ref script) = self.witness_script {
            push(raw::Key::new(PSBT_OUT_WITNESS_SCRIPT), script.to_bytes());
        }
        for (pk, origin) in &self.bip32_derivation {
            let mut value = vec![];
            encode_key_source(&mut value, origin);
            push(raw::Key::with_data(PSBT_OUT_BIP32_DERIVATION, pk.to_bytes()), value);
        }
        if let Some(ref xonly) = self.tap_internal_key {
            push(raw::Key::new(PSBT_OUT_TAP_INTERNAL_KEY), xonly.serialize().to_vec());
        }
        if let Some(ref leaves) = self.tap_tree {
            let mut value = vec![];
            for leaf in leaves {
                value.push(leaf.depth);
                value.push(leaf.leaf_version.to_consensus());
                push_var_slice(&mut value, leaf.script.as_bytes());
            }
            push(raw::Key::new(PSBT_OUT_TAP_TREE), value);
        }
        for (xonly, (leaf_hashes, origin)) in &self.tap_key_origins {
            push(
                raw::Key::with_data(PSBT_OUT_TAP_BIP32_DERIVATION, xonly.serialize().to_vec()),
                encode_tap_key_origin(leaf_hashes, origin),
            );
        }
        for (key, value) in &self.unknown {
            push(key.clone(), value.clone());
        }
        rv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex_script;

    #[test]
    fn tap_tree_roundtrip() {
        let mut output = Output {
            tap_tree: Some(vec![
                TapTreeLeaf { depth: 1, leaf_version: LeafVersion::TapScript, script: hex_script("51") },
                TapTreeLeaf { depth: 1, leaf_version: LeafVersion::TapScript, script: hex_script("52") },
            ]),
            ..Default::default()
        };
        output.unknown.insert(raw::Key::with_data(0xfc, vec![]), vec![]);

        let pairs = output.get_pairs();
        assert_eq!(pairs[0].value, vec![0x01, 0xc0, 0x01, 0x51, 0x01, 0xc0, 0x01, 0x52]);
        assert_eq!(Output::decode(pairs).unwrap(), output);
        assert_eq!(output.field_names(), vec!["taproot_tree", "unknown"]);
    }

    #[test]
    fn tap_tree_errors() {
        let key = raw::Key::new(PSBT_OUT_TAP_TREE);
        assert!(decode_tap_tree(&key, &[]).is_err());
        assert!(decode_tap_tree(&key, &[0x01, 0xc0, 0x02, 0x51]).is_err());
        assert!(decode_tap_tree(&key, &[0x81, 0xc0, 0x01, 0x51]).is_err());
        assert!(decode_tap_tree(&key, &[0x01, 0xc1, 0x01, 0x51]).is_err());
    }

    #[test]
    fn combine_conflicts() {
        let mut ours = Output { tap_internal_key: None, ..Default::default() };
        let xonly: XOnlyPublicKey =
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798".parse().unwrap();
        let theirs = Output { tap_internal_key: Some(xonly), ..Default::default() };
        ours.combine(0, theirs.clone()).unwrap();
        ours.combine(0, theirs).unwrap();
        assert_eq!(ours.tap_internal_key, Some(xonly));

        let other: XOnlyPublicKey =
            "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0".parse().unwrap();
        assert_eq!(
            ours.combine(1, Output { tap_internal_key: Some(other), ..Default::default() }),
            Err(Error::ConflictingData { location: Location::Output(1), field: "taproot_internal_key" })
        );
    }
}
