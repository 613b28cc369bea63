// SPDX-License-Identifier: CC0-1.0

use std::collections::BTreeMap;

use bitcoin::bip32::KeySource;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::psbt::PsbtSighashType;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash};
use bitcoin::{ecdsa, taproot, ScriptBuf, Transaction, TxOut, Witness};

use super::{
    consensus_value, decode_key_source, decode_tap_key_origin, encode_key_source,
    encode_tap_key_origin, expect_empty_key, invalid_value, keep_existing, key_pubkey, key_xonly,
    merge_map, merge_option, Map,
};
use crate::psbt::error::{DecodeError, Error, Location};
use crate::psbt::raw;
use crate::taproot::ControlBlock;

/// Type: Non-Witness UTXO PSBT_IN_NON_WITNESS_UTXO = 0x00
const PSBT_IN_NON_WITNESS_UTXO: u64 = 0x00;
/// Type: Witness UTXO PSBT_IN_WITNESS_UTXO = 0x01
const PSBT_IN_WITNESS_UTXO: u64 = 0x01;
/// Type: Partial Signature PSBT_IN_PARTIAL_SIG = 0x02
const PSBT_IN_PARTIAL_SIG: u64 = 0x02;
/// Type: Sighash Type PSBT_IN_SIGHASH_TYPE = 0x03
const PSBT_IN_SIGHASH_TYPE: u64 = 0x03;
/// Type: Redeem Script PSBT_IN_REDEEM_SCRIPT = 0x04
const PSBT_IN_REDEEM_SCRIPT: u64 = 0x04;
/// Type: Witness Script PSBT_IN_WITNESS_SCRIPT = 0x05
const PSBT_IN_WITNESS_SCRIPT: u64 = 0x05;
/// Type: BIP 32 Derivation Path PSBT_IN_BIP32_DERIVATION = 0x06
const PSBT_IN_BIP32_DERIVATION: u64 = 0x06;
/// Type: Finalized scriptSig PSBT_IN_FINAL_SCRIPTSIG = 0x07
const PSBT_IN_FINAL_SCRIPTSIG: u64 = 0x07;
/// Type: Finalized scriptWitness PSBT_IN_FINAL_SCRIPTWITNESS = 0x08
const PSBT_IN_FINAL_SCRIPTWITNESS: u64 = 0x08;
/// Type: Taproot Signature in Key Spend PSBT_IN_TAP_KEY_SIG = 0x13
const PSBT_IN_TAP_KEY_SIG: u64 = 0x13;
/// Type: Taproot Signature in Script Spend PSBT_IN_TAP_SCRIPT_SIG = 0x14
const PSBT_IN_TAP_SCRIPT_SIG: u64 = 0x14;
/// Type: Taproot Leaf Script PSBT_IN_TAP_LEAF_SCRIPT = 0x15
const PSBT_IN_TAP_LEAF_SCRIPT: u64 = 0x15;
/// Type: Taproot Key BIP 32 Derivation Path PSBT_IN_TAP_BIP32_DERIVATION = 0x16
const PSBT_IN_TAP_BIP32_DERIVATION: u64 = 0x16;
/// Type: Taproot Internal Key PSBT_IN_TAP_INTERNAL_KEY = 0x17
const PSBT_IN_TAP_INTERNAL_KEY: u64 = 0x17;
/// Type: Taproot Merkle Root PSBT_IN_TAP_MERKLE_ROOT = 0x18
const PSBT_IN_TAP_MERKLE_ROOT: u64 = 0x18;

/// A key-value map for an input of the corresponding index in the unsigned
/// transaction.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Input {
    /// The non-witness transaction this input spends from. Should only be
    /// `Some` for inputs which spend non-segwit outputs.
    pub non_witness_utxo: Option<Transaction>,
    /// The transaction output this input spends from. Should only be `Some`
    /// for inputs which spend segwit outputs.
    pub witness_utxo: Option<TxOut>,
    /// A map from public keys to their corresponding signature as would be
    /// pushed to the stack from a scriptSig.
    pub partial_sigs: BTreeMap<bitcoin::PublicKey, ecdsa::Signature>,
    /// The sighash type to be used for this input. Signatures for this input
    /// must use the sighash type.
    pub sighash_type: Option<PsbtSighashType>,
    /// The redeem script for this input.
    pub redeem_script: Option<ScriptBuf>,
    /// The witness script for this input.
    pub witness_script: Option<ScriptBuf>,
    /// A map from public keys needed to sign this input to their corresponding
    /// master key fingerprints and derivation paths.
    pub bip32_derivation: BTreeMap<bitcoin::PublicKey, KeySource>,
    /// The finalized, fully-constructed scriptSig with signatures and any other
    /// scripts necessary for this input to pass validation.
    pub final_script_sig: Option<ScriptBuf>,
    /// The finalized, fully-constructed scriptWitness with signatures and any
    /// other scripts necessary for this input to pass validation.
    pub final_script_witness: Option<Witness>,
    /// Serialized taproot signature with sighash type for key spend.
    pub tap_key_sig: Option<taproot::Signature>,
    /// Map of `<xonlypubkey>|<leafhash>` with signature.
    pub tap_script_sigs: BTreeMap<(XOnlyPublicKey, TapLeafHash), taproot::Signature>,
    /// Map of Control blocks to Script version pair.
    pub tap_scripts: BTreeMap<ControlBlock, (ScriptBuf, LeafVersion)>,
    /// Map of tap root x only keys to origin info and leaf hashes contained in it.
    pub tap_key_origins: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>,
    /// Taproot Internal key.
    pub tap_internal_key: Option<XOnlyPublicKey>,
    /// Taproot Merkle root.
    pub tap_merkle_root: Option<TapNodeHash>,
    /// Unknown key-value pairs for this input.
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

impl Input {
    /// Whether the input map has no fields at all.
    pub fn is_empty(&self) -> bool { *self == Input::default() }

    /// Whether the input carries a final scriptSig or witness.
    pub fn is_finalized(&self) -> bool {
        self.final_script_sig.is_some() || self.final_script_witness.is_some()
    }

    /// Names of the fields present, as `decodepsbt` reports them.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = vec![];
        let mut push = |present: bool, name: &'static str| {
            if present {
                names.push(name);
            }
        };
        push(self.non_witness_utxo.is_some(), "non_witness_utxo");
        push(self.witness_utxo.is_some(), "witness_utxo");
        push(!self.partial_sigs.is_empty(), "partial_signatures");
        push(self.sighash_type.is_some(), "sighash");
        push(self.redeem_script.is_some(), "redeem_script");
        push(self.witness_script.is_some(), "witness_script");
        push(!self.bip32_derivation.is_empty(), "bip32_derivs");
        push(self.final_script_sig.is_some(), "final_scriptSig");
        push(self.final_script_witness.is_some(), "final_scriptwitness");
        push(self.tap_key_sig.is_some(), "taproot_key_path_sig");
        push(!self.tap_script_sigs.is_empty(), "taproot_script_path_sigs");
        push(!self.tap_scripts.is_empty(), "taproot_scripts");
        push(!self.tap_key_origins.is_empty(), "taproot_bip32_derivs");
        push(self.tap_internal_key.is_some(), "taproot_internal_key");
        push(self.tap_merkle_root.is_some(), "taproot_merkle_root");
        push(!self.unknown.is_empty(), "unknown");
        names
    }

    /// Merges `other` into this input.
    ///
    /// Signatures and final fields already present are kept. Any other field
    /// holding a different value in `other` is a conflict.
    pub fn combine(&mut self, index: usize, other: Input) -> Result<(), Error> {
        let loc = Location::Input(index);
        merge_option(loc, "non_witness_utxo", &mut self.non_witness_utxo, other.non_witness_utxo)?;
        merge_option(loc, "witness_utxo", &mut self.witness_utxo, other.witness_utxo)?;
        merge_option(loc, "redeem_script", &mut self.redeem_script, other.redeem_script)?;
        merge_option(loc, "witness_script", &mut self.witness_script, other.witness_script)?;
        merge_map(loc, "bip32_derivs", &mut self.bip32_derivation, other.bip32_derivation)?;
        merge_map(loc, "taproot_scripts", &mut self.tap_scripts, other.tap_scripts)?;
        merge_map(loc, "taproot_bip32_derivs", &mut self.tap_key_origins, other.tap_key_origins)?;
        merge_option(loc, "taproot_internal_key", &mut self.tap_internal_key, other.tap_internal_key)?;
        merge_option(loc, "taproot_merkle_root", &mut self.tap_merkle_root, other.tap_merkle_root)?;

        if self.sighash_type.is_none() {
            self.sighash_type = other.sighash_type;
        }
        keep_existing(&mut self.partial_sigs, other.partial_sigs);
        if self.tap_key_sig.is_none() {
            self.tap_key_sig = other.tap_key_sig;
        }
        keep_existing(&mut self.tap_script_sigs, other.tap_script_sigs);
        if self.final_script_sig.is_none() {
            self.final_script_sig = other.final_script_sig;
        }
        if self.final_script_witness.is_none() {
            self.final_script_witness = other.final_script_witness;
        }
        keep_existing(&mut self.unknown, other.unknown);
        Ok(())
    }

    /// Drops every field a finalized input no longer needs.
    pub(crate) fn clear_non_final(&mut self) {
        let kept = Input {
            non_witness_utxo: self.non_witness_utxo.take(),
            witness_utxo: self.witness_utxo.take(),
            final_script_sig: self.final_script_sig.take(),
            final_script_witness: self.final_script_witness.take(),
            unknown: core::mem::take(&mut self.unknown),
            ..Default::default()
        };
        *self = kept;
    }

    pub(crate) fn decode(pairs: Vec<raw::Pair>) -> Result<Input, DecodeError> {
        let mut input = Input::default();
        for raw::Pair { key, value } in pairs {
            match key.type_value {
                PSBT_IN_NON_WITNESS_UTXO => {
                    expect_empty_key(&key)?;
                    input.non_witness_utxo = Some(consensus_value(&key, &value)?);
                }
                PSBT_IN_WITNESS_UTXO => {
                    expect_empty_key(&key)?;
                    input.witness_utxo = Some(consensus_value(&key, &value)?);
                }
                PSBT_IN_PARTIAL_SIG => {
                    let pk = key_pubkey(&key)?;
                    let sig = ecdsa::Signature::from_slice(&value)
                        .map_err(|e| invalid_value(&key, e))?;
                    input.partial_sigs.insert(pk, sig);
                }
                PSBT_IN_SIGHASH_TYPE => {
                    expect_empty_key(&key)?;
                    let ty: u32 = consensus_value(&key, &value)?;
                    input.sighash_type = Some(PsbtSighashType::from_u32(ty));
                }
                PSBT_IN_REDEEM_SCRIPT => {
                    expect_empty_key(&key)?;
                    input.redeem_script = Some(ScriptBuf::from_bytes(value));
                }
                PSBT_IN_WITNESS_SCRIPT => {
                    expect_empty_key(&key)?;
                    input.witness_script = Some(ScriptBuf::from_bytes(value));
                }
                PSBT_IN_BIP32_DERIVATION => {
                    let pk = key_pubkey(&key)?;
                    input.bip32_derivation.insert(pk, decode_key_source(&key, &value)?);
                }
                PSBT_IN_FINAL_SCRIPTSIG => {
                    expect_empty_key(&key)?;
                    input.final_script_sig = Some(ScriptBuf::from_bytes(value));
                }
                PSBT_IN_FINAL_SCRIPTWITNESS => {
                    expect_empty_key(&key)?;
                    input.final_script_witness = Some(consensus_value(&key, &value)?);
                }
                PSBT_IN_TAP_KEY_SIG => {
                    expect_empty_key(&key)?;
                    let sig =
                        taproot::Signature::from_slice(&value).map_err(|e| invalid_value(&key, e))?;
                    input.tap_key_sig = Some(sig);
                }
                PSBT_IN_TAP_SCRIPT_SIG => {
                    if key.key.len() != 64 {
                        return Err(DecodeError::InvalidKey(key));
                    }
                    let xonly = XOnlyPublicKey::from_slice(&key.key[..32])
                        .map_err(|_| DecodeError::InvalidKey(key.clone()))?;
                    let mut hash = [0; 32];
                    hash.copy_from_slice(&key.key[32..]);
                    let sig =
                        taproot::Signature::from_slice(&value).map_err(|e| invalid_value(&key, e))?;
                    input.tap_script_sigs.insert((xonly, TapLeafHash::from_byte_array(hash)), sig);
                }
                PSBT_IN_TAP_LEAF_SCRIPT => {
                    let cb = ControlBlock::decode(&key.key)
                        .map_err(|_| DecodeError::InvalidKey(key.clone()))?;
                    let (&version, script) = match value.split_last() {
                        Some(split) => split,
                        None => return Err(invalid_value(&key, "missing leaf version")),
                    };
                    let version =
                        LeafVersion::from_consensus(version).map_err(|e| invalid_value(&key, e))?;
                    if cb.leaf_version != version {
                        return Err(invalid_value(&key, "leaf version differs from control block"));
                    }
                    input.tap_scripts.insert(cb, (ScriptBuf::from_bytes(script.to_vec()), version));
                }
                PSBT_IN_TAP_BIP32_DERIVATION => {
                    let xonly = key_xonly(&key)?;
                    input.tap_key_origins.insert(xonly, decode_tap_key_origin(&key, &value)?);
                }
                PSBT_IN_TAP_INTERNAL_KEY => {
                    expect_empty_key(&key)?;
                    let xonly =
                        XOnlyPublicKey::from_slice(&value).map_err(|e| invalid_value(&key, e))?;
                    input.tap_internal_key = Some(xonly);
                }
                PSBT_IN_TAP_MERKLE_ROOT => {
                    expect_empty_key(&key)?;
                    let hash = <[u8; 32]>::try_from(&value[..])
                        .map_err(|_| invalid_value(&key, "merkle root is not 32 bytes"))?;
                    input.tap_merkle_root = Some(TapNodeHash::from_byte_array(hash));
                }
                _ => {
                    input.unknown.insert(key, value);
                }
            }
        }
        Ok(input)
    }
}

impl Map for Input {
    fn get_pairs(&self) -> Vec<raw::Pair> {
        let mut rv: Vec<raw::Pair> = Default::default();
        let mut push = |key: raw::Key, value: Vec<u8>| rv.push(raw::Pair { key, value });

        if let Some(ref tx) = self.non_witness_utxo {
            push(raw::Key::new(PSBT_IN_NON_WITNESS_UTXO), encode::serialize(tx));
        }
        if let Some(ref txout) = self.witness_utxo {
            push(raw::Key::new(PSBT_IN_WITNESS_UTXO), encode::serialize(txout));
        }
        for (pk, sig) in &self.partial_sigs {
            push(raw::Key::with_data(PSBT_IN_PARTIAL_SIG, pk.to_bytes()), sig.to_vec());
        }
        if let Some(ty) = self.sighash_type {
            push(raw::Key::new(PSBT_IN_SIGHASH_TYPE), ty.to_u32().to_le_bytes().to_vec());
        }
        if let Some(ref script) = self.redeem_script {
            push(raw::Key::new(PSBT_IN_REDEEM_SCRIPT), script.to_bytes());
        }
        if let Some(ref script) = self.witness_script {
            push(raw::Key::new(PSBT_IN_WITNESS_SCRIPT), script.to_bytes());
        }
        for (pk, origin) in &self.bip32_derivation {
            let mut value = vec![];
            encode_key_source(&mut value, origin);
            push(raw::Key::with_data(PSBT_IN_BIP32_DERIVATION, pk.to_bytes()), value);
        }
        if let Some(ref script) = self.final_script_sig {
            push(raw::Key::new(PSBT_IN_FINAL_SCRIPTSIG), script.to_bytes());
        }
        if let Some(ref witness) = self.final_script_witness {
            push(raw::Key::new(PSBT_IN_FINAL_SCRIPTWITNESS), encode::serialize(witness));
        }
        if let Some(ref sig) = self.tap_key_sig {
            push(raw::Key::new(PSBT_IN_TAP_KEY_SIG), sig.to_vec());
        }
        for (&(xonly, leaf_hash), sig) in &self.tap_script_sigs {
            let mut key = xonly.serialize().to_vec();
            key.extend_from_slice(leaf_hash.as_byte_array());
            push(raw::Key::with_data(PSBT_IN_TAP_SCRIPT_SIG, key), sig.to_vec());
        }
        for (cb, (script, version)) in &self.tap_scripts {
            let mut value = script.to_bytes();
            value.push(version.to_consensus());
            push(raw::Key::with_data(PSBT_IN_TAP_LEAF_SCRIPT, cb.serialize()), value);
        }
        for (xonly, (leaf_hashes, origin)) in &self.tap_key_origins {
            push(
                raw::Key::with_data(PSBT_IN_TAP_BIP32_DERIVATION, xonly.serialize().to_vec()),
                encode_tap_key_origin(leaf_hashes, origin),
            );
        }
        if let Some(ref xonly) = self.tap_internal_key {
            push(raw::Key::new(PSBT_IN_TAP_INTERNAL_KEY), xonly.serialize().to_vec());
        }
        if let Some(ref root) = self.tap_merkle_root {
            push(raw::Key::new(PSBT_IN_TAP_MERKLE_ROOT), root.to_byte_array().to_vec());
        }
        for (key, value) in &self.unknown {
            push(key.clone(), value.clone());
        }
        rv
    }
}
