// SPDX-License-Identifier: CC0-1.0

//! # PSBT Signer
//!
//! Signs the inputs of a PSBT with the keys of a [`KeyStore`]: Taproot key
//! path and `pk`/`pkh` script path spends with Schnorr signatures, and legacy
//! `pk`/`pkh` outputs with ECDSA.

use core::fmt;
use std::collections::BTreeMap;
use std::error;

use bitcoin::hashes::Hash;
use bitcoin::psbt::PsbtSighashType;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, Signing, Verification, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::{ecdsa, taproot, EcdsaSighashType, PrivateKey, TapSighashType, Transaction, TxOut};

use super::template::{LeafTemplate, LegacyTemplate};
use super::Psbt;
use crate::descriptor::Descriptor;
use crate::taproot::{leaf_hash, tweak_hash, tweak_scalar, TaprootError};

/// Private keys available for signing, indexed by their public keys.
#[derive(Clone, Default)]
pub struct KeyStore {
    ecdsa: BTreeMap<bitcoin::PublicKey, PrivateKey>,
    xonly: BTreeMap<XOnlyPublicKey, Keypair>,
}

impl KeyStore {
    /// An empty store.
    pub fn new() -> Self { KeyStore::default() }

    /// Adds a private key, usable for ECDSA under its public key and for
    /// Schnorr under its x-only key.
    pub fn insert<C: Signing>(&mut self, secp: &Secp256k1<C>, key: PrivateKey) {
        let keypair = Keypair::from_secret_key(secp, &key.inner);
        self.xonly.insert(keypair.x_only_public_key().0, keypair);
        self.ecdsa.insert(key.public_key(secp), key);
    }

    /// Adds every private key of `descriptor`.
    pub fn extend_from_descriptor<C: Signing>(&mut self, secp: &Secp256k1<C>, descriptor: &Descriptor) {
        for key in descriptor.private_keys() {
            self.insert(secp, key);
        }
    }

    /// Number of private keys.
    pub fn len(&self) -> usize { self.xonly.len() }

    /// Whether the store has no keys.
    pub fn is_empty(&self) -> bool { self.xonly.is_empty() }

    /// The key pair for an x-only key.
    pub fn get_xonly(&self, key: &XOnlyPublicKey) -> Option<&Keypair> { self.xonly.get(key) }

    /// The private key for a public key, in the same compression.
    pub fn get_ecdsa(&self, key: &bitcoin::PublicKey) -> Option<&PrivateKey> { self.ecdsa.get(key) }

    fn xonly_by_hash(&self, hash: &[u8; 20]) -> Option<(&XOnlyPublicKey, &Keypair)> {
        self.xonly.iter().find(|(_, keypair)| {
            bitcoin::PublicKey::new(keypair.public_key()).pubkey_hash().to_byte_array() == *hash
        })
    }

    fn ecdsa_by_hash(&self, hash: &[u8; 20]) -> Option<(&bitcoin::PublicKey, &PrivateKey)> {
        self.ecdsa.iter().find(|(key, _)| key.pubkey_hash().to_byte_array() == *hash)
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyStore").field("keys", &self.xonly.keys()).finish()
    }
}

/// A signature added by [`Psbt::sign`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignedBy {
    /// A Taproot key path signature, by the internal key.
    KeyPath(XOnlyPublicKey),
    /// A Taproot script path signature for a leaf.
    ScriptPath(XOnlyPublicKey, TapLeafHash),
    /// An ECDSA signature.
    Ecdsa(bitcoin::PublicKey),
}

/// The signatures added to each input, by input index.
pub type SigningKeys = BTreeMap<usize, Vec<SignedBy>>;

/// Ways signing can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignError {
    /// The sighash type of the input does not apply, or the sighash could not
    /// be computed.
    Sighash {
        /// Index of the input.
        index: usize,
        /// What went wrong.
        reason: String,
    },
    /// Signing for all inputs needs the output spent by every input.
    MissingPrevouts {
        /// Index of the input being signed.
        index: usize,
    },
    /// The internal key could not be tweaked.
    Tweak {
        /// Index of the input.
        index: usize,
        /// The tweak error.
        error: TaprootError,
    },
    /// The tweaked internal key is not the output key of the spent output.
    OutputKeyMismatch {
        /// Index of the input.
        index: usize,
    },
}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SignError::Sighash { index, ref reason } => {
                write!(f, "input {}: cannot compute sighash: {}", index, reason)
            }
            SignError::MissingPrevouts { index } => {
                write!(f, "input {}: the outputs spent by all inputs are needed", index)
            }
            SignError::Tweak { index, ref error } => write!(f, "input {}: {}", index, error),
            SignError::OutputKeyMismatch { index } => {
                write!(f, "input {}: internal key and merkle root do not match the output key", index)
            }
        }
    }
}

impl error::Error for SignError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            SignError::Tweak { ref error, .. } => Some(error),
            SignError::Sighash { .. }
            | SignError::MissingPrevouts { .. }
            | SignError::OutputKeyMismatch { .. } => None,
        }
    }
}

impl Psbt {
    /// Signs every input it can with `keys`.
    ///
    /// Finalized inputs, inputs whose spent output is unknown, and signatures
    /// already present are skipped. Returns the signatures added per input.
    pub fn sign<C: Signing + Verification>(
        &mut self,
        keys: &KeyStore,
        secp: &Secp256k1<C>,
    ) -> Result<SigningKeys, SignError> {
        let tx = self.unsigned_tx().clone();
        let mut cache = SighashCache::new(&tx);
        let spent: Vec<Option<TxOut>> = (0..self.inputs.len()).map(|i| self.spent_output(i)).collect();

        let mut signed = SigningKeys::new();
        for index in 0..self.inputs.len() {
            if self.inputs[index].is_finalized() {
                continue;
            }
            let txout = match spent[index] {
                Some(ref txout) => txout,
                None => {
                    log::debug!("input {}: not signing, spent output unknown", index);
                    continue;
                }
            };
            let by = if txout.script_pubkey.is_p2tr() {
                self.sign_taproot(index, &spent, keys, secp, &mut cache)?
            } else if let Some(template) = LegacyTemplate::parse(&txout.script_pubkey) {
                self.sign_legacy(index, txout, template, keys, secp, &mut cache)?
            } else {
                log::debug!("input {}: not signing, unsupported script {}", index, txout.script_pubkey);
                vec![]
            };
            if !by.is_empty() {
                log::debug!("input {}: added {} signatures", index, by.len());
                signed.insert(index, by);
            }
        }
        Ok(signed)
    }

    fn sign_taproot<C: Signing + Verification>(
        &mut self,
        index: usize,
        spent: &[Option<TxOut>],
        keys: &KeyStore,
        secp: &Secp256k1<C>,
        cache: &mut SighashCache<&Transaction>,
    ) -> Result<Vec<SignedBy>, SignError> {
        let input = &mut self.inputs[index];
        let sighash_type = match input.sighash_type {
            Some(ty) => ty
                .taproot_hash_ty()
                .map_err(|e| SignError::Sighash { index, reason: e.to_string() })?,
            None => TapSighashType::Default,
        };
        let mut by = vec![];

        let key_path_key = match input.tap_internal_key {
            Some(key) if input.tap_key_sig.is_none() => keys.get_xonly(&key).map(|kp| (key, kp)),
            _ => None,
        };
        if let Some((internal_key, keypair)) = key_path_key {
            let tweak = tweak_scalar(tweak_hash(&internal_key, input.tap_merkle_root))
                .map_err(|error| SignError::Tweak { index, error })?;
            let tweaked = keypair
                .add_xonly_tweak(secp, &tweak)
                .map_err(|_| SignError::Tweak { index, error: TaprootError::TweakOutOfRange })?;
            let output_key = tweaked.x_only_public_key().0;
            let spk = spent[index].as_ref().map(|txout| txout.script_pubkey.as_bytes());
            if spk.map(|spk| &spk[2..]) != Some(&output_key.serialize()[..]) {
                return Err(SignError::OutputKeyMismatch { index });
            }
            let sighash = taproot_sighash(cache, index, spent, sighash_type, None)?;
            let msg = Message::from_digest(sighash.to_byte_array());
            input.tap_key_sig = Some(taproot::Signature {
                signature: secp.sign_schnorr_no_aux_rand(&msg, &tweaked),
                sighash_type,
            });
            by.push(SignedBy::KeyPath(internal_key));
        }

        let leaves: Vec<_> = input
            .tap_scripts
            .values()
            .filter(|(_, version)| *version == LeafVersion::TapScript)
            .filter_map(|(script, version)| {
                let keypair = match LeafTemplate::parse(script)? {
                    LeafTemplate::Pk(key) => keys.get_xonly(&key)?,
                    LeafTemplate::Pkh(hash) => keys.xonly_by_hash(&hash)?.1,
                };
                Some((*keypair, leaf_hash(script, *version)))
            })
            .collect();
        for (keypair, leaf_hash) in leaves {
            let key = keypair.x_only_public_key().0;
            if input.tap_script_sigs.contains_key(&(key, leaf_hash)) {
                continue;
            }
            let sighash = taproot_sighash(cache, index, spent, sighash_type, Some(leaf_hash))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_schnorr_no_aux_rand(&msg, &keypair);
            input
                .tap_script_sigs
                .insert((key, leaf_hash), taproot::Signature { signature, sighash_type });
            by.push(SignedBy::ScriptPath(key, leaf_hash));
        }
        Ok(by)
    }

    fn sign_legacy<C: Signing>(
        &mut self,
        index: usize,
        txout: &TxOut,
        template: LegacyTemplate,
        keys: &KeyStore,
        secp: &Secp256k1<C>,
        cache: &mut SighashCache<&Transaction>,
    ) -> Result<Vec<SignedBy>, SignError> {
        let input = &mut self.inputs[index];
        let (public_key, private_key) = match template {
            LegacyTemplate::Pk(pk) => match keys.get_ecdsa(&pk) {
                Some(sk) => (pk, sk),
                None => return Ok(vec![]),
            },
            LegacyTemplate::Pkh(hash) => match keys.ecdsa_by_hash(&hash) {
                Some((pk, sk)) => (*pk, sk),
                None => return Ok(vec![]),
            },
        };
        if input.partial_sigs.contains_key(&public_key) {
            return Ok(vec![]);
        }
        let sighash_type = input
            .sighash_type
            .map(PsbtSighashType::ecdsa_hash_ty)
            .transpose()
            .map_err(|e| SignError::Sighash { index, reason: e.to_string() })?
            .unwrap_or(EcdsaSighashType::All);
        let sighash = cache
            .legacy_signature_hash(index, &txout.script_pubkey, sighash_type.to_u32())
            .map_err(|e| SignError::Sighash { index, reason: e.to_string() })?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_ecdsa(&msg, &private_key.inner);
        input.partial_sigs.insert(public_key, ecdsa::Signature { signature, sighash_type });
        Ok(vec![SignedBy::Ecdsa(public_key)])
    }
}

fn taproot_sighash(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    spent: &[Option<TxOut>],
    sighash_type: TapSighashType,
    leaf_hash: Option<TapLeafHash>,
) -> Result<bitcoin::TapSighash, SignError> {
    let anyone_can_pay = matches!(
        sighash_type,
        TapSighashType::AllPlusAnyoneCanPay
            | TapSighashType::NonePlusAnyoneCanPay
            | TapSighashType::SinglePlusAnyoneCanPay
    );
    let res = if anyone_can_pay {
        let txout = spent[index].as_ref().ok_or(SignError::MissingPrevouts { index })?;
        let prevouts = Prevouts::One(index, txout);
        match leaf_hash {
            Some(leaf_hash) => {
                cache.taproot_script_spend_signature_hash(index, &prevouts, leaf_hash, sighash_type)
            }
            None => cache.taproot_key_spend_signature_hash(index, &prevouts, sighash_type),
        }
    } else {
        let all = spent
            .iter()
            .cloned()
            .collect::<Option<Vec<TxOut>>>()
            .ok_or(SignError::MissingPrevouts { index })?;
        let prevouts = Prevouts::All(&all);
        match leaf_hash {
            Some(leaf_hash) => {
                cache.taproot_script_spend_signature_hash(index, &prevouts, leaf_hash, sighash_type)
            }
            None => cache.taproot_key_spend_signature_hash(index, &prevouts, sighash_type),
        }
    };
    res.map_err(|e| SignError::Sighash { index, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use bitcoin::{absolute, transaction, Amount, OutPoint, ScriptBuf, Sequence, TxIn, Witness};

    use super::*;

    const NUMS: &str = "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";
    const X: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn key(byte: u8) -> PrivateKey {
        PrivateKey::from_slice(&[byte; 32], bitcoin::Network::Regtest).unwrap()
    }

    fn funded(descriptors: &[&Descriptor]) -> (Vec<Transaction>, Psbt) {
        let prev = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![0x51, 0x51]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: descriptors
                .iter()
                .map(|d| TxOut { value: Amount::from_sat(50_000), script_pubkey: d.script_pubkey() })
                .collect(),
        };
        let txid = prev.compute_txid();
        let prevouts: Vec<_> = (0..descriptors.len() as u32).map(|vout| OutPoint { txid, vout }).collect();
        (vec![prev], Psbt::create(&prevouts, &[]))
    }

    #[test]
    fn key_store() {
        let secp = Secp256k1::new();
        let mut keys = KeyStore::new();
        assert!(keys.is_empty());
        keys.insert(&secp, key(1));
        assert_eq!(keys.len(), 1);
        let pk = key(1).public_key(&secp);
        assert!(keys.get_ecdsa(&pk).is_some());
        assert!(keys.get_xonly(&pk.inner.x_only_public_key().0).is_some());
        assert!(keys.ecdsa_by_hash(&pk.pubkey_hash().to_byte_array()).is_some());
        // Tapscript pkh leaves hash the compressed key, not the x-only one.
        assert!(keys.xonly_by_hash(&pk.pubkey_hash().to_byte_array()).is_some());
        let xonly = pk.inner.x_only_public_key().0;
        let xonly_hash = bitcoin::hashes::hash160::Hash::hash(&xonly.serialize()).to_byte_array();
        assert!(keys.xonly_by_hash(&xonly_hash).is_none());
        assert!(!format!("{:?}", keys).contains(&key(1).to_wif()));
    }

    #[test]
    fn sign_script_path_and_legacy() {
        let secp = Secp256k1::new();
        let tap =
            Descriptor::from_str(&format!("tap({},pkh({}))", NUMS, key(1).to_wif())).unwrap();
        let pkh = Descriptor::from_str(&format!("pkh({})", key(2).to_wif())).unwrap();
        let (chain, mut psbt) = funded(&[&tap, &pkh]);
        psbt.update_with_descriptors(&chain, &[tap.clone(), pkh.clone()]).unwrap();

        let mut keys = KeyStore::new();
        keys.extend_from_descriptor(&secp, &tap);
        keys.extend_from_descriptor(&secp, &pkh);
        let signed = psbt.sign(&keys, &secp).unwrap();

        let xonly = key(1).public_key(&secp).inner.x_only_public_key().0;
        let leaf = tap.resolve().taproot().unwrap().leaves[0].leaf_hash;
        assert_eq!(signed[&0], vec![SignedBy::ScriptPath(xonly, leaf)]);
        assert_eq!(signed[&1], vec![SignedBy::Ecdsa(key(2).public_key(&secp))]);
        // The NUMS internal key is never signed for.
        assert!(psbt.inputs[0].tap_key_sig.is_none());

        let sig = &psbt.inputs[0].tap_script_sigs[&(xonly, leaf)];
        let tx = psbt.unsigned_tx().clone();
        let prevouts: Vec<TxOut> = (0..2).map(|i| psbt.spent_output(i).unwrap()).collect();
        let sighash = SighashCache::new(&tx)
            .taproot_script_spend_signature_hash(0, &Prevouts::All(&prevouts), leaf, TapSighashType::Default)
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        secp.verify_schnorr(&sig.signature, &msg, &xonly).unwrap();

        // Signing again adds nothing.
        assert!(psbt.sign(&keys, &secp).unwrap().is_empty());
    }

    #[test]
    fn sign_key_path() {
        let secp = Secp256k1::new();
        let internal = key(3);
        let tap = Descriptor::from_str(&format!("tr({},pk({}))", internal.to_wif(), X)).unwrap();
        let (chain, mut psbt) = funded(&[&tap]);
        psbt.update_with_descriptors(&chain, &[tap.clone()]).unwrap();

        let mut keys = KeyStore::new();
        keys.extend_from_descriptor(&secp, &tap);
        let signed = psbt.sign(&keys, &secp).unwrap();
        let xonly = internal.public_key(&secp).inner.x_only_public_key().0;
        assert_eq!(signed[&0], vec![SignedBy::KeyPath(xonly)]);

        let sig = psbt.inputs[0].tap_key_sig.as_ref().unwrap();
        let output_key = tap.resolve().taproot().unwrap().spend_info.output_key();
        let tx = psbt.unsigned_tx().clone();
        let prevouts = [psbt.spent_output(0).unwrap()];
        let sighash = SighashCache::new(&tx)
            .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        secp.verify_schnorr(&sig.signature, &msg, &output_key).unwrap();
    }

    #[test]
    fn wrong_merkle_root() {
        let secp = Secp256k1::new();
        let tap = Descriptor::from_str(&format!("tr({})", key(4).to_wif())).unwrap();
        let (chain, mut psbt) = funded(&[&tap]);
        psbt.update_with_descriptors(&chain, &[tap.clone()]).unwrap();
        psbt.inputs[0].tap_merkle_root = Some(bitcoin::TapNodeHash::from_byte_array([1; 32]));

        let mut keys = KeyStore::new();
        keys.extend_from_descriptor(&secp, &tap);
        assert_eq!(psbt.sign(&keys, &secp), Err(SignError::OutputKeyMismatch { index: 0 }));
    }

    #[test]
    fn watch_only_signs_nothing() {
        let secp = Secp256k1::new();
        let tap =
            Descriptor::from_str(&format!("tap({},pkh({}))", NUMS, key(1).to_wif())).unwrap();
        let (chain, mut psbt) = funded(&[&tap]);
        psbt.update_with_descriptors(&chain, &[tap.to_public()]).unwrap();
        assert!(psbt.sign(&KeyStore::new(), &secp).unwrap().is_empty());
        assert!(psbt.inputs[0].tap_script_sigs.is_empty());
    }
}
