// SPDX-License-Identifier: CC0-1.0

//! # PSBT Updater
//!
//! Fills in the spending information of inputs, and the Taproot information
//! of outputs, for every script that one of a set of descriptors produces.
//! No private keys are needed.

use std::collections::BTreeMap;

use bitcoin::{OutPoint, Transaction, TxOut, Txid};

use super::{Error, Input, Output, Psbt, TapTreeLeaf};
use crate::descriptor::{Descriptor, LegacySpend, Resolution, SpendInfo, TaprootSpend};

/// A source of the outputs spent by a transaction.
pub trait UtxoLookup {
    /// The output at `outpoint`, if it is known.
    fn txout(&self, outpoint: &OutPoint) -> Option<TxOut>;

    /// The full transaction `txid`, needed as the non-witness UTXO of legacy
    /// inputs.
    fn transaction(&self, _txid: &Txid) -> Option<Transaction> { None }
}

impl UtxoLookup for BTreeMap<OutPoint, TxOut> {
    fn txout(&self, outpoint: &OutPoint) -> Option<TxOut> { self.get(outpoint).cloned() }
}

impl UtxoLookup for [Transaction] {
    fn txout(&self, outpoint: &OutPoint) -> Option<TxOut> {
        self.transaction(&outpoint.txid)?.output.get(outpoint.vout as usize).cloned()
    }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.iter().find(|tx| tx.compute_txid() == *txid).cloned()
    }
}

impl UtxoLookup for Vec<Transaction> {
    fn txout(&self, outpoint: &OutPoint) -> Option<TxOut> { self[..].txout(outpoint) }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> { self[..].transaction(txid) }
}

impl<T: UtxoLookup + ?Sized> UtxoLookup for &T {
    fn txout(&self, outpoint: &OutPoint) -> Option<TxOut> { (**self).txout(outpoint) }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> { (**self).transaction(txid) }
}

impl Psbt {
    /// Adds the spending information of each input and output whose script
    /// one of `descriptors` produces.
    ///
    /// The script of a spent output is taken from the input's UTXO fields, or
    /// from `utxos`. Inputs and outputs without a matching descriptor are left
    /// untouched, and so are finalized inputs. Running the update twice gives
    /// the same PSBT; information
    /// which differs from what is already present is a
    /// [`Error::ConflictingData`], and leaves the PSBT unchanged.
    ///
    /// Returns the number of inputs and outputs which matched a descriptor.
    pub fn update_with_descriptors<U: UtxoLookup + ?Sized>(
        &mut self,
        utxos: &U,
        descriptors: &[Descriptor],
    ) -> Result<usize, Error> {
        let resolutions: Vec<Resolution> = descriptors.iter().map(Descriptor::resolve).collect();
        let find = |spk: &bitcoin::Script| resolutions.iter().find(|r| r.script_pubkey.as_script() == spk);

        let mut matched = 0;
        let mut inputs = self.inputs.clone();
        for (index, input) in inputs.iter_mut().enumerate() {
            if input.is_finalized() {
                log::debug!("input {}: already finalized", index);
                continue;
            }
            let prevout = self.unsigned_tx().input[index].previous_output;
            let txout = match self.spent_output(index).or_else(|| lookup_txout(utxos, &prevout)) {
                Some(txout) => txout,
                None => {
                    log::debug!("input {}: spent output {} is unknown", index, prevout);
                    continue;
                }
            };
            let resolution = match find(txout.script_pubkey.as_script()) {
                Some(resolution) => resolution,
                None => continue,
            };
            let update = match resolution.spend {
                SpendInfo::Taproot(ref tap) => {
                    log::debug!(
                        "input {}: taproot output with {} leaves, key path {:?}",
                        index,
                        tap.leaves.len(),
                        tap.key_path
                    );
                    taproot_input(tap, txout)
                }
                SpendInfo::Legacy(ref legacy) => {
                    let tx = utxos
                        .transaction(&prevout.txid)
                        .filter(|tx| tx.compute_txid() == prevout.txid);
                    if tx.is_none() && input.non_witness_utxo.is_none() {
                        log::debug!("input {}: transaction {} is unknown", index, prevout.txid);
                    }
                    legacy_input(legacy, tx)
                }
            };
            input.combine(index, update)?;
            matched += 1;
        }

        let mut outputs = self.outputs.clone();
        for (index, output) in outputs.iter_mut().enumerate() {
            let spk = self.unsigned_tx().output[index].script_pubkey.as_script();
            let update = match find(spk).map(|r| &r.spend) {
                Some(SpendInfo::Taproot(tap)) => taproot_output(tap),
                Some(SpendInfo::Legacy(legacy)) => legacy_output(legacy),
                None => continue,
            };
            log::debug!("output {}: matched a descriptor", index);
            output.combine(index, update)?;
            matched += 1;
        }

        self.inputs = inputs;
        self.outputs = outputs;
        Ok(matched)
    }
}

fn lookup_txout<U: UtxoLookup + ?Sized>(utxos: &U, prevout: &OutPoint) -> Option<TxOut> {
    utxos.txout(prevout).or_else(|| {
        utxos.transaction(&prevout.txid)?.output.get(prevout.vout as usize).cloned()
    })
}

fn taproot_input(tap: &TaprootSpend, txout: TxOut) -> Input {
    Input {
        witness_utxo: Some(txout),
        tap_internal_key: Some(tap.internal_key()),
        tap_merkle_root: tap.spend_info.merkle_root(),
        tap_scripts: tap
            .leaves
            .iter()
            .map(|leaf| (leaf.control_block.clone(), (leaf.script.clone(), leaf.leaf_version)))
            .collect(),
        tap_key_origins: tap.tap_key_origins(),
        ..Default::default()
    }
}

fn legacy_input(legacy: &LegacySpend, tx: Option<Transaction>) -> Input {
    let mut input = Input { non_witness_utxo: tx, ..Default::default() };
    input.bip32_derivation.insert(legacy.key, legacy.key_origin.clone());
    input
}

fn taproot_output(tap: &TaprootSpend) -> Output {
    let tap_tree = if tap.leaves.is_empty() {
        None
    } else {
        Some(
            tap.leaves
                .iter()
                .map(|leaf| TapTreeLeaf {
                    depth: leaf.depth,
                    leaf_version: leaf.leaf_version,
                    script: leaf.script.clone(),
                })
                .collect(),
        )
    };
    Output {
        tap_internal_key: Some(tap.internal_key()),
        tap_tree,
        tap_key_origins: tap.tap_key_origins(),
        ..Default::default()
    }
}

fn legacy_output(legacy: &LegacySpend) -> Output {
    let mut output = Output::default();
    output.bip32_derivation.insert(legacy.key, legacy.key_origin.clone());
    output
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use bitcoin::hashes::Hash;
    use bitcoin::{absolute, transaction, Amount, Network, ScriptBuf, Sequence, TxIn, Witness};

    use super::*;
    use crate::psbt::Location;

    const NUMS: &str = "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";
    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const K2: &str = "03cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";

    fn funding(spks: &[ScriptBuf]) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_byte_array([1; 32]), vout: 0 },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::from_slice(&[vec![0u8; 64]]),
            }],
            output: spks
                .iter()
                .map(|spk| TxOut { value: Amount::from_sat(100_000), script_pubkey: spk.clone() })
                .collect(),
        }
    }

    fn setup() -> (Descriptor, Descriptor, Vec<Transaction>, Psbt) {
        let tap = Descriptor::from_str(&format!("tap({},pkh([d34db33f/86'/1'/0']{}))", NUMS, G))
            .unwrap();
        let pkh = Descriptor::from_str(&format!("pkh({})", K2)).unwrap();
        let prev = funding(&[tap.script_pubkey(), pkh.script_pubkey(), ScriptBuf::new()]);
        let txid = prev.compute_txid();
        let change = tap.address(Network::Regtest).unwrap();
        let psbt = Psbt::create(
            &[
                OutPoint { txid, vout: 0 },
                OutPoint { txid, vout: 1 },
                OutPoint { txid, vout: 2 },
            ],
            &[(change, Amount::from_sat(250_000))],
        );
        (tap, pkh, vec![prev], psbt)
    }

    #[test]
    fn taproot_and_legacy_inputs() {
        let (tap, pkh, chain, mut psbt) = setup();
        let n = psbt.update_with_descriptors(&chain, &[tap.clone(), pkh]).unwrap();
        assert_eq!(n, 3);

        let input = &psbt.inputs[0];
        assert_eq!(
            input.field_names(),
            vec![
                "witness_utxo",
                "taproot_scripts",
                "taproot_bip32_derivs",
                "taproot_internal_key",
                "taproot_merkle_root",
            ]
        );
        // Only the leaf key has an origin; the NUMS internal key has none.
        assert_eq!(input.tap_key_origins.len(), 1);
        let resolution = tap.resolve();
        let leaf = &resolution.taproot().unwrap().leaves[0];
        assert_eq!(input.tap_scripts.get(&leaf.control_block), Some(&(leaf.script.clone(), leaf.leaf_version)));

        assert_eq!(psbt.inputs[1].field_names(), vec!["non_witness_utxo", "bip32_derivs"]);
        assert!(psbt.inputs[2].is_empty());

        let output = &psbt.outputs[0];
        assert_eq!(
            output.field_names(),
            vec!["taproot_internal_key", "taproot_tree", "taproot_bip32_derivs"]
        );
        assert_eq!(output.tap_tree.as_ref().unwrap()[0].script, leaf.script);
    }

    #[test]
    fn idempotent() {
        let (tap, pkh, chain, mut psbt) = setup();
        psbt.update_with_descriptors(&chain, &[tap.clone(), pkh.clone()]).unwrap();
        let once = psbt.clone();
        psbt.update_with_descriptors(&chain, &[tap, pkh]).unwrap();
        assert_eq!(psbt, once);
    }

    #[test]
    fn no_match_no_change() {
        let (_, _, chain, mut psbt) = setup();
        let other = Descriptor::from_str(&format!("pk({})", G)).unwrap();
        let before = psbt.clone();
        assert_eq!(psbt.update_with_descriptors(&chain, &[other]).unwrap(), 0);
        assert_eq!(psbt, before);

        // Nothing is known about the spent outputs.
        let (tap, _, _, mut psbt) = setup();
        assert_eq!(psbt.update_with_descriptors(&BTreeMap::<OutPoint, TxOut>::new(), &[tap]).unwrap(), 1);
        assert!(psbt.inputs.iter().all(Input::is_empty));
    }

    #[test]
    fn conflict_leaves_psbt_unchanged() {
        let (tap, _, chain, mut psbt) = setup();
        psbt.inputs[0].tap_internal_key = Some(G[2..].parse().unwrap());
        let before = psbt.clone();
        assert_eq!(
            psbt.update_with_descriptors(&chain, &[tap]),
            Err(Error::ConflictingData { location: Location::Input(0), field: "taproot_internal_key" })
        );
        assert_eq!(psbt, before);
    }

    #[test]
    fn finalized_inputs_are_skipped() {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let key = bitcoin::PrivateKey::from_slice(&[1; 32], Network::Regtest).unwrap();
        let tap = Descriptor::from_str(&format!("tap({},pkh({}))", NUMS, key.to_wif())).unwrap();
        let prev = funding(&[tap.script_pubkey()]);
        let mut psbt = Psbt::create(&[OutPoint { txid: prev.compute_txid(), vout: 0 }], &[]);
        let chain = vec![prev];

        assert_eq!(psbt.update_with_descriptors(&chain, &[tap.clone()]).unwrap(), 1);
        let mut keys = crate::psbt::KeyStore::new();
        keys.extend_from_descriptor(&secp, &tap);
        psbt.sign(&keys, &secp).unwrap();
        psbt.finalize_mut().unwrap();
        assert_eq!(psbt.inputs[0].field_names(), vec!["witness_utxo", "final_scriptwitness"]);

        let finalized = psbt.clone();
        assert_eq!(psbt.update_with_descriptors(&chain, &[tap]).unwrap(), 0);
        assert_eq!(psbt, finalized);
    }

    #[test]
    fn utxo_map_lookup() {
        let (tap, _, chain, mut psbt) = setup();
        let prevout = psbt.unsigned_tx().input[0].previous_output;
        let mut utxos = BTreeMap::new();
        utxos.insert(prevout, chain[0].output[0].clone());
        psbt.update_with_descriptors(&utxos, &[tap]).unwrap();
        assert!(psbt.inputs[0].tap_internal_key.is_some());
    }
}
