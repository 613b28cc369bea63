// SPDX-License-Identifier: CC0-1.0

//! # PSBT Finalizer
//!
//! This module implements the Finalizer and Extractor roles defined in
//! BIP 174, PSBT, described at
//! `https://github.com/bitcoin/bips/blob/master/bip-0174.mediawiki`.
//!
//! Key path spends are preferred. Otherwise the cheapest leaf which has a
//! signature is used.

use core::fmt;
use std::error;

use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Secp256k1, Verification, XOnlyPublicKey};
use bitcoin::{ScriptBuf, Transaction, TxOut, Witness};

use super::template::{LeafTemplate, LegacyTemplate};
use super::{Input, Psbt};
use crate::descriptor::NumsPoint;
use crate::taproot::leaf_hash;
use crate::util::compressed_key_with_hash;

/// Why an input could not be finalized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IncompleteReason {
    /// The input has no fields at all.
    NoSpendingInformation,
    /// The output spent by the input is unknown.
    MissingUtxo,
    /// No signature satisfies any of the ways to spend the input.
    MissingSignature,
    /// The spent script, and every known leaf, has a shape this crate cannot satisfy.
    UnsupportedScript,
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IncompleteReason::NoSpendingInformation => f.write_str("no spending information"),
            IncompleteReason::MissingUtxo => f.write_str("spent output is unknown"),
            IncompleteReason::MissingSignature => f.write_str("missing signature"),
            IncompleteReason::UnsupportedScript => f.write_str("unsupported script"),
        }
    }
}

/// An input which could not be finalized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IncompleteData {
    /// Index of the input.
    pub index: usize,
    /// What is missing.
    pub reason: IncompleteReason,
}

impl fmt::Display for IncompleteData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "input {} cannot be finalized: {}", self.index, self.reason)
    }
}

impl error::Error for IncompleteData {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> { None }
}

impl Psbt {
    /// Finalizes every input which has enough signatures.
    ///
    /// Finalized inputs keep their UTXO, their final scriptSig or witness and
    /// their unknown fields; everything else is cleared. Inputs which cannot be
    /// finalized are left as they are, and reported.
    pub fn finalize_mut(&mut self) -> Result<(), Vec<IncompleteData>> {
        let secp = Secp256k1::verification_only();
        let mut incomplete = vec![];
        for index in 0..self.inputs.len() {
            if self.inputs[index].is_finalized() {
                continue;
            }
            match self.finalize_input(&secp, index) {
                Ok(()) => log::debug!("input {}: finalized", index),
                Err(reason) => {
                    log::debug!("input {}: not finalized, {}", index, reason);
                    incomplete.push(IncompleteData { index, reason });
                }
            }
        }
        if incomplete.is_empty() {
            Ok(())
        } else {
            Err(incomplete)
        }
    }

    /// Finalizes every input and extracts the signed transaction.
    pub fn finalize(mut self) -> Result<Transaction, Vec<IncompleteData>> {
        self.finalize_mut()?;
        Ok(self.assemble_tx())
    }

    fn finalize_input<C: Verification>(
        &mut self,
        secp: &Secp256k1<C>,
        index: usize,
    ) -> Result<(), IncompleteReason> {
        if self.inputs[index].is_empty() {
            return Err(IncompleteReason::NoSpendingInformation);
        }
        let txout = self.spent_output(index).ok_or(IncompleteReason::MissingUtxo)?;
        let input = &mut self.inputs[index];
        if txout.script_pubkey.is_p2tr() {
            let witness = taproot_witness(secp, input, &txout)?;
            input.final_script_witness = Some(witness);
        } else {
            let script_sig = legacy_script_sig(input, &txout)?;
            input.final_script_sig = Some(script_sig);
        }
        input.clear_non_final();
        Ok(())
    }
}

fn taproot_witness<C: Verification>(
    secp: &Secp256k1<C>,
    input: &Input,
    txout: &TxOut,
) -> Result<Witness, IncompleteReason> {
    if let Some(ref sig) = input.tap_key_sig {
        let mut witness = Witness::new();
        witness.push(sig.to_vec());
        return Ok(witness);
    }

    let output_key = XOnlyPublicKey::from_slice(&txout.script_pubkey.as_bytes()[2..])
        .map_err(|_| IncompleteReason::UnsupportedScript)?;
    // A NUMS internal key offers no way to spend.
    let mut recognised =
        input.tap_internal_key.map_or(false, |key| NumsPoint::from_known(&key).is_none());
    let mut best: Option<(usize, Vec<Vec<u8>>, &ScriptBuf, Vec<u8>)> = None;

    for (control_block, (script, version)) in &input.tap_scripts {
        let template = match LeafTemplate::parse(script) {
            Some(template) => template,
            None => continue,
        };
        recognised = true;
        if !control_block.verify_taproot_commitment(secp, output_key, script) {
            log::debug!("leaf {} is not committed to by the output key", script);
            continue;
        }
        let leaf = leaf_hash(script, *version);
        let stack = match template {
            LeafTemplate::Pk(key) => match input.tap_script_sigs.get(&(key, leaf)) {
                Some(sig) => vec![sig.to_vec()],
                None => continue,
            },
            LeafTemplate::Pkh(hash) => {
                let found = input.tap_script_sigs.iter().find_map(|((key, sig_leaf), sig)| {
                    if *sig_leaf != leaf {
                        return None;
                    }
                    compressed_key_with_hash(key, &hash).map(|pk| (pk, sig))
                });
                match found {
                    Some((pk, sig)) => vec![sig.to_vec(), pk.to_bytes()],
                    None => continue,
                }
            }
        };
        let size = stack.iter().map(Vec::len).sum::<usize>() + script.len() + control_block.size();
        if best.as_ref().map_or(true, |(best_size, ..)| size < *best_size) {
            best = Some((size, stack, script, control_block.serialize()));
        }
    }

    match best {
        Some((_, stack, script, control_block)) => {
            let mut witness = Witness::new();
            for item in stack {
                witness.push(item);
            }
            witness.push(script.as_bytes());
            witness.push(control_block);
            Ok(witness)
        }
        None if recognised => Err(IncompleteReason::MissingSignature),
        None if input.tap_scripts.is_empty() => Err(IncompleteReason::MissingSignature),
        None => Err(IncompleteReason::UnsupportedScript),
    }
}

fn legacy_script_sig(input: &Input, txout: &TxOut) -> Result<ScriptBuf, IncompleteReason> {
    match LegacyTemplate::parse(&txout.script_pubkey) {
        Some(LegacyTemplate::Pk(key)) => match input.partial_sigs.get(&key) {
            Some(sig) => Ok(Builder::new().push_slice(sig.serialize()).into_script()),
            None => Err(IncompleteReason::MissingSignature),
        },
        Some(LegacyTemplate::Pkh(hash)) => {
            let found = input
                .partial_sigs
                .iter()
                .find(|(key, _)| key.pubkey_hash().to_byte_array() == hash);
            match found {
                Some((key, sig)) => {
                    Ok(Builder::new().push_slice(sig.serialize()).push_key(key).into_script())
                }
                None => Err(IncompleteReason::MissingSignature),
            }
        }
        None => Err(IncompleteReason::UnsupportedScript),
    }
}
