// SPDX-License-Identifier: CC0-1.0

//! # Wallet
//!
//! An in-process wallet exposing the PSBT operations of a node: creating,
//! decoding and updating PSBTs, importing descriptors, and processing a PSBT
//! with the imported descriptors and keys. PSBTs cross this interface in
//! base64.

use bitcoin::psbt::PsbtSighashType;
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::{Address, Amount, Network, OutPoint, TapSighashType};

use crate::descriptor::checksum;
use crate::psbt::{KeyStore, Psbt, UtxoLookup};
use crate::{Descriptor, Error};

/// Wallet settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The network addresses are for.
    pub network: Network,
    /// Whether [`Wallet::process_psbt`] signs.
    pub sign: bool,
    /// Whether [`Wallet::process_psbt`] finalizes.
    pub finalize: bool,
    /// The sighash type for Taproot inputs which do not specify one.
    pub sighash_type: Option<TapSighashType>,
}

impl Config {
    /// Signing and finalizing settings for `network`.
    pub fn new(network: Network) -> Self {
        Config { network, sign: true, finalize: true, sighash_type: None }
    }

    /// Sets whether processing signs.
    pub fn sign(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    /// Sets whether processing finalizes.
    pub fn finalize(mut self, finalize: bool) -> Self {
        self.finalize = finalize;
        self
    }

    /// Sets the default Taproot sighash type.
    pub fn sighash_type(mut self, sighash_type: TapSighashType) -> Self {
        self.sighash_type = Some(sighash_type);
        self
    }
}

impl Default for Config {
    fn default() -> Self { Config::new(Network::Bitcoin) }
}

/// A descriptor to import.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportRequest {
    /// The descriptor, which must carry its checksum.
    pub desc: String,
    /// A label for the descriptor.
    pub label: String,
    /// Whether to drop the private keys of the descriptor.
    pub watch_only: bool,
}

impl ImportRequest {
    /// A request to import `desc` with its private keys.
    pub fn new(desc: &str, label: &str) -> Self {
        ImportRequest { desc: desc.to_owned(), label: label.to_owned(), watch_only: false }
    }

    /// A request to import `desc` without its private keys.
    pub fn watch_only(desc: &str, label: &str) -> Self {
        ImportRequest { watch_only: true, ..ImportRequest::new(desc, label) }
    }
}

/// The outcome of one import.
#[derive(Debug)]
pub struct ImportResult {
    /// Whether the descriptor was imported.
    pub success: bool,
    /// Things worth knowing about a successful import.
    pub warnings: Vec<String>,
    /// Why the import failed.
    pub error: Option<Error>,
}

/// An imported descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedDescriptor {
    /// The descriptor, without private keys.
    pub descriptor: Descriptor,
    /// Its label.
    pub label: String,
}

/// The outcome of [`Wallet::process_psbt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedPsbt {
    /// The processed PSBT, in base64.
    pub psbt: String,
    /// Whether every input is finalized.
    pub complete: bool,
}

/// A wallet holding imported descriptors and their private keys.
#[derive(Debug)]
pub struct Wallet {
    config: Config,
    secp: Secp256k1<secp256k1::All>,
    descriptors: Vec<ImportedDescriptor>,
    keys: KeyStore,
}

impl Wallet {
    /// An empty wallet.
    pub fn new(config: Config) -> Self {
        Wallet { config, secp: Secp256k1::new(), descriptors: vec![], keys: KeyStore::new() }
    }

    /// The wallet settings.
    pub fn config(&self) -> &Config { &self.config }

    /// The imported descriptors.
    pub fn descriptors(&self) -> &[ImportedDescriptor] { &self.descriptors }

    /// Number of imported private keys.
    pub fn key_count(&self) -> usize { self.keys.len() }

    /// Creates a PSBT spending `inputs` to `outputs`, with empty maps.
    pub fn create_psbt(&self, inputs: &[OutPoint], outputs: &[(Address, Amount)]) -> String {
        Psbt::create(inputs, outputs).to_string()
    }

    /// Decodes a base64 PSBT.
    pub fn decode_psbt(&self, psbt: &str) -> Result<Psbt, Error> { Ok(psbt.parse()?) }

    /// Adds to `psbt` the information `descriptors` give about its inputs and
    /// outputs. Checksums are optional.
    pub fn utxo_update_psbt<U: UtxoLookup + ?Sized>(
        &self,
        utxos: &U,
        psbt: &str,
        descriptors: &[&str],
    ) -> Result<String, Error> {
        let descriptors = descriptors
            .iter()
            .map(|desc| Descriptor::parse_descriptor(&self.secp, desc))
            .collect::<Result<Vec<_>, _>>()?;
        let mut psbt = self.decode_psbt(psbt)?;
        psbt.update_with_descriptors(utxos, &descriptors)?;
        Ok(psbt.to_string())
    }

    /// Imports descriptors, each of which must carry its checksum.
    ///
    /// Every request gets a result; a failed import does not stop the others.
    pub fn import_descriptors(&mut self, requests: &[ImportRequest]) -> Vec<ImportResult> {
        requests
            .iter()
            .map(|request| match self.import_descriptor(request) {
                Ok(warnings) => ImportResult { success: true, warnings, error: None },
                Err(e) => {
                    log::debug!("failed to import {}: {}", request.desc, e);
                    ImportResult { success: false, warnings: vec![], error: Some(e) }
                }
            })
            .collect()
    }

    fn import_descriptor(&mut self, request: &ImportRequest) -> Result<Vec<String>, Error> {
        if !checksum::has_checksum(&request.desc) {
            return Err(Error::MissingChecksum(request.desc.clone()));
        }
        let descriptor = Descriptor::parse_descriptor(&self.secp, &request.desc)?;
        let mut warnings = vec![];
        if request.watch_only {
            if descriptor.has_private_keys() {
                warnings.push("private keys were not imported into a watch-only wallet".to_owned());
            }
        } else if descriptor.has_private_keys() {
            self.keys.extend_from_descriptor(&self.secp, &descriptor);
        } else {
            warnings.push("descriptor has no private keys, imported as watch-only".to_owned());
        }

        let public = descriptor.to_public();
        log::debug!("imported {:#} as {:?}", public, request.label);
        match self.descriptors.iter_mut().find(|imported| imported.descriptor == public) {
            Some(imported) => imported.label = request.label.clone(),
            None => self.descriptors.push(ImportedDescriptor { descriptor: public, label: request.label.clone() }),
        }
        Ok(warnings)
    }

    /// Updates `psbt` from the imported descriptors, signs it with the
    /// imported keys and tries to finalize it, as configured.
    ///
    /// An input which cannot be finalized is not an error; the result is
    /// then not `complete`.
    pub fn process_psbt<U: UtxoLookup + ?Sized>(&self, utxos: &U, psbt: &str) -> Result<ProcessedPsbt, Error> {
        let mut psbt = self.decode_psbt(psbt)?;
        let descriptors: Vec<Descriptor> =
            self.descriptors.iter().map(|imported| imported.descriptor.clone()).collect();
        psbt.update_with_descriptors(utxos, &descriptors)?;

        if self.config.sign {
            if let Some(ty) = self.config.sighash_type {
                for input in psbt.inputs.iter_mut().filter(|input| input.tap_internal_key.is_some()) {
                    input.sighash_type.get_or_insert(PsbtSighashType::from(ty));
                }
            }
            let signed = psbt.sign(&self.keys, &self.secp)?;
            log::debug!("signed {} inputs", signed.len());
        }

        let complete = if self.config.finalize {
            match psbt.finalize_mut() {
                Ok(()) => true,
                Err(incomplete) => {
                    for e in &incomplete {
                        log::debug!("{}", e);
                    }
                    false
                }
            }
        } else {
            psbt.inputs.iter().all(|input| input.is_finalized())
        };
        Ok(ProcessedPsbt { psbt: psbt.to_string(), complete })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bitcoin::{absolute, transaction, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

    use super::*;
    use crate::descriptor::checksum::descsum_create;

    const NUMS: &str = "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";
    const WIF: &str = "cVt4o7BGAig1UXywgGSmARhxMdzP5qvQsxKkSsc1XEkw3tDTQFpy";

    fn tap_desc() -> String { descsum_create(&format!("tap({},pkh({}))", NUMS, WIF)).unwrap() }

    fn funding(desc: &str) -> Transaction {
        let desc: Descriptor = desc.parse().unwrap();
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![0x51, 0x51]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(100_000), script_pubkey: desc.script_pubkey() }],
        }
    }

    #[test]
    fn config_builder() {
        let config = Config::new(Network::Regtest).sign(false).finalize(false);
        assert_eq!(config.network, Network::Regtest);
        assert!(!config.sign && !config.finalize);
        assert_eq!(config.sighash_type(TapSighashType::All).sighash_type, Some(TapSighashType::All));
        assert_eq!(Config::default().network, Network::Bitcoin);
        assert!(Config::default().sign);
    }

    #[test]
    fn import_requires_checksum() {
        let mut wallet = Wallet::new(Config::new(Network::Regtest));
        let without = format!("tap({},pkh({}))", NUMS, WIF);
        let results = wallet.import_descriptors(&[
            ImportRequest::watch_only(&without, "no checksum"),
            ImportRequest::watch_only(&tap_desc(), "ok"),
        ]);
        assert!(!results[0].success);
        assert!(matches!(results[0].error, Some(Error::MissingChecksum(..))));
        assert!(results[1].success);
        assert_eq!(results[1].warnings.len(), 1);
        assert_eq!(wallet.descriptors().len(), 1);
        assert_eq!(wallet.descriptors()[0].label, "ok");
        assert!(!wallet.descriptors()[0].descriptor.has_private_keys());
        assert_eq!(wallet.key_count(), 0);

        // Importing again relabels.
        wallet.import_descriptors(&[ImportRequest::new(&tap_desc(), "relabelled")]);
        assert_eq!(wallet.descriptors().len(), 1);
        assert_eq!(wallet.descriptors()[0].label, "relabelled");
        assert_eq!(wallet.key_count(), 1);
    }

    #[test]
    fn watch_only_process_is_incomplete() {
        let mut wallet = Wallet::new(Config::new(Network::Regtest));
        wallet.import_descriptors(&[ImportRequest::watch_only(&tap_desc(), "watch")]);
        let prev = funding(&tap_desc());
        let outpoint = OutPoint { txid: prev.compute_txid(), vout: 0 };
        let psbt = wallet.create_psbt(&[outpoint], &[]);

        let processed = wallet.process_psbt(&vec![prev], &psbt).unwrap();
        assert!(!processed.complete);
        let decoded = wallet.decode_psbt(&processed.psbt).unwrap();
        let names = decoded.inputs[0].field_names();
        assert!(names.contains(&"taproot_scripts"));
        assert!(!names.contains(&"taproot_script_path_sigs"));
    }

    #[test]
    fn signing_process_completes() {
        let mut wallet = Wallet::new(Config::new(Network::Regtest));
        wallet.import_descriptors(&[ImportRequest::new(&tap_desc(), "hot")]);
        let prev = funding(&tap_desc());
        let mut utxos = BTreeMap::new();
        utxos.insert(OutPoint { txid: prev.compute_txid(), vout: 0 }, prev.output[0].clone());
        let psbt = wallet.create_psbt(&[OutPoint { txid: prev.compute_txid(), vout: 0 }], &[]);

        let processed = wallet.process_psbt(&utxos, &psbt).unwrap();
        assert!(processed.complete);
        let tx = wallet.decode_psbt(&processed.psbt).unwrap().extract_tx().unwrap();
        assert_eq!(tx.input[0].witness.len(), 4);

        // Processing a complete PSBT again changes nothing.
        let again = wallet.process_psbt(&utxos, &processed.psbt).unwrap();
        assert!(again.complete);
        assert_eq!(again.psbt, processed.psbt);

        let unsigned = Wallet::new(Config::new(Network::Regtest).sign(false));
        assert!(!unsigned.process_psbt(&utxos, &psbt).unwrap().complete);
    }
}
