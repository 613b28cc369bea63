// SPDX-License-Identifier: CC0-1.0

use std::collections::BTreeMap;

use bitcoin::bip32::{KeySource, Xpub};
use bitcoin::consensus::encode;
use bitcoin::transaction::{self, TxIn, TxOut};
use bitcoin::{absolute, Transaction};

use super::{
    consensus_value, decode_key_source, encode_key_source, expect_empty_key, invalid_value,
    keep_existing, merge_map, Map,
};
use crate::psbt::error::{DecodeError, Error, Location};
use crate::psbt::raw;

/// Type: Unsigned Transaction PSBT_GLOBAL_UNSIGNED_TX = 0x00
const PSBT_GLOBAL_UNSIGNED_TX: u64 = 0x00;
/// Type: Extended Public Key PSBT_GLOBAL_XPUB = 0x01
const PSBT_GLOBAL_XPUB: u64 = 0x01;
/// Type: Version Number PSBT_GLOBAL_VERSION = 0xFB
const PSBT_GLOBAL_VERSION: u64 = 0xFB;

/// The global map of a PSBT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Global {
    /// The unsigned transaction, scriptSigs and witnesses for each input must be empty.
    pub unsigned_tx: Transaction,
    /// The version number of this PSBT. If omitted, the version number is 0.
    pub version: u32,
    /// A global map from extended public keys to the used key fingerprint and
    /// derivation path as defined by BIP 32.
    pub xpub: BTreeMap<Xpub, KeySource>,
    /// Unknown global key-value pairs.
    pub unknown: BTreeMap<raw::Key, Vec<u8>>,
}

impl Global {
    /// A global map for `unsigned_tx` with no other fields.
    pub fn new(unsigned_tx: Transaction) -> Self {
        Global { unsigned_tx, version: 0, xpub: BTreeMap::new(), unknown: BTreeMap::new() }
    }

    /// Merges `other` into this map. The unsigned transactions must be equal.
    pub fn combine(&mut self, other: Global) -> Result<(), Error> {
        if self.unsigned_tx != other.unsigned_tx {
            return Err(Error::UnexpectedUnsignedTx {
                expected: Box::new(self.unsigned_tx.clone()),
                actual: Box::new(other.unsigned_tx),
            });
        }
        if self.version != other.version {
            return Err(Error::ConflictingData { location: Location::Global, field: "version" });
        }
        merge_map(Location::Global, "global_xpubs", &mut self.xpub, other.xpub)?;
        keep_existing(&mut self.unknown, other.unknown);
        Ok(())
    }

    pub(crate) fn decode(pairs: Vec<raw::Pair>) -> Result<Global, DecodeError> {
        let mut unsigned_tx = None;
        let mut version = 0;
        let mut xpub = BTreeMap::new();
        let mut unknown = BTreeMap::new();

        for raw::Pair { key, value } in pairs {
            match key.type_value {
                PSBT_GLOBAL_UNSIGNED_TX => {
                    expect_empty_key(&key)?;
                    let tx = decode_unsigned_tx(&key, &value)?;
                    if tx.input.iter().any(|txin| !txin.script_sig.is_empty()) {
                        return Err(DecodeError::UnsignedTxHasScriptSigs);
                    }
                    if tx.input.iter().any(|txin| !txin.witness.is_empty()) {
                        return Err(DecodeError::UnsignedTxHasScriptWitnesses);
                    }
                    unsigned_tx = Some(tx);
                }
                PSBT_GLOBAL_XPUB => {
                    let xpub_key = Xpub::decode(&key.key)
                        .map_err(|_| DecodeError::InvalidKey(key.clone()))?;
                    xpub.insert(xpub_key, decode_key_source(&key, &value)?);
                }
                PSBT_GLOBAL_VERSION => {
                    expect_empty_key(&key)?;
                    version = consensus_value(&key, &value)?;
                    if version != 0 {
                        return Err(DecodeError::UnsupportedVersion(version));
                    }
                }
                _ => {
                    unknown.insert(key, value);
                }
            }
        }

        match unsigned_tx {
            Some(unsigned_tx) => Ok(Global { unsigned_tx, version, xpub, unknown }),
            None => Err(DecodeError::MissingUnsignedTx),
        }
    }
}

/// Serializes a transaction in the legacy format, even without inputs.
pub(crate) fn encode_unsigned_tx(tx: &Transaction) -> Vec<u8> {
    let mut buf = encode::serialize(&tx.version);
    buf.extend_from_slice(&encode::serialize(&tx.input));
    buf.extend_from_slice(&encode::serialize(&tx.output));
    buf.extend_from_slice(&encode::serialize(&tx.lock_time));
    buf
}

fn decode_unsigned_tx(key: &raw::Key, value: &[u8]) -> Result<Transaction, DecodeError> {
    let mut pos = 0;
    let (version, n): (transaction::Version, usize) =
        encode::deserialize_partial(&value[pos..]).map_err(|e| invalid_value(key, e))?;
    pos += n;
    let (input, n): (Vec<TxIn>, usize) =
        encode::deserialize_partial(&value[pos..]).map_err(|e| invalid_value(key, e))?;
    pos += n;
    let (output, n): (Vec<TxOut>, usize) =
        encode::deserialize_partial(&value[pos..]).map_err(|e| invalid_value(key, e))?;
    pos += n;
    let (lock_time, n): (absolute::LockTime, usize) =
        encode::deserialize_partial(&value[pos..]).map_err(|e| invalid_value(key, e))?;
    pos += n;
    if pos != value.len() {
        return Err(invalid_value(key, format_args!("{} trailing bytes", value.len() - pos)));
    }

    Ok(Transaction { version, lock_time, input, output })
}

impl Map for Global {
    fn get_pairs(&self) -> Vec<raw::Pair> {
        let mut rv: Vec<raw::Pair> = Default::default();

        rv.push(raw::Pair {
            key: raw::Key::new(PSBT_GLOBAL_UNSIGNED_TX),
            value: encode_unsigned_tx(&self.unsigned_tx),
        });
        for (xpub, origin) in &self.xpub {
            let mut value = vec![];
            encode_key_source(&mut value, origin);
            rv.push(raw::Pair {
                key: raw::Key::with_data(PSBT_GLOBAL_XPUB, xpub.encode().to_vec()),
                value,
            });
        }
        if self.version > 0 {
            rv.push(raw::Pair {
                key: raw::Key::new(PSBT_GLOBAL_VERSION),
                value: self.version.to_le_bytes().to_vec(),
            });
        }
        for (key, value) in &self.unknown {
            rv.push(raw::Pair { key: key.clone(), value: value.clone() });
        }
        rv
    }
}
