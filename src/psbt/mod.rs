// SPDX-License-Identifier: CC0-1.0

//! # Partially-Signed Bitcoin Transactions
//!
//! The PSBT document of BIP 174, with the Taproot fields of BIP 371, and the
//! Updater, Signer, Finalizer and Extractor roles acting on it. Described at
//! `https://github.com/bitcoin/bips/blob/master/bip-0174.mediawiki`.

use core::fmt;
use core::str::FromStr;

use bitcoin::base64::prelude::{Engine as _, BASE64_STANDARD};
use bitcoin::transaction::{self, TxIn, TxOut};
use bitcoin::{absolute, Amount, Address, OutPoint, ScriptBuf, Sequence, Transaction, Witness};

mod error;
mod finalizer;
pub mod map;
pub mod raw;
mod signer;
mod template;
mod updater;

pub use self::error::{DecodeError, Error, Location};
pub use self::finalizer::{IncompleteData, IncompleteReason};
pub use self::map::{Global, Input, Output, TapTreeLeaf};
pub use self::signer::{KeyStore, SignError, SignedBy, SigningKeys};
pub use self::updater::UtxoLookup;
use self::map::Map;

/// The magic bytes which start every serialized PSBT: "psbt" and `0xff`.
const PSBT_MAGIC: [u8; 5] = [0x70, 0x73, 0x62, 0x74, 0xff];

/// A Partially Signed Transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Psbt {
    /// The global map.
    pub global: Global,
    /// The corresponding key-value map for each input in the unsigned transaction.
    pub inputs: Vec<Input>,
    /// The corresponding key-value map for each output in the unsigned transaction.
    pub outputs: Vec<Output>,
}

impl Psbt {
    /// Creates a PSBT from an unsigned transaction, with empty maps.
    ///
    /// The scriptSigs and witnesses of the transaction are cleared.
    pub fn from_unsigned_tx(mut tx: Transaction) -> Self {
        for txin in &mut tx.input {
            txin.script_sig = ScriptBuf::new();
            txin.witness = Witness::new();
        }
        let inputs = vec![Input::default(); tx.input.len()];
        let outputs = vec![Output::default(); tx.output.len()];
        Psbt { global: Global::new(tx), inputs, outputs }
    }

    /// Creates a version 2 transaction spending `inputs` to `outputs`, with
    /// lock time zero and replaceable sequences, and wraps it in a PSBT.
    pub fn create(inputs: &[OutPoint], outputs: &[(Address, Amount)]) -> Self {
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: inputs
                .iter()
                .map(|&previous_output| TxIn {
                    previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .iter()
                .map(|(address, value)| TxOut { value: *value, script_pubkey: address.script_pubkey() })
                .collect(),
        };
        Psbt::from_unsigned_tx(tx)
    }

    /// The unsigned transaction.
    pub fn unsigned_tx(&self) -> &Transaction { &self.global.unsigned_tx }

    /// Serializes the PSBT.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = PSBT_MAGIC.to_vec();
        self.global.encode_into(&mut buf);
        for input in &self.inputs {
            input.encode_into(&mut buf);
        }
        for output in &self.outputs {
            output.encode_into(&mut buf);
        }
        buf
    }

    /// Deserializes a PSBT.
    pub fn deserialize(bytes: &[u8]) -> Result<Psbt, Error> {
        let mut reader = raw::Reader::new(bytes);
        let magic = reader.read_slice(PSBT_MAGIC.len()).map_err(|_| DecodeError::InvalidMagic)?;
        if magic != PSBT_MAGIC {
            return Err(DecodeError::InvalidMagic.into());
        }

        let global = Global::decode(reader.read_map()?)?;
        let n_inputs = global.unsigned_tx.input.len();
        let n_outputs = global.unsigned_tx.output.len();
        let expected = n_inputs + n_outputs;

        let mut read_maps = |count: usize, done: usize| -> Result<Vec<Vec<raw::Pair>>, DecodeError> {
            let mut maps = Vec::with_capacity(count);
            for i in 0..count {
                if reader.remaining() == 0 {
                    return Err(DecodeError::MapCountMismatch { expected, found: done + i });
                }
                maps.push(reader.read_map()?);
            }
            Ok(maps)
        };
        let inputs = read_maps(n_inputs, 0)?
            .into_iter()
            .map(Input::decode)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = read_maps(n_outputs, n_inputs)?
            .into_iter()
            .map(Output::decode)
            .collect::<Result<Vec<_>, _>>()?;

        if reader.remaining() > 0 {
            return Err(DecodeError::TrailingData(reader.remaining()).into());
        }
        Ok(Psbt { global, inputs, outputs })
    }

    /// Combines this PSBT with `other`, field by field.
    ///
    /// Signatures and final fields already present are kept; any other field
    /// with a different value in `other` is a [`Error::ConflictingData`].
    pub fn combine(&mut self, other: Psbt) -> Result<(), Error> {
        self.global.combine(other.global)?;
        for (index, (ours, theirs)) in self.inputs.iter_mut().zip(other.inputs).enumerate() {
            ours.combine(index, theirs)?;
        }
        for (index, (ours, theirs)) in self.outputs.iter_mut().zip(other.outputs).enumerate() {
            ours.combine(index, theirs)?;
        }
        Ok(())
    }

    /// The output spent by input `index`, from its witness or non-witness UTXO.
    pub fn spent_output(&self, index: usize) -> Option<TxOut> {
        let input = self.inputs.get(index)?;
        if let Some(ref txout) = input.witness_utxo {
            return Some(txout.clone());
        }
        let tx = input.non_witness_utxo.as_ref()?;
        let prevout = self.unsigned_tx().input.get(index)?.previous_output;
        if tx.compute_txid() != prevout.txid {
            return None;
        }
        tx.output.get(prevout.vout as usize).cloned()
    }

    /// The transaction with every input's final scriptSig and witness.
    ///
    /// Fails with [`Error::NotFinalized`] for the first input without them.
    pub fn extract_tx(&self) -> Result<Transaction, Error> {
        if let Some(index) = self.inputs.iter().position(|input| !input.is_finalized()) {
            return Err(Error::NotFinalized { index });
        }
        Ok(self.assemble_tx())
    }

    fn assemble_tx(&self) -> Transaction {
        let mut tx = self.unsigned_tx().clone();
        for (txin, input) in tx.input.iter_mut().zip(&self.inputs) {
            if let Some(ref script_sig) = input.final_script_sig {
                txin.script_sig = script_sig.clone();
            }
            if let Some(ref witness) = input.final_script_witness {
                txin.witness = witness.clone();
            }
        }
        tx
    }
}

impl fmt::Display for Psbt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&BASE64_STANDARD.encode(self.serialize()))
    }
}

impl FromStr for Psbt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_STANDARD.decode(s)?;
        Psbt::deserialize(&bytes)
    }
}
