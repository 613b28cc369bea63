// SPDX-License-Identifier: CC0-1.0

//! # In-memory test chain
//!
//! Stands in for a node: it funds addresses with transactions that are
//! "mined" at once, and answers UTXO lookups for the PSBT updater.
//!
//! Keys are random, so every test run uses fresh outputs.

use actual_rand as rand;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{
    absolute, transaction, Address, Amount, Network, OutPoint, PrivateKey, Script, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use taproot_psbt::descriptor::checksum::descsum_create;
use taproot_psbt::UtxoLookup;

/// The BIP-341 NUMS point, as an x-only key.
pub const NUMS: &str = "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

/// Installs a logger for the test binary, once.
pub fn setup_logger() { let _ = env_logger::builder().is_test(true).try_init(); }

/// A random regtest private key.
pub fn random_key() -> PrivateKey {
    PrivateKey::new(secp256k1::SecretKey::new(&mut rand::thread_rng()), Network::Regtest)
}

/// The x-only key of `key`, as descriptors and PSBTs show it.
pub fn xonly(key: &PrivateKey) -> bitcoin::XOnlyPublicKey {
    key.public_key(&Secp256k1::new()).inner.x_only_public_key().0
}

/// `desc` with its checksum appended.
pub fn with_checksum(desc: &str) -> String { descsum_create(desc).unwrap() }

/// A chain of transactions funding test outputs.
#[derive(Debug, Default)]
pub struct TestChain {
    txs: Vec<Transaction>,
}

impl TestChain {
    pub fn new() -> Self { TestChain::default() }

    /// Sends `amount` to `address`, with a change output in front of it.
    pub fn send(&mut self, address: &Address, amount: Amount) -> Txid {
        self.send_to_script(address.script_pubkey(), amount)
    }

    /// Sends `amount` to `script_pubkey`, with a change output in front of it.
    pub fn send_to_script(&mut self, script_pubkey: ScriptBuf, amount: Amount) -> Txid {
        let funding = OutPoint {
            txid: Txid::from_byte_array([self.txs.len() as u8 + 1; 32]),
            vout: 0,
        };
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: funding,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::from_slice(&[vec![0u8; 64]]),
            }],
            output: vec![
                TxOut { value: Amount::from_sat(1_000_000), script_pubkey: ScriptBuf::from_bytes(vec![0x6a]) },
                TxOut { value: amount, script_pubkey },
            ],
        };
        let txid = tx.compute_txid();
        self.txs.push(tx);
        txid
    }

    /// The outpoint of `txid` paying to `script_pubkey`.
    pub fn find_output(&self, txid: Txid, script_pubkey: &Script) -> OutPoint {
        let tx = self.transaction(&txid).expect("transaction is in the chain");
        let vout = tx
            .output
            .iter()
            .position(|txout| txout.script_pubkey.as_script() == script_pubkey)
            .expect("transaction pays to the script");
        OutPoint { txid, vout: vout as u32 }
    }
}

impl UtxoLookup for TestChain {
    fn txout(&self, outpoint: &OutPoint) -> Option<TxOut> { self.txs[..].txout(outpoint) }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> { self.txs[..].transaction(txid) }
}
