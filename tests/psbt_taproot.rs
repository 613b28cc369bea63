// SPDX-License-Identifier: CC0-1.0

//! # Taproot PSBT integration test
//!
//! Funds outputs on an in-memory chain, then walks PSBTs spending them through
//! the wallet: create, update from descriptors, import, sign and finalize.

use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::LeafVersion;
use bitcoin::{Amount, Network, TapSighashType, TxOut};
use taproot_psbt::psbt::{Error as PsbtError, Location};
use taproot_psbt::wallet::ImportRequest;
use taproot_psbt::{ControlBlock, Config, Descriptor, KeyPath, Psbt, Wallet};

mod setup;

use setup::test_util::{self, TestChain, NUMS};

fn regtest_wallet() -> Wallet { Wallet::new(Config::new(Network::Regtest)) }

/// Funds the output of `desc` and returns a PSBT spending it to a fresh address.
fn fund_and_create(chain: &mut TestChain, wallet: &Wallet, desc: &Descriptor) -> String {
    let address = desc.address(Network::Regtest).unwrap();
    let txid = chain.send(&address, Amount::from_sat(1_000_000));
    let outpoint = chain.find_output(txid, &desc.script_pubkey());
    let dest = Descriptor::from_str(&format!("tr({})", test_util::random_key().to_wif()))
        .unwrap()
        .address(Network::Regtest)
        .unwrap();
    wallet.create_psbt(&[outpoint], &[(dest, Amount::from_sat(990_000))])
}

#[test]
fn new_psbt_has_empty_input() {
    test_util::setup_logger();
    let mut chain = TestChain::new();
    let wallet = regtest_wallet();
    let desc = Descriptor::from_str(&format!("tr({})", test_util::random_key().to_wif())).unwrap();
    let psbt = fund_and_create(&mut chain, &wallet, &desc);

    let decoded = wallet.decode_psbt(&psbt).unwrap();
    assert_eq!(decoded.inputs.len(), 1);
    assert!(decoded.inputs[0].field_names().is_empty());
    assert!(decoded.outputs[0].field_names().is_empty());
    assert_eq!(decoded.to_string(), psbt);
    assert_eq!(Psbt::deserialize(&decoded.serialize()).unwrap(), decoded);
}

#[test]
fn nums_internal_key_watch_only() {
    test_util::setup_logger();
    let mut chain = TestChain::new();
    let key = test_util::random_key();
    let desc_str = format!("tap({},pkh({}))", NUMS, key.to_wif());
    let desc = Descriptor::from_str(&desc_str).unwrap();
    assert_eq!(desc.resolve().taproot().unwrap().key_path, KeyPath::Unspendable);

    let mut wallet = regtest_wallet();
    let psbt = fund_and_create(&mut chain, &wallet, &desc);

    let updated = wallet.utxo_update_psbt(&chain, &psbt, &[&desc_str]).unwrap();
    let decoded = wallet.decode_psbt(&updated).unwrap();
    let names = decoded.inputs[0].field_names();
    assert!(names.contains(&"taproot_internal_key"));
    assert!(names.contains(&"taproot_scripts"));
    assert!(names.contains(&"witness_utxo"));
    assert!(!names.contains(&"taproot_key_path_sig"));
    assert_eq!(decoded.inputs[0].tap_internal_key, Some(NUMS.parse().unwrap()));
    // Updating again changes nothing.
    assert_eq!(wallet.utxo_update_psbt(&chain, &updated, &[&desc_str]).unwrap(), updated);

    let watch_only = ImportRequest::watch_only(&test_util::with_checksum(&desc_str), "psbt");
    let results = wallet.import_descriptors(&[watch_only]);
    assert!(results[0].success, "{:?}", results[0].error);
    assert_eq!(results[0].warnings.len(), 1);
    assert_eq!(wallet.key_count(), 0);

    let processed = wallet.process_psbt(&chain, &updated).unwrap();
    assert!(!processed.complete);
    let decoded = wallet.decode_psbt(&processed.psbt).unwrap();
    assert!(decoded.inputs[0].tap_script_sigs.is_empty());
    assert!(decoded.extract_tx().is_err());
}

#[test]
fn script_path_spend() {
    test_util::setup_logger();
    let mut chain = TestChain::new();
    let key = test_util::random_key();
    let desc_str = test_util::with_checksum(&format!("tap({},pkh({}))", NUMS, key.to_wif()));
    let desc = Descriptor::from_str(&desc_str).unwrap();

    let mut wallet = regtest_wallet();
    let results = wallet.import_descriptors(&[ImportRequest::new(&desc_str, "hot")]);
    assert!(results[0].success && results[0].warnings.is_empty());

    let psbt = fund_and_create(&mut chain, &wallet, &desc);
    let processed = wallet.process_psbt(&chain, &psbt).unwrap();
    assert!(processed.complete);

    let decoded = wallet.decode_psbt(&processed.psbt).unwrap();
    assert_eq!(decoded.inputs[0].field_names(), vec!["witness_utxo", "final_scriptwitness"]);
    let prevout = decoded.spent_output(0).unwrap();
    let tx = decoded.extract_tx().unwrap();

    // [sig, pubkey, script, control block]
    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 4);
    let xonly = test_util::xonly(&key);
    assert_eq!(witness.nth(1).unwrap(), &key.public_key(&Secp256k1::new()).to_bytes()[..]);
    let script = bitcoin::Script::from_bytes(witness.nth(2).unwrap());
    let control_block = ControlBlock::decode(witness.nth(3).unwrap()).unwrap();
    assert_eq!(control_block.internal_key, NUMS.parse().unwrap());

    let secp = Secp256k1::verification_only();
    let output_key =
        bitcoin::XOnlyPublicKey::from_slice(&prevout.script_pubkey.as_bytes()[2..]).unwrap();
    assert!(control_block.verify_taproot_commitment(&secp, output_key, script));

    let leaf_hash = taproot_psbt::taproot::leaf_hash(script, LeafVersion::TapScript);
    let sighash = SighashCache::new(&tx)
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&[prevout]),
            leaf_hash,
            TapSighashType::Default,
        )
        .unwrap();
    let sig = bitcoin::taproot::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
    let msg = Message::from_digest(sighash.to_byte_array());
    secp.verify_schnorr(&sig.signature, &msg, &xonly).unwrap();
}

#[test]
fn key_path_spend_with_sighash_all() {
    test_util::setup_logger();
    let mut chain = TestChain::new();
    let internal = test_util::random_key();
    let leaf = test_util::random_key();
    let desc_str = test_util::with_checksum(&format!(
        "tr({},pk({}))",
        internal.to_wif(),
        test_util::xonly(&leaf)
    ));
    let desc = Descriptor::from_str(&desc_str).unwrap();
    assert_eq!(desc.resolve().taproot().unwrap().key_path, KeyPath::Signable);

    let mut wallet = Wallet::new(Config::new(Network::Regtest).sighash_type(TapSighashType::All));
    wallet.import_descriptors(&[ImportRequest::new(&desc_str, "hot")]);
    let psbt = fund_and_create(&mut chain, &wallet, &desc);
    let processed = wallet.process_psbt(&chain, &psbt).unwrap();
    assert!(processed.complete);

    let decoded = wallet.decode_psbt(&processed.psbt).unwrap();
    let prevout: TxOut = decoded.spent_output(0).unwrap();
    let tx = decoded.finalize().unwrap();
    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 1);
    // 64 bytes and an explicit sighash byte.
    assert_eq!(witness.nth(0).unwrap().len(), 65);

    let sig = bitcoin::taproot::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
    assert_eq!(sig.sighash_type, TapSighashType::All);
    let sighash = SighashCache::new(&tx)
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&[prevout]), TapSighashType::All)
        .unwrap();
    let msg = Message::from_digest(sighash.to_byte_array());
    let output_key = desc.resolve().taproot().unwrap().spend_info.output_key();
    Secp256k1::verification_only().verify_schnorr(&sig.signature, &msg, &output_key).unwrap();
}

#[test]
fn legacy_pkh_spend() {
    test_util::setup_logger();
    let mut chain = TestChain::new();
    let key = test_util::random_key();
    let desc_str = test_util::with_checksum(&format!("pkh({})", key.to_wif()));
    let desc = Descriptor::from_str(&desc_str).unwrap();

    let mut wallet = regtest_wallet();
    wallet.import_descriptors(&[ImportRequest::new(&desc_str, "legacy")]);
    let psbt = fund_and_create(&mut chain, &wallet, &desc);

    let updated = wallet.utxo_update_psbt(&chain, &psbt, &[&desc_str]).unwrap();
    let decoded = wallet.decode_psbt(&updated).unwrap();
    assert_eq!(decoded.inputs[0].field_names(), vec!["non_witness_utxo", "bip32_derivs"]);

    let processed = wallet.process_psbt(&chain, &updated).unwrap();
    assert!(processed.complete);
    let tx = wallet.decode_psbt(&processed.psbt).unwrap().extract_tx().unwrap();
    assert!(tx.input[0].witness.is_empty());
    assert_eq!(tx.input[0].script_sig.instructions().count(), 2);
}

#[test]
fn combine_conflicting_updates() {
    test_util::setup_logger();
    let mut chain = TestChain::new();
    let key = test_util::random_key();
    let nums = format!("tap({},pkh({}))", NUMS, key.to_wif());
    let keyed = format!("tap({},pkh({}))", test_util::xonly(&test_util::random_key()), key.to_wif());
    let desc = Descriptor::from_str(&nums).unwrap();
    let wallet = regtest_wallet();
    let psbt = fund_and_create(&mut chain, &wallet, &desc);

    let mut ours: Psbt = wallet.utxo_update_psbt(&chain, &psbt, &[&nums]).unwrap().parse().unwrap();
    let theirs: Psbt = psbt.parse().unwrap();
    ours.combine(theirs.clone()).unwrap();

    let mut theirs = theirs;
    theirs.inputs[0].tap_internal_key = Some(test_util::xonly(&test_util::random_key()));
    assert_eq!(
        ours.combine(theirs),
        Err(PsbtError::ConflictingData { location: Location::Input(0), field: "taproot_internal_key" })
    );

    // A descriptor for a different output leaves the input alone.
    let untouched = wallet.utxo_update_psbt(&chain, &psbt, &[&keyed]).unwrap();
    assert!(wallet.decode_psbt(&untouched).unwrap().inputs[0].field_names().is_empty());
}
