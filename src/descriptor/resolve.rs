// SPDX-License-Identifier: CC0-1.0

//! Resolving descriptors into spending data
//!
//! A [`Resolution`] carries everything an updater needs to describe how an
//! output may be spent, without any private keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitcoin::bip32::KeySource;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::ScriptBuf;

use crate::taproot::{ControlBlock, TaprootSpendInfo};

/// How the key path of a Taproot output may be used.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyPath {
    /// The internal key is a NUMS point; only the script path can spend.
    Unspendable,
    /// The internal key is known but its secret is not.
    WatchOnly,
    /// The secret of the internal key is part of the descriptor.
    Signable,
}

/// The result of resolving a descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The output script.
    pub script_pubkey: ScriptBuf,
    /// How the output is spent.
    pub spend: SpendInfo,
}

impl Resolution {
    /// The Taproot spending data, for `tap` descriptors.
    pub fn taproot(&self) -> Option<&TaprootSpend> {
        match self.spend {
            SpendInfo::Taproot(ref tap) => Some(tap),
            SpendInfo::Legacy(..) => None,
        }
    }

    /// The legacy spending data, for `pk` and `pkh` descriptors.
    pub fn legacy(&self) -> Option<&LegacySpend> {
        match self.spend {
            SpendInfo::Legacy(ref legacy) => Some(legacy),
            SpendInfo::Taproot(..) => None,
        }
    }
}

/// Spending data, per output type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendInfo {
    /// A `pk` or `pkh` output, spent with an ECDSA signature.
    Legacy(LegacySpend),
    /// A Taproot output.
    Taproot(TaprootSpend),
}

/// The shape of a legacy output script.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LegacyKind {
    /// `<key> OP_CHECKSIG`
    Pk,
    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    Pkh,
}

/// Spending data of a legacy output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacySpend {
    /// The script template.
    pub kind: LegacyKind,
    /// The public key.
    pub key: bitcoin::PublicKey,
    /// Where the key comes from.
    pub key_origin: KeySource,
}

/// Spending data of a Taproot output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaprootSpend {
    /// Internal key, merkle root, output key and control blocks.
    pub spend_info: Arc<TaprootSpendInfo>,
    /// How the key path may be used.
    pub key_path: KeyPath,
    /// Where the internal key comes from. `None` for NUMS points.
    pub internal_key_origin: Option<KeySource>,
    /// The leaves in depth-first order.
    pub leaves: Vec<ResolvedLeaf>,
}

impl TaprootSpend {
    /// The internal key.
    pub fn internal_key(&self) -> XOnlyPublicKey { self.spend_info.internal_key() }

    /// Origins of every key in the output, with the leaves each key appears in.
    ///
    /// The internal key maps to an empty leaf list.
    pub fn tap_key_origins(&self) -> BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)> {
        let mut origins: BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)> = BTreeMap::new();
        if let Some(ref origin) = self.internal_key_origin {
            origins.insert(self.internal_key(), (vec![], origin.clone()));
        }
        for leaf in &self.leaves {
            if let Some((key, ref origin)) = leaf.key {
                let entry = origins.entry(key).or_insert_with(|| (vec![], origin.clone()));
                if !entry.0.contains(&leaf.leaf_hash) {
                    entry.0.push(leaf.leaf_hash);
                }
            }
        }
        origins
    }
}

/// A resolved leaf script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLeaf {
    /// The tapscript.
    pub script: ScriptBuf,
    /// Its leaf version.
    pub leaf_version: LeafVersion,
    /// Its leaf hash.
    pub leaf_hash: TapLeafHash,
    /// Depth of the leaf in the tree.
    pub depth: u8,
    /// The control block proving the leaf's inclusion.
    pub control_block: ControlBlock,
    /// The key of a `pk` or `pkh` leaf, with its origin.
    pub key: Option<(XOnlyPublicKey, KeySource)>,
}
