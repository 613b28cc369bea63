// SPDX-License-Identifier: CC0-1.0

//! Taproot Output Construction
//!
//! Commits an internal key and a tree of leaf scripts to a Taproot output key,
//! following [BIP-341]. The tree is either given explicitly, as leaves in
//! depth-first order together with their depths ([`TaprootBuilder`]), or built
//! balanced over an ordered list of scripts ([`construct`]).
//!
//! Every leaf of the finished tree carries its Merkle path, so that its
//! [`ControlBlock`] can be produced without walking the tree again.
//!
//! [BIP-341]: <https://github.com/bitcoin/bips/blob/master/bip-0341.mediawiki>

mod control_block;

use core::fmt;
use std::collections::BTreeMap;
use std::error;

use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::opcodes::all::OP_PUSHNUM_1;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{self, Parity, Scalar, Secp256k1, Verification, XOnlyPublicKey};
use bitcoin::taproot::{
    LeafVersion, TapLeafHash, TapNodeHash, TapTweakHash, TAPROOT_CONTROL_MAX_NODE_COUNT,
};
use bitcoin::{Script, ScriptBuf};

pub use self::control_block::{ControlBlock, ControlBlockError};
use crate::util::push_var_slice;

/// Computes the `TapLeaf` tagged hash of a script.
pub fn leaf_hash(script: &Script, version: LeafVersion) -> TapLeafHash {
    let mut buf = Vec::with_capacity(script.len() + 4);
    buf.push(version.to_consensus());
    push_var_slice(&mut buf, script.as_bytes());

    let mut eng = TapLeafHash::engine();
    eng.input(&buf);
    TapLeafHash::from_engine(eng)
}

/// Computes the `TapBranch` tagged hash of two sibling nodes.
///
/// The children are sorted before hashing, so the result does not depend on
/// the order in which they are given.
pub fn branch_hash(a: TapNodeHash, b: TapNodeHash) -> TapNodeHash {
    let (a, b) = (a.to_byte_array(), b.to_byte_array());
    let mut eng = TapNodeHash::engine();
    if a < b {
        eng.input(&a);
        eng.input(&b);
    } else {
        eng.input(&b);
        eng.input(&a);
    }
    TapNodeHash::from_engine(eng)
}

/// Computes the `TapTweak` tagged hash of an internal key and optional Merkle root.
pub fn tweak_hash(internal_key: &XOnlyPublicKey, merkle_root: Option<TapNodeHash>) -> TapTweakHash {
    let mut eng = TapTweakHash::engine();
    eng.input(&internal_key.serialize());
    if let Some(root) = merkle_root {
        eng.input(&root.to_byte_array());
    }
    TapTweakHash::from_engine(eng)
}

/// Converts a tweak hash to a curve scalar.
pub(crate) fn tweak_scalar(tweak: TapTweakHash) -> Result<Scalar, TaprootError> {
    Scalar::from_be_bytes(tweak.to_byte_array()).map_err(|_| TaprootError::TweakOutOfRange)
}

fn leaf_node(hash: TapLeafHash) -> TapNodeHash { TapNodeHash::from_byte_array(hash.to_byte_array()) }

/// Parses an internal key given either as 32 x-only bytes or as a full
/// (33- or 65-byte) public key encoding.
pub fn parse_internal_key(bytes: &[u8]) -> Result<XOnlyPublicKey, TaprootError> {
    match bytes.len() {
        32 => XOnlyPublicKey::from_slice(bytes).map_err(TaprootError::InvalidKey),
        33 | 65 => secp256k1::PublicKey::from_slice(bytes)
            .map(|pk| pk.x_only_public_key().0)
            .map_err(TaprootError::InvalidKey),
        _ => Err(TaprootError::InvalidKey(secp256k1::Error::InvalidPublicKey)),
    }
}

/// Builds the Taproot output for `internal_key` committing to `leaf_scripts`.
///
/// The scripts are arranged in a balanced tree, in the given order: the first
/// half of the list goes to the left subtree and the rest to the right, the
/// left side taking the extra script when the count is odd. All leaves use the
/// tapscript leaf version.
pub fn construct(
    internal_key: &[u8],
    leaf_scripts: &[ScriptBuf],
) -> Result<TaprootSpendInfo, TaprootError> {
    let internal_key = parse_internal_key(internal_key)?;
    if leaf_scripts.is_empty() {
        return Err(TaprootError::EmptyTree);
    }

    let mut builder = TaprootBuilder::new(internal_key);
    for (depth, script) in balanced_depths(leaf_scripts.len()).into_iter().zip(leaf_scripts) {
        builder = builder.add_leaf(depth, script.clone())?;
    }
    builder.finalize()
}

/// Depths of `n` leaves arranged in a balanced tree, in depth-first order.
pub(crate) fn balanced_depths(n: usize) -> Vec<u8> {
    fn walk(n: usize, depth: u8, out: &mut Vec<u8>) {
        if n <= 1 {
            out.push(depth);
        } else {
            let left = (n + 1) / 2;
            walk(left, depth.saturating_add(1), out);
            walk(n - left, depth.saturating_add(1), out);
        }
    }

    let mut out = Vec::with_capacity(n);
    if n > 0 {
        walk(n, 0, &mut out);
    }
    out
}

/// A leaf of a finished Taproot tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeafInfo {
    script: ScriptBuf,
    version: LeafVersion,
    hash: TapLeafHash,
    /// Sibling hashes, ordered from the leaf up to the root.
    merkle_branch: Vec<TapNodeHash>,
}

impl LeafInfo {
    fn new(script: ScriptBuf, version: LeafVersion) -> Self {
        let hash = leaf_hash(&script, version);
        LeafInfo { script, version, hash, merkle_branch: vec![] }
    }

    /// The leaf script.
    pub fn script(&self) -> &Script { &self.script }

    /// The leaf version.
    pub fn leaf_version(&self) -> LeafVersion { self.version }

    /// The `TapLeaf` hash of this leaf.
    pub fn leaf_hash(&self) -> TapLeafHash { self.hash }

    /// The depth of this leaf, zero being the root.
    pub fn depth(&self) -> u8 {
        // The branch length is bounded by `TAPROOT_CONTROL_MAX_NODE_COUNT`.
        self.merkle_branch.len() as u8
    }

    /// The sibling hashes from this leaf up to the root.
    pub fn merkle_branch(&self) -> &[TapNodeHash] { &self.merkle_branch }
}

/// A subtree under construction: its hash and the leaves below it.
#[derive(Clone, Debug)]
struct NodeInfo {
    hash: TapNodeHash,
    leaves: Vec<usize>,
}

/// Builder for a Taproot tree with an explicit shape.
///
/// Leaves must be added in depth-first, left-to-right order, each with its
/// depth in the final tree. For example the tree
///
/// ```text
///        root
///       /    \
///      A      .
///            / \
///           B   C
/// ```
///
/// is built with `add_leaf(1, A)`, `add_leaf(2, B)`, `add_leaf(2, C)`.
#[derive(Clone, Debug)]
pub struct TaprootBuilder {
    internal_key: XOnlyPublicKey,
    /// Incomplete subtrees, indexed by depth.
    branch: Vec<Option<NodeInfo>>,
    leaves: Vec<LeafInfo>,
}

impl TaprootBuilder {
    /// Starts a new tree for the given internal key.
    pub fn new(internal_key: XOnlyPublicKey) -> Self {
        TaprootBuilder { internal_key, branch: vec![], leaves: vec![] }
    }

    /// Computes the output for a key-path-only output, without any script tree.
    pub fn key_spend_only(internal_key: XOnlyPublicKey) -> Result<TaprootSpendInfo, TaprootError> {
        TaprootSpendInfo::new(internal_key, None, vec![])
    }

    /// Adds a tapscript leaf at `depth`.
    pub fn add_leaf(self, depth: u8, script: ScriptBuf) -> Result<Self, TaprootError> {
        self.add_leaf_with_ver(depth, script, LeafVersion::TapScript)
    }

    /// Adds a leaf with an explicit leaf version at `depth`.
    pub fn add_leaf_with_ver(
        mut self,
        depth: u8,
        script: ScriptBuf,
        version: LeafVersion,
    ) -> Result<Self, TaprootError> {
        if usize::from(depth) > TAPROOT_CONTROL_MAX_NODE_COUNT {
            return Err(TaprootError::DepthTooLarge(depth));
        }
        let index = self.leaves.len();
        self.leaves.push(LeafInfo::new(script, version));
        let node = NodeInfo { hash: leaf_node(self.leaves[index].hash), leaves: vec![index] };
        self.insert(node, depth)
    }

    /// Whether the leaves added so far form a complete tree.
    pub fn is_finalizable(&self) -> bool { self.branch.len() == 1 && self.branch[0].is_some() }

    fn insert(mut self, mut node: NodeInfo, mut depth: u8) -> Result<Self, TaprootError> {
        // A shallower leaf cannot be placed while a deeper subtree is unfinished.
        if usize::from(depth) + 1 < self.branch.len() {
            return Err(TaprootError::InvalidTreeShape);
        }

        while self.branch.len() == usize::from(depth) + 1 {
            let sibling = match self.branch.pop() {
                Some(Some(sibling)) => sibling,
                Some(None) => {
                    self.branch.push(None);
                    break;
                }
                None => break,
            };
            if depth == 0 {
                // The tree was already complete.
                return Err(TaprootError::InvalidTreeShape);
            }
            node = self.combine(sibling, node);
            depth -= 1;
        }

        if self.branch.len() < usize::from(depth) + 1 {
            self.branch.resize(usize::from(depth) + 1, None);
        }
        self.branch[usize::from(depth)] = Some(node);
        Ok(self)
    }

    fn combine(&mut self, a: NodeInfo, b: NodeInfo) -> NodeInfo {
        for &i in &a.leaves {
            self.leaves[i].merkle_branch.push(b.hash);
        }
        for &i in &b.leaves {
            self.leaves[i].merkle_branch.push(a.hash);
        }
        let hash = branch_hash(a.hash, b.hash);
        log::trace!("combined taproot nodes {} and {} into {}", a.hash, b.hash, hash);

        let mut leaves = a.leaves;
        leaves.extend(b.leaves);
        NodeInfo { hash, leaves }
    }

    /// Finishes the tree and computes the output key.
    pub fn finalize(mut self) -> Result<TaprootSpendInfo, TaprootError> {
        if self.leaves.is_empty() {
            return Err(TaprootError::EmptyTree);
        }
        if !self.is_finalizable() {
            return Err(TaprootError::InvalidTreeShape);
        }
        let root = match self.branch.pop() {
            Some(Some(root)) => root,
            _ => return Err(TaprootError::InvalidTreeShape),
        };
        TaprootSpendInfo::new(self.internal_key, Some(root.hash), self.leaves)
    }
}

/// A committed Taproot output: internal key, tree and tweaked output key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaprootSpendInfo {
    internal_key: XOnlyPublicKey,
    merkle_root: Option<TapNodeHash>,
    tweak: TapTweakHash,
    output_key: XOnlyPublicKey,
    output_key_parity: Parity,
    leaves: Vec<LeafInfo>,
}

impl TaprootSpendInfo {
    fn new(
        internal_key: XOnlyPublicKey,
        merkle_root: Option<TapNodeHash>,
        leaves: Vec<LeafInfo>,
    ) -> Result<Self, TaprootError> {
        let secp = Secp256k1::verification_only();
        let tweak = tweak_hash(&internal_key, merkle_root);
        let (output_key, output_key_parity) = internal_key
            .add_tweak(&secp, &tweak_scalar(tweak)?)
            .map_err(|_| TaprootError::TweakOutOfRange)?;

        Ok(TaprootSpendInfo {
            internal_key,
            merkle_root,
            tweak,
            output_key,
            output_key_parity,
            leaves,
        })
    }

    /// The untweaked internal key.
    pub fn internal_key(&self) -> XOnlyPublicKey { self.internal_key }

    /// The Merkle root of the script tree, if there is one.
    pub fn merkle_root(&self) -> Option<TapNodeHash> { self.merkle_root }

    /// The tweak applied to the internal key.
    pub fn tweak(&self) -> TapTweakHash { self.tweak }

    /// The tweaked output key.
    #[doc(alias = "external_key")]
    pub fn output_key(&self) -> XOnlyPublicKey { self.output_key }

    /// The parity of the tweaked output key.
    pub fn output_key_parity(&self) -> Parity { self.output_key_parity }

    /// The segwit v1 `scriptPubKey` paying to the output key.
    pub fn script_pubkey(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(OP_PUSHNUM_1)
            .push_slice(self.output_key.serialize())
            .into_script()
    }

    /// The leaves of the tree, in depth-first order.
    pub fn leaves(&self) -> &[LeafInfo] { &self.leaves }

    /// The control block for a specific leaf of this tree.
    pub fn leaf_control_block(&self, leaf: &LeafInfo) -> ControlBlock {
        ControlBlock {
            leaf_version: leaf.version,
            output_key_parity: self.output_key_parity,
            internal_key: self.internal_key,
            merkle_branch: leaf.merkle_branch.clone(),
        }
    }

    /// The control block for `script`, if it is committed to by this tree.
    ///
    /// When the same script appears at several places in the tree, the
    /// shallowest one is used.
    pub fn control_block(&self, script: &Script, version: LeafVersion) -> Option<ControlBlock> {
        self.leaves
            .iter()
            .filter(|leaf| leaf.version == version && leaf.script.as_script() == script)
            .min_by_key(|leaf| leaf.merkle_branch.len())
            .map(|leaf| self.leaf_control_block(leaf))
    }

    /// Control blocks for every distinct (script, version) pair in the tree.
    pub fn control_blocks(&self) -> BTreeMap<(ScriptBuf, LeafVersion), ControlBlock> {
        let mut ret: BTreeMap<(ScriptBuf, LeafVersion), ControlBlock> = BTreeMap::new();
        for leaf in &self.leaves {
            let key = (leaf.script.clone(), leaf.version);
            let shorter = match ret.get(&key) {
                Some(existing) => leaf.merkle_branch.len() < existing.merkle_branch.len(),
                None => true,
            };
            if shorter {
                ret.insert(key, self.leaf_control_block(leaf));
            }
        }
        ret
    }

    /// Checks that the output key commits to the internal key and Merkle root.
    pub fn verify_tweak<C: Verification>(&self, secp: &Secp256k1<C>) -> bool {
        match tweak_scalar(self.tweak) {
            Ok(scalar) => self.internal_key.tweak_add_check(
                secp,
                &self.output_key,
                self.output_key_parity,
                scalar,
            ),
            Err(_) => false,
        }
    }
}

/// Errors when building a Taproot output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaprootError {
    /// The internal key is not a valid curve point.
    InvalidKey(secp256k1::Error),
    /// A script tree was requested without any leaves.
    EmptyTree,
    /// Leaves were not given in depth-first order, or do not form a full binary tree.
    InvalidTreeShape,
    /// A leaf depth exceeds the 128 levels a control block can prove.
    DepthTooLarge(u8),
    /// The tweak hash is not a valid scalar, or tweaking gave the point at infinity.
    TweakOutOfRange,
}

impl fmt::Display for TaprootError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TaprootError::InvalidKey(ref e) => write!(f, "invalid internal key: {}", e),
            TaprootError::EmptyTree => f.write_str("taproot tree has no leaves"),
            TaprootError::InvalidTreeShape => {
                f.write_str("leaves do not form a full binary tree in depth-first order")
            }
            TaprootError::DepthTooLarge(depth) => write!(
                f,
                "leaf depth {} exceeds maximum of {}",
                depth, TAPROOT_CONTROL_MAX_NODE_COUNT
            ),
            TaprootError::TweakOutOfRange => f.write_str("taproot tweak out of range"),
        }
    }
}

impl error::Error for TaprootError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            TaprootError::InvalidKey(ref e) => Some(e),
            TaprootError::EmptyTree
            | TaprootError::InvalidTreeShape
            | TaprootError::DepthTooLarge(..)
            | TaprootError::TweakOutOfRange => None,
        }
    }
}
