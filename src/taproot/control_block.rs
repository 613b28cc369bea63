// SPDX-License-Identifier: CC0-1.0

//! Control Blocks
//!
//! The proof, carried as the last script-path witness element, that a leaf
//! script is committed to by a Taproot output key.

use core::fmt;
use std::error;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, Parity, Secp256k1, Verification, XOnlyPublicKey};
use bitcoin::taproot::{
    LeafVersion, TapNodeHash, TAPROOT_CONTROL_BASE_SIZE, TAPROOT_CONTROL_MAX_NODE_COUNT,
    TAPROOT_CONTROL_NODE_SIZE, TAPROOT_LEAF_MASK,
};
use bitcoin::Script;

use super::{branch_hash, leaf_hash, leaf_node, tweak_hash, tweak_scalar};

/// A BIP-341 control block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ControlBlock {
    /// The version of the leaf being proven.
    pub leaf_version: LeafVersion,
    /// The parity of the output key.
    pub output_key_parity: Parity,
    /// The untweaked internal key.
    pub internal_key: XOnlyPublicKey,
    /// Sibling hashes from the leaf up to the root.
    pub merkle_branch: Vec<TapNodeHash>,
}

impl ControlBlock {
    /// Decodes a control block from its serialization.
    pub fn decode(sl: &[u8]) -> Result<Self, ControlBlockError> {
        if sl.len() < TAPROOT_CONTROL_BASE_SIZE
            || (sl.len() - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE != 0
            || (sl.len() - TAPROOT_CONTROL_BASE_SIZE) / TAPROOT_CONTROL_NODE_SIZE
                > TAPROOT_CONTROL_MAX_NODE_COUNT
        {
            return Err(ControlBlockError::InvalidLength(sl.len()));
        }

        let output_key_parity = match sl[0] & 1 {
            0 => Parity::Even,
            _ => Parity::Odd,
        };
        let leaf_version = LeafVersion::from_consensus(sl[0] & TAPROOT_LEAF_MASK)
            .map_err(|_| ControlBlockError::InvalidLeafVersion(sl[0] & TAPROOT_LEAF_MASK))?;
        let internal_key = XOnlyPublicKey::from_slice(&sl[1..TAPROOT_CONTROL_BASE_SIZE])
            .map_err(ControlBlockError::InvalidInternalKey)?;

        let merkle_branch = sl[TAPROOT_CONTROL_BASE_SIZE..]
            .chunks_exact(TAPROOT_CONTROL_NODE_SIZE)
            .map(|chunk| {
                let mut bytes = [0; TAPROOT_CONTROL_NODE_SIZE];
                bytes.copy_from_slice(chunk);
                TapNodeHash::from_byte_array(bytes)
            })
            .collect();

        Ok(ControlBlock { leaf_version, output_key_parity, internal_key, merkle_branch })
    }

    /// The serialized size, `33 + 32 * m` for a branch of `m` hashes.
    pub fn size(&self) -> usize {
        TAPROOT_CONTROL_BASE_SIZE + TAPROOT_CONTROL_NODE_SIZE * self.merkle_branch.len()
    }

    /// Serializes the control block.
    pub fn serialize(&self) -> Vec<u8> {
        let parity = match self.output_key_parity {
            Parity::Even => 0,
            Parity::Odd => 1,
        };
        let mut buf = Vec::with_capacity(self.size());
        buf.push(self.leaf_version.to_consensus() | parity);
        buf.extend_from_slice(&self.internal_key.serialize());
        for hash in &self.merkle_branch {
            buf.extend_from_slice(&hash.to_byte_array());
        }
        buf
    }

    /// Recomputes the Merkle root implied by this control block for `script`.
    pub fn merkle_root(&self, script: &Script) -> TapNodeHash {
        self.merkle_branch
            .iter()
            .fold(leaf_node(leaf_hash(script, self.leaf_version)), |cur, sibling| {
                branch_hash(cur, *sibling)
            })
    }

    /// Checks that `output_key` commits to `script` through this control block.
    pub fn verify_taproot_commitment<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        output_key: XOnlyPublicKey,
        script: &Script,
    ) -> bool {
        let tweak = tweak_hash(&self.internal_key, Some(self.merkle_root(script)));
        match tweak_scalar(tweak) {
            Ok(scalar) => self.internal_key.tweak_add_check(
                secp,
                &output_key,
                self.output_key_parity,
                scalar,
            ),
            Err(_) => false,
        }
    }
}

/// Errors decoding a control block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlBlockError {
    /// The length is not `33 + 32 * m` with `m <= 128`.
    InvalidLength(usize),
    /// The leaf version is odd or the annex tag.
    InvalidLeafVersion(u8),
    /// The internal key is not a valid x-only key.
    InvalidInternalKey(secp256k1::Error),
}

impl fmt::Display for ControlBlockError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ControlBlockError::InvalidLength(len) => {
                write!(f, "invalid control block length {}", len)
            }
            ControlBlockError::InvalidLeafVersion(v) => {
                write!(f, "invalid leaf version {:#04x}", v)
            }
            ControlBlockError::InvalidInternalKey(ref e) => {
                write!(f, "invalid control block internal key: {}", e)
            }
        }
    }
}

impl error::Error for ControlBlockError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            ControlBlockError::InvalidInternalKey(ref e) => Some(e),
            ControlBlockError::InvalidLength(..) | ControlBlockError::InvalidLeafVersion(..) => {
                None
            }
        }
    }
}
