// SPDX-License-Identifier: CC0-1.0

use std::sync::Arc;

use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::ScriptBuf;

use super::{LeafScript, TapTree};

/// Iterator over the leaves of a Taptree.
///
/// Yields a pair of (depth, leaf) in a depth first walk
/// For example, this tree:
///                                     - N0 -
///                                    /     \\
///                                   N1      N2
///                                  /  \    /  \\
///                                 A    B  C   N3
///                                            /  \\
///                                           D    E
/// would yield (2, A), (2, B), (2,C), (3, D), (3, E).
///
#[derive(Debug, Clone)]
pub struct TapTreeIter<'a> {
    stack: Vec<(u8, &'a TapTree)>,
}

impl<'a> TapTreeIter<'a> {
    /// An empty iterator.
    pub fn empty() -> Self { Self { stack: vec![] } }

    /// An iterator over a given tree.
    pub(super) fn from_tree(tree: &'a TapTree) -> Self { Self { stack: vec![(0, tree)] } }
}

impl<'a> Iterator for TapTreeIter<'a> {
    type Item = TapTreeIterItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((depth, last)) = self.stack.pop() {
            match *last {
                TapTree::Tree { ref left, ref right, height: _ } => {
                    self.stack.push((depth + 1, right));
                    self.stack.push((depth + 1, left));
                }
                TapTree::Leaf(ref leaf) => return Some(TapTreeIterItem { leaf, depth }),
            }
        }
        None
    }
}

/// A leaf of a Taproot tree, with its depth.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TapTreeIterItem<'a> {
    leaf: &'a Arc<LeafScript>,
    depth: u8,
}

impl<'a> TapTreeIterItem<'a> {
    /// The leaf expression.
    #[inline]
    pub fn leaf(&self) -> &'a Arc<LeafScript> { self.leaf }

    /// The depth of this leaf.
    ///
    /// This is useful for reconstructing the shape of the tree.
    #[inline]
    pub fn depth(&self) -> u8 { self.depth }

    /// The Tapleaf version of this leaf.
    #[inline]
    pub fn leaf_version(&self) -> LeafVersion { LeafVersion::TapScript }

    /// The script of this leaf.
    #[inline]
    pub fn compute_script(&self) -> ScriptBuf { self.leaf.encode() }

    /// The TapLeafHash of this leaf.
    #[inline]
    pub fn compute_tap_leaf_hash(&self) -> TapLeafHash {
        crate::taproot::leaf_hash(&self.compute_script(), self.leaf_version())
    }
}
