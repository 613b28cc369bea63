// SPDX-License-Identifier: CC0-1.0

//! # Taproot Output Descriptors
//!
//! `tap(KEY[,TREE...])` commits an internal key to an optional tree of leaf
//! scripts. Each `TREE` is a leaf or a `{TREE,TREE}` branch, and several tree
//! arguments are combined into one balanced tree in argument order. The
//! single-tree form `tr(KEY[,TREE])` is accepted as well.

mod taptree;

use core::fmt;
use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Secp256k1, Signing};
use bitcoin::taproot::TAPROOT_CONTROL_MAX_NODE_COUNT;
use bitcoin::{Address, Network, ScriptBuf};

pub use self::taptree::{TapTreeIter, TapTreeIterItem};
use super::{parse_key, single_arg, KeyContext};
use crate::descriptor::{DescriptorKey, KeyPath};
use crate::error::{ParseError, ParseErrorKind};
use crate::expression::{Parens, Tree};
use crate::taproot::{TaprootBuilder, TaprootError, TaprootSpendInfo};

/// A leaf script of a Taproot tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafScript {
    /// `<xonly> OP_CHECKSIG`
    Pk(DescriptorKey),
    /// `OP_DUP OP_HASH160 <hash160(pubkey)> OP_EQUALVERIFY OP_CHECKSIG`, the
    /// same script as a top-level `pkh`.
    Pkh(DescriptorKey),
    /// An arbitrary script.
    Raw(ScriptBuf),
}

impl LeafScript {
    /// The tapscript of this leaf.
    pub fn encode(&self) -> ScriptBuf {
        match *self {
            LeafScript::Pk(ref key) => Builder::new()
                .push_x_only_key(&key.to_x_only_pubkey())
                .push_opcode(OP_CHECKSIG)
                .into_script(),
            LeafScript::Pkh(ref key) => Builder::new()
                .push_opcode(OP_DUP)
                .push_opcode(OP_HASH160)
                .push_slice(key.to_public_key().pubkey_hash().to_byte_array())
                .push_opcode(OP_EQUALVERIFY)
                .push_opcode(OP_CHECKSIG)
                .into_script(),
            LeafScript::Raw(ref script) => script.clone(),
        }
    }

    /// The key of a `pk` or `pkh` leaf.
    pub fn key(&self) -> Option<&DescriptorKey> {
        match *self {
            LeafScript::Pk(ref key) | LeafScript::Pkh(ref key) => Some(key),
            LeafScript::Raw(..) => None,
        }
    }

    fn to_public(&self) -> LeafScript {
        match *self {
            LeafScript::Pk(ref key) => LeafScript::Pk(key.to_public()),
            LeafScript::Pkh(ref key) => LeafScript::Pkh(key.to_public()),
            LeafScript::Raw(ref script) => LeafScript::Raw(script.clone()),
        }
    }
}

impl fmt::Display for LeafScript {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LeafScript::Pk(ref key) => write!(f, "pk({})", key),
            LeafScript::Pkh(ref key) => write!(f, "pkh({})", key),
            LeafScript::Raw(ref script) => write!(f, "raw({})", script.as_bytes().as_hex()),
        }
    }
}

/// A Taproot Tree representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapTree {
    /// A taproot tree structure
    Tree {
        /// Left tree branch.
        left: Arc<TapTree>,
        /// Right tree branch.
        right: Arc<TapTree>,
        /// Tree height, defined as `1 + max(left_height, right_height)`.
        height: u8,
    },
    /// A taproot leaf
    Leaf(Arc<LeafScript>),
}

impl TapTree {
    /// Creates a leaf.
    pub fn leaf(leaf: LeafScript) -> Self { TapTree::Leaf(Arc::new(leaf)) }

    /// Creates a `TapTree` by combining `left` and `right` tree nodes.
    pub fn combine(left: TapTree, right: TapTree) -> Self {
        let height = 1 + core::cmp::max(left.height(), right.height());
        TapTree::Tree { left: Arc::new(left), right: Arc::new(right), height }
    }

    /// Combines subtrees into a balanced tree, keeping their order.
    pub fn balanced(mut nodes: Vec<TapTree>) -> Option<TapTree> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            n => {
                let right = nodes.split_off((n + 1) / 2);
                Some(TapTree::combine(TapTree::balanced(nodes)?, TapTree::balanced(right)?))
            }
        }
    }

    /// Returns the height of this tree.
    pub fn height(&self) -> u8 {
        match *self {
            TapTree::Tree { left: _, right: _, height } => height,
            TapTree::Leaf(..) => 0,
        }
    }

    /// Iterates over all the leaves of the tree in depth-first preorder.
    pub fn leaves(&self) -> TapTreeIter<'_> { TapTreeIter::from_tree(self) }

    fn to_public(&self) -> TapTree {
        match *self {
            TapTree::Tree { ref left, ref right, height } => TapTree::Tree {
                left: Arc::new(left.to_public()),
                right: Arc::new(right.to_public()),
                height,
            },
            TapTree::Leaf(ref leaf) => TapTree::leaf(leaf.to_public()),
        }
    }

    pub(super) fn from_tree<C: Signing>(
        secp: &Secp256k1<C>,
        tree: &Tree,
        depth: usize,
    ) -> Result<TapTree, ParseError> {
        if depth > TAPROOT_CONTROL_MAX_NODE_COUNT {
            return Err(ParseError::new(tree, ParseErrorKind::TreeTooDeep));
        }

        match (tree.name, tree.parens) {
            ("", Parens::Curly) => {
                if tree.args.len() != 2 {
                    return Err(ParseError::new(
                        tree,
                        ParseErrorKind::WrongArity { expected: "2", found: tree.args.len() },
                    ));
                }
                let left = TapTree::from_tree(secp, &tree.args[0], depth + 1)?;
                let right = TapTree::from_tree(secp, &tree.args[1], depth + 1)?;
                Ok(TapTree::combine(left, right))
            }
            ("pk", Parens::Round) => {
                let key = parse_key(secp, single_arg(tree)?, KeyContext::Taproot)?;
                Ok(TapTree::leaf(LeafScript::Pk(key)))
            }
            ("pkh", Parens::Round) => {
                let key = parse_key(secp, single_arg(tree)?, KeyContext::Taproot)?;
                Ok(TapTree::leaf(LeafScript::Pkh(key)))
            }
            ("raw", Parens::Round) => {
                let arg = single_arg(tree)?;
                if !arg.is_terminal() {
                    return Err(ParseError::new(arg, ParseErrorKind::InvalidHex));
                }
                let bytes = Vec::<u8>::from_hex(arg.name)
                    .map_err(|_| ParseError::new(arg, ParseErrorKind::InvalidHex))?;
                Ok(TapTree::leaf(LeafScript::Raw(ScriptBuf::from_bytes(bytes))))
            }
            ("tap", Parens::Round) | ("tr", Parens::Round) => {
                Err(ParseError::new(tree, ParseErrorKind::NestingNotAllowed))
            }
            (_, Parens::None) | ("nums", Parens::Round) => {
                let key = parse_key(secp, tree, KeyContext::Taproot)?;
                Ok(TapTree::leaf(LeafScript::Pk(key)))
            }
            _ => Err(ParseError::new(tree, ParseErrorKind::UnknownFunction)),
        }
    }
}

impl fmt::Display for TapTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TapTree::Tree { ref left, ref right, height: _ } => write!(f, "{{{},{}}}", left, right),
            TapTree::Leaf(ref leaf) => fmt::Display::fmt(leaf, f),
        }
    }
}

/// Which spelling of the descriptor was parsed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Syntax {
    Tap,
    Tr,
}

/// A Taproot descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tap {
    internal_key: DescriptorKey,
    /// The tree arguments as written.
    branches: Vec<TapTree>,
    /// The combined tree.
    tree: Option<TapTree>,
    spend_info: Arc<TaprootSpendInfo>,
    syntax: Syntax,
}

impl Tap {
    /// Creates a new Taproot descriptor. Several `branches` are combined into a
    /// balanced tree in the given order.
    pub fn new(internal_key: DescriptorKey, branches: Vec<TapTree>) -> Result<Self, TaprootError> {
        let tree = TapTree::balanced(branches.clone());
        let spend_info = Arc::new(compute_spend_info(&internal_key, tree.as_ref())?);
        Ok(Tap { internal_key, branches, tree, spend_info, syntax: Syntax::Tap })
    }

    /// The internal key.
    pub fn internal_key(&self) -> &DescriptorKey { &self.internal_key }

    /// The tree arguments as given.
    pub fn branches(&self) -> &[TapTree] { &self.branches }

    /// The combined script tree, if there is one.
    pub fn tap_tree(&self) -> Option<&TapTree> { self.tree.as_ref() }

    /// Iterates over all the leaves of the combined tree in depth-first preorder.
    pub fn leaves(&self) -> TapTreeIter<'_> {
        match self.tree {
            Some(ref tree) => tree.leaves(),
            None => TapTreeIter::empty(),
        }
    }

    /// The committed output, with control blocks for every leaf.
    pub fn spend_info(&self) -> &Arc<TaprootSpendInfo> { &self.spend_info }

    /// How the key path may be used.
    pub fn key_path(&self) -> KeyPath {
        match self.internal_key {
            DescriptorKey::Nums(..) => KeyPath::Unspendable,
            DescriptorKey::Private(..) => KeyPath::Signable,
            DescriptorKey::Public(..) => KeyPath::WatchOnly,
        }
    }

    /// Obtains the corresponding script pubkey for this descriptor.
    pub fn script_pubkey(&self) -> ScriptBuf { self.spend_info.script_pubkey() }

    /// The P2TR address.
    pub fn address(&self, network: Network) -> Option<Address> {
        Address::from_script(&self.script_pubkey(), network).ok()
    }

    /// This descriptor with any private key replaced by its public key.
    pub fn to_public(&self) -> Tap {
        Tap {
            internal_key: self.internal_key.to_public(),
            branches: self.branches.iter().map(TapTree::to_public).collect(),
            tree: self.tree.as_ref().map(TapTree::to_public),
            spend_info: Arc::clone(&self.spend_info),
            syntax: self.syntax,
        }
    }

    /// Every key of the descriptor, internal key first.
    pub fn keys(&self) -> Vec<&DescriptorKey> {
        let mut keys = vec![&self.internal_key];
        keys.extend(self.leaves().filter_map(|item| item.leaf().key()));
        keys
    }

    pub(super) fn from_tree<C: Signing>(
        secp: &Secp256k1<C>,
        top: &Tree,
    ) -> Result<Tap, crate::Error> {
        let syntax = match top.name {
            "tr" => Syntax::Tr,
            _ => Syntax::Tap,
        };
        let arity_ok = match syntax {
            Syntax::Tap => !top.args.is_empty(),
            Syntax::Tr => top.args.len() == 1 || top.args.len() == 2,
        };
        if !arity_ok {
            let expected = match syntax {
                Syntax::Tap => "at least 1",
                Syntax::Tr => "1 or 2",
            };
            return Err(ParseError::new(
                top,
                ParseErrorKind::WrongArity { expected, found: top.args.len() },
            )
            .into());
        }

        let internal_key = parse_key(secp, &top.args[0], KeyContext::Taproot)?;
        let branches = top.args[1..]
            .iter()
            .map(|arg| TapTree::from_tree(secp, arg, 0))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tap = Tap::new(internal_key, branches)?;
        tap.syntax = syntax;
        Ok(tap)
    }
}

fn compute_spend_info(
    internal_key: &DescriptorKey,
    tree: Option<&TapTree>,
) -> Result<TaprootSpendInfo, TaprootError> {
    let internal_key = internal_key.to_x_only_pubkey();
    match tree {
        None => TaprootBuilder::key_spend_only(internal_key),
        Some(tree) => {
            let mut builder = TaprootBuilder::new(internal_key);
            for item in tree.leaves() {
                builder =
                    builder.add_leaf_with_ver(item.depth(), item.compute_script(), item.leaf_version())?;
            }
            builder.finalize()
        }
    }
}

impl fmt::Display for Tap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self.syntax {
            Syntax::Tap => "tap",
            Syntax::Tr => "tr",
        };
        write!(f, "{}({}", name, self.internal_key)?;
        for branch in &self.branches {
            write!(f, ",{}", branch)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::taproot::LeafVersion;

    use super::*;
    use crate::descriptor::NumsPoint;
    use crate::expression::Tree;
    use crate::hex_script;
    use crate::taproot;

    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const K2: &str = "03cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115";

    fn parse(s: &str) -> Result<Tap, crate::Error> {
        let secp = Secp256k1::signing_only();
        Tap::from_tree(&secp, &Tree::from_str(s).unwrap())
    }

    #[test]
    fn leaf_scripts() {
        let key = DescriptorKey::from_str(G).unwrap();
        let pk = LeafScript::Pk(key.clone()).encode();
        assert_eq!(pk.len(), 34);
        assert_eq!(pk.as_bytes()[0], 0x20);
        assert_eq!(pk.as_bytes()[33], 0xac);
        assert_eq!(&pk.as_bytes()[1..33], &key.to_x_only_pubkey().serialize()[..]);

        let pkh = LeafScript::Pkh(key.clone()).encode();
        assert_eq!(pkh, hex_script("76a914751e76e8199196d454941c45d1b3a323f1433bd688ac"));
        assert_eq!(pkh, crate::descriptor::bare::Pkh::new(key).unwrap().script_pubkey());

        // The hash commits to the full key, odd parity included.
        let odd = DescriptorKey::from_str(K2).unwrap();
        let tap = parse(&format!("tap({},pkh({}))", K2, K2)).unwrap();
        let leaf = tap.leaves().next().unwrap().compute_script();
        assert_eq!(leaf, crate::descriptor::bare::Pkh::new(odd).unwrap().script_pubkey());
    }

    #[test]
    fn multiple_branches_are_balanced() {
        let tap = parse(&format!("tap({},pk({}),pkh({}),raw(51))", K2, G, G)).unwrap();
        let depths: Vec<u8> = tap.leaves().map(|item| item.depth()).collect();
        assert_eq!(depths, vec![2, 2, 1]);
        assert_eq!(tap.branches().len(), 3);
        assert_eq!(tap.tap_tree().unwrap().height(), 2);

        let scripts: Vec<ScriptBuf> = tap.leaves().map(|item| item.compute_script()).collect();
        let key = DescriptorKey::from_str(K2).unwrap().to_public_key().to_bytes();
        let expected = taproot::construct(&key, &scripts).unwrap();
        assert_eq!(tap.script_pubkey(), expected.script_pubkey());
        assert_eq!(tap.spend_info().merkle_root(), expected.merkle_root());

        // Explicit braces give the same tree.
        let braced = parse(&format!("tap({},{{{{pk({}),pkh({})}},raw(51)}})", K2, G, G)).unwrap();
        assert_eq!(braced.script_pubkey(), tap.script_pubkey());
        let tr = parse(&format!("tr({},{{{{pk({}),pkh({})}},raw(51)}})", K2, G, G)).unwrap();
        assert_eq!(tr.script_pubkey(), tap.script_pubkey());
        assert!(tr.to_string().starts_with("tr("));
    }

    #[test]
    fn display_roundtrip() {
        let s = format!("tap({},pk({}),{{raw(51),pkh({})}})", K2, G, G);
        let tap = parse(&s).unwrap();
        assert_eq!(tap.to_string(), s);
        assert_eq!(parse(&tap.to_string()).unwrap(), tap);
    }

    #[test]
    fn key_path_classification() {
        let nums = "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";
        assert_eq!(parse(&format!("tap({},pk({}))", nums, G)).unwrap().key_path(), KeyPath::Unspendable);
        assert_eq!(parse(&format!("tap(02{},pk({}))", nums, G)).unwrap().key_path(), KeyPath::Unspendable);
        assert_eq!(parse(&format!("tap({})", G)).unwrap().key_path(), KeyPath::WatchOnly);
        let hashed = NumsPoint::hash_to_curve(b"unspendable");
        let tap = parse(&format!("tap({},pk({}))", hashed, G)).unwrap();
        assert_eq!(tap.key_path(), KeyPath::Unspendable);
        assert_eq!(parse(&tap.to_string()).unwrap(), tap);
        assert_eq!(
            parse("tap(cVt4o7BGAig1UXywgGSmARhxMdzP5qvQsxKkSsc1XEkw3tDTQFpy)").unwrap().key_path(),
            KeyPath::Signable
        );
    }

    #[test]
    fn parse_errors() {
        let err = |s: &str| match parse(s) {
            Err(crate::Error::Parse(e)) => e,
            other => panic!("unexpected {:?}", other),
        };

        let e = err("tap()");
        assert!(matches!(e.kind, ParseErrorKind::MalformedKey(..)));

        let e = err(&format!("tr({},pk({}),pk({}))", K2, G, G));
        assert_eq!(e.kind, ParseErrorKind::WrongArity { expected: "1 or 2", found: 3 });

        let e = err(&format!("tap({},tap({}))", K2, G));
        assert_eq!(e.kind, ParseErrorKind::NestingNotAllowed);
        assert_eq!(e.position, 71);

        let e = err(&format!("tap({},foo({}))", K2, G));
        assert_eq!(e.kind, ParseErrorKind::UnknownFunction);
        assert_eq!(e.fragment, format!("foo({})", G));

        let e = err(&format!("tap({},raw(5))", K2));
        assert_eq!(e.kind, ParseErrorKind::InvalidHex);
        assert_eq!(e.fragment, "5");

        let e = err(&format!("tap({},{{pk({})}})", K2, G));
        assert_eq!(e.kind, ParseErrorKind::WrongArity { expected: "2", found: 1 });

        let uncompressed = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";
        let e = err(&format!("tap({})", uncompressed));
        assert_eq!(e.kind, ParseErrorKind::UncompressedKeyInTaproot);
        assert_eq!(e.position, 4);
    }

    #[test]
    fn tree_depth_limit() {
        let mut tree = "raw(51)".to_owned();
        for _ in 0..129 {
            tree = format!("{{{},raw(52)}}", tree);
        }
        let e = match parse(&format!("tap({},{})", K2, tree)) {
            Err(crate::Error::Parse(e)) => e,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(e.kind, ParseErrorKind::TreeTooDeep);

        let mut tree = "raw(51)".to_owned();
        for _ in 0..128 {
            tree = format!("{{{},raw(52)}}", tree);
        }
        let tap = parse(&format!("tap({},{})", K2, tree)).unwrap();
        let deepest = tap.leaves().next().unwrap();
        assert_eq!(deepest.depth(), 128);
        let cb = tap
            .spend_info()
            .control_block(&deepest.compute_script(), LeafVersion::TapScript)
            .unwrap();
        assert_eq!(cb.size(), 33 + 32 * 128);
    }

    #[test]
    fn to_public_keeps_output() {
        let tap =
            parse(&format!("tap(cVt4o7BGAig1UXywgGSmARhxMdzP5qvQsxKkSsc1XEkw3tDTQFpy,pk({}))", G))
                .unwrap();
        let public = tap.to_public();
        assert_eq!(public.script_pubkey(), tap.script_pubkey());
        assert_eq!(public.key_path(), KeyPath::WatchOnly);
        assert!(public.keys().iter().all(|k| k.secret_key().is_none()));
    }
}
