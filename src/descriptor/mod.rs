// SPDX-License-Identifier: CC0-1.0

//! # Output Descriptors
//!
//! Tools for representing Bitcoin output's scriptPubKeys as abstract spending
//! policies known as "output descriptors". Three kinds are supported:
//!
//! - `pk(KEY)`, or a bare `KEY`: pay to a public key.
//! - `pkh(KEY)`: pay to the hash of a public key.
//! - `tap(KEY[,TREE...])` or `tr(KEY[,TREE])`: a Taproot output, whose leaves
//!   are `pk(KEY)`, `pkh(KEY)` or `raw(HEX)`. There a key may also be
//!   `nums(HEX)`, a point with no known discrete log.
//!
//! The textual form may carry a [BIP-380] checksum after a `#`.
//!
//! [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>

use core::fmt;
use core::str::FromStr;

use bitcoin::secp256k1::{Secp256k1, Signing};
use bitcoin::{Address, Network, PrivateKey, ScriptBuf};

use crate::error::{ParseError, ParseErrorKind};
use crate::expression::{Parens, Tree};
use crate::Error;

mod bare;
pub mod checksum;
mod key;
mod resolve;
mod tr;

pub use self::bare::{Pk, Pkh};
pub use self::key::{DescriptorKey, KeyParseError, NumsPoint, SinglePriv, SinglePub, SinglePubKey};
pub use self::resolve::{
    KeyPath, LegacyKind, LegacySpend, Resolution, ResolvedLeaf, SpendInfo, TaprootSpend,
};
pub use self::tr::{LeafScript, Tap, TapTree, TapTreeIter, TapTreeIterItem};

/// Script descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    /// Pay-to-PubKey
    Pk(Pk),
    /// Pay-to-PubKey-Hash
    Pkh(Pkh),
    /// Pay-to-Taproot
    Tap(Tap),
}

impl From<Pk> for Descriptor {
    #[inline]
    fn from(inner: Pk) -> Self { Descriptor::Pk(inner) }
}

impl From<Pkh> for Descriptor {
    #[inline]
    fn from(inner: Pkh) -> Self { Descriptor::Pkh(inner) }
}

impl From<Tap> for Descriptor {
    #[inline]
    fn from(inner: Tap) -> Self { Descriptor::Tap(inner) }
}

impl Descriptor {
    /// Parses a descriptor, verifying its checksum if there is one.
    ///
    /// Private keys are turned into public keys with `secp`.
    pub fn parse_descriptor<C: Signing>(secp: &Secp256k1<C>, s: &str) -> Result<Descriptor, Error> {
        let desc_str = checksum::verify_checksum(s)?;
        let top = Tree::from_str(desc_str).map_err(|e| ParseError::from_tree_error(desc_str, e))?;
        Descriptor::from_tree(secp, &top)
    }

    fn from_tree<C: Signing>(secp: &Secp256k1<C>, top: &Tree) -> Result<Descriptor, Error> {
        match (top.name, top.parens) {
            ("pk", Parens::Round) => {
                let key = parse_key(secp, single_arg(top)?, KeyContext::Legacy)?;
                let pk = Pk::new(key).map_err(|kind| ParseError::new(&top.args[0], kind))?;
                Ok(Descriptor::Pk(pk))
            }
            ("pkh", Parens::Round) => {
                let key = parse_key(secp, single_arg(top)?, KeyContext::Legacy)?;
                let pkh = Pkh::new(key).map_err(|kind| ParseError::new(&top.args[0], kind))?;
                Ok(Descriptor::Pkh(pkh))
            }
            ("tap", Parens::Round) | ("tr", Parens::Round) => {
                Ok(Descriptor::Tap(Tap::from_tree(secp, top)?))
            }
            ("raw", Parens::Round) | ("", Parens::Curly) => {
                Err(ParseError::new(top, ParseErrorKind::NestingNotAllowed).into())
            }
            (_, Parens::None) => {
                let key = parse_key(secp, top, KeyContext::Legacy)?;
                let pk = Pk::new(key).map_err(|kind| ParseError::new(top, kind))?;
                Ok(Descriptor::Pk(pk))
            }
            _ => Err(ParseError::new(top, ParseErrorKind::UnknownFunction).into()),
        }
    }

    /// Computes the scriptpubkey of the descriptor.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match *self {
            Descriptor::Pk(ref pk) => pk.script_pubkey(),
            Descriptor::Pkh(ref pkh) => pkh.script_pubkey(),
            Descriptor::Tap(ref tap) => tap.script_pubkey(),
        }
    }

    /// Computes the Bitcoin address of the descriptor, if one exists.
    pub fn address(&self, network: Network) -> Option<Address> {
        match *self {
            Descriptor::Pk(ref pk) => pk.address(network),
            Descriptor::Pkh(ref pkh) => pkh.address(network),
            Descriptor::Tap(ref tap) => tap.address(network),
        }
    }

    /// Every key of the descriptor.
    pub fn keys(&self) -> Vec<&DescriptorKey> {
        match *self {
            Descriptor::Pk(ref pk) => vec![pk.as_inner()],
            Descriptor::Pkh(ref pkh) => vec![pkh.as_inner()],
            Descriptor::Tap(ref tap) => tap.keys(),
        }
    }

    /// The private keys of the descriptor.
    pub fn private_keys(&self) -> Vec<PrivateKey> {
        self.keys().into_iter().filter_map(|key| key.secret_key().copied()).collect()
    }

    /// Whether the descriptor carries any private key.
    pub fn has_private_keys(&self) -> bool {
        self.keys().into_iter().any(|key| key.secret_key().is_some())
    }

    /// This descriptor with every private key replaced by its public key.
    ///
    /// The script pubkey is unchanged.
    pub fn to_public(&self) -> Descriptor {
        match *self {
            Descriptor::Pk(ref pk) => Descriptor::Pk(pk.to_public()),
            Descriptor::Pkh(ref pkh) => Descriptor::Pkh(pkh.to_public()),
            Descriptor::Tap(ref tap) => Descriptor::Tap(tap.to_public()),
        }
    }

    /// The data needed to describe how the output is spent.
    pub fn resolve(&self) -> Resolution {
        let spend = match *self {
            Descriptor::Pk(ref pk) => SpendInfo::Legacy(legacy_spend(LegacyKind::Pk, pk.as_inner())),
            Descriptor::Pkh(ref pkh) => {
                SpendInfo::Legacy(legacy_spend(LegacyKind::Pkh, pkh.as_inner()))
            }
            Descriptor::Tap(ref tap) => SpendInfo::Taproot(taproot_spend(tap)),
        };
        Resolution { script_pubkey: self.script_pubkey(), spend }
    }
}

fn legacy_spend(kind: LegacyKind, key: &DescriptorKey) -> LegacySpend {
    LegacySpend {
        kind,
        key: key.to_public_key(),
        // Only NUMS points lack an origin, and they are never legacy keys.
        key_origin: key
            .key_origin()
            .unwrap_or_else(|| (key.fingerprint(), bitcoin::bip32::DerivationPath::master())),
    }
}

fn taproot_spend(tap: &Tap) -> TaprootSpend {
    let spend_info = tap.spend_info();
    let leaves = tap
        .leaves()
        .zip(spend_info.leaves())
        .map(|(item, info)| ResolvedLeaf {
            script: info.script().to_owned(),
            leaf_version: info.leaf_version(),
            leaf_hash: info.leaf_hash(),
            depth: info.depth(),
            control_block: spend_info.leaf_control_block(info),
            key: item.leaf().key().and_then(|key| {
                key.key_origin().map(|origin| (key.to_x_only_pubkey(), origin))
            }),
        })
        .collect();

    TaprootSpend {
        spend_info: spend_info.clone(),
        key_path: tap.key_path(),
        internal_key_origin: tap.internal_key().key_origin(),
        leaves,
    }
}

/// Where a key appears, which decides the encodings it may use.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum KeyContext {
    Legacy,
    Taproot,
}

/// Parses a terminal node as a key valid in `ctx`.
pub(crate) fn parse_key<C: Signing>(
    secp: &Secp256k1<C>,
    tree: &Tree,
    ctx: KeyContext,
) -> Result<DescriptorKey, ParseError> {
    let key = match (tree.name, tree.parens) {
        ("nums", Parens::Round) => {
            let arg = single_arg(tree)?;
            if !arg.is_terminal() {
                return Err(ParseError::new(arg, ParseErrorKind::ExpectedKey));
            }
            NumsPoint::from_hex(arg.name)
                .map(DescriptorKey::Nums)
                .map_err(|e| ParseError::new(arg, ParseErrorKind::MalformedKey(e)))?
        }
        (_, Parens::None) => DescriptorKey::parse(secp, tree.name)
            .map_err(|e| ParseError::new(tree, ParseErrorKind::MalformedKey(e)))?,
        _ => return Err(ParseError::new(tree, ParseErrorKind::ExpectedKey)),
    };
    match ctx {
        KeyContext::Legacy if key.is_x_only_key() => {
            Err(ParseError::new(tree, ParseErrorKind::XOnlyKeyOutsideTaproot))
        }
        KeyContext::Legacy => Ok(key),
        KeyContext::Taproot if key.is_uncompressed() => {
            Err(ParseError::new(tree, ParseErrorKind::UncompressedKeyInTaproot))
        }
        KeyContext::Taproot => Ok(key.recognise_nums()),
    }
}

/// The only argument of a function node.
pub(crate) fn single_arg<'a, 'b>(tree: &'b Tree<'a>) -> Result<&'b Tree<'a>, ParseError> {
    if tree.args.len() != 1 {
        return Err(ParseError::new(
            tree,
            ParseErrorKind::WrongArity { expected: "1", found: tree.args.len() },
        ));
    }
    Ok(&tree.args[0])
}

impl FromStr for Descriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Descriptor, Error> {
        let secp = Secp256k1::signing_only();
        Descriptor::parse_descriptor(&secp, s)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use fmt::Write;

        let mut wrapped_f = checksum::Formatter::new(f);
        match *self {
            Descriptor::Pk(ref sub) => write!(wrapped_f, "{}", sub)?,
            Descriptor::Pkh(ref sub) => write!(wrapped_f, "{}", sub)?,
            Descriptor::Tap(ref sub) => write!(wrapped_f, "{}", sub)?,
        }
        wrapped_f.write_checksum_if_not_alt()
    }
}

#[cfg(feature = "serde")]
impl crate::serde::Serialize for Descriptor {
    fn serialize<S: crate::serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> crate::serde::Deserialize<'de> for Descriptor {
    fn deserialize<D: crate::serde::Deserializer<'de>>(d: D) -> Result<Descriptor, D::Error> {
        struct StrVisitor;

        impl<'de> crate::serde::de::Visitor<'de> for StrVisitor {
            type Value = Descriptor;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an ASCII output descriptor string")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: crate::serde::de::Error,
            {
                if let Ok(s) = core::str::from_utf8(v) {
                    Descriptor::from_str(s).map_err(E::custom)
                } else {
                    Err(E::invalid_value(crate::serde::de::Unexpected::Bytes(v), &self))
                }
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: crate::serde::de::Error,
            {
                Descriptor::from_str(v).map_err(E::custom)
            }
        }

        d.deserialize_str(StrVisitor)
    }
}
