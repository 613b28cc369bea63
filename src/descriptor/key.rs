// SPDX-License-Identifier: CC0-1.0

//! Key Expressions
//!
//! The keys which may appear inside a descriptor: full public keys, x-only
//! public keys, WIF private keys, and points without a known discrete log.
//! Single keys may be prefixed with their origin, `[fingerprint/path]`.

use core::fmt;
use core::str::FromStr;
use std::error;

use bitcoin::bip32::{self, ChildNumber, DerivationPath, Fingerprint, KeySource};
use bitcoin::hashes::{hash160, sha256, Hash, HashEngine};
use bitcoin::hex::FromHex;
use bitcoin::secp256k1::{self, Parity, Secp256k1, Signing, XOnlyPublicKey};
use bitcoin::PrivateKey;

/// The x coordinate of the BIP-341 "H" point, the SHA256 of the standard
/// uncompressed encoding of the secp256k1 generator.
const BIP341_H: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a,
    0x5e, 0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80,
    0x3a, 0xc0,
];

/// A curve point for which nobody knows the discrete logarithm.
///
/// Used as a Taproot internal key, it disables the key path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumsPoint(XOnlyPublicKey);

impl NumsPoint {
    /// The point "H" suggested by BIP-341.
    pub fn bip341() -> Self {
        NumsPoint(XOnlyPublicKey::from_slice(&BIP341_H).expect("H is on the curve"))
    }

    /// Hashes `data` to a curve point by try-and-increment.
    ///
    /// Candidate x coordinates are `SHA256(data || counter)` for a little-endian
    /// 32-bit counter starting at zero; the first one on the curve is used.
    pub fn hash_to_curve(data: &[u8]) -> Self {
        let mut counter: u32 = 0;
        loop {
            let mut eng = sha256::Hash::engine();
            eng.input(data);
            eng.input(&counter.to_le_bytes());
            let candidate = sha256::Hash::from_engine(eng).to_byte_array();
            if let Ok(key) = XOnlyPublicKey::from_slice(&candidate) {
                return NumsPoint(key);
            }
            counter = counter.wrapping_add(1);
        }
    }

    /// Recognises a well-known NUMS point.
    pub fn from_known(key: &XOnlyPublicKey) -> Option<Self> {
        if key.serialize() == BIP341_H {
            Some(NumsPoint(*key))
        } else {
            None
        }
    }

    /// Treats `key` as a NUMS point. The caller vouches that its discrete log
    /// is unknown, as it is for the output of [`NumsPoint::hash_to_curve`].
    pub fn from_x_only(key: XOnlyPublicKey) -> Self { NumsPoint(key) }

    /// Parses the argument of a `nums(<hex>)` key expression.
    pub(crate) fn from_hex(s: &str) -> Result<Self, KeyParseError> {
        if s.len() != 64 {
            return Err(KeyParseError::InvalidHexLength(s.len()));
        }
        let bytes = <[u8; 32]>::from_hex(s).map_err(|_| KeyParseError::InvalidHex)?;
        let key = XOnlyPublicKey::from_slice(&bytes).map_err(KeyParseError::InvalidPoint)?;
        Ok(NumsPoint(key))
    }

    /// Whether this is the BIP-341 "H" point.
    pub fn is_bip341(&self) -> bool { self.0.serialize() == BIP341_H }

    /// The point as an x-only key.
    pub fn to_x_only_pubkey(&self) -> XOnlyPublicKey { self.0 }
}

/// Written as plain hex for H, which is recognised on parsing, and as
/// `nums(<hex>)` otherwise.
impl fmt::Display for NumsPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_bip341() {
            fmt::Display::fmt(&self.0, f)
        } else {
            write!(f, "nums({})", self.0)
        }
    }
}

/// A single public key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SinglePubKey {
    /// A compressed or uncompressed key.
    FullKey(bitcoin::PublicKey),
    /// An x-only key, only valid inside Taproot descriptors.
    XOnly(XOnlyPublicKey),
}

/// A single public key with optional origin information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinglePub {
    /// Origin information
    pub origin: Option<KeySource>,
    /// The key
    pub key: SinglePubKey,
}

/// A single private key with optional origin information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinglePriv {
    /// Origin information
    pub origin: Option<KeySource>,
    /// The key
    pub key: PrivateKey,
    /// The public key of `key`.
    pub public: bitcoin::PublicKey,
}

/// A key appearing in a descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorKey {
    /// A public key.
    Public(SinglePub),
    /// A private key, in WIF.
    Private(SinglePriv),
    /// A point without a known discrete log.
    Nums(NumsPoint),
}

impl DescriptorKey {
    /// Parses a key, deriving the public key of private keys with `secp`.
    pub fn parse<C: Signing>(secp: &Secp256k1<C>, s: &str) -> Result<Self, KeyParseError> {
        if let Some(hex) = s.strip_prefix("nums(").and_then(|rest| rest.strip_suffix(')')) {
            return NumsPoint::from_hex(hex).map(DescriptorKey::Nums);
        }
        let (origin, key_part) = parse_origin(s)?;
        if key_part.is_empty() {
            return Err(KeyParseError::Empty);
        }

        let is_hex = key_part.bytes().all(|b| b.is_ascii_hexdigit());
        if is_hex && matches!(key_part.len(), 64 | 66 | 130) {
            let bytes = Vec::<u8>::from_hex(key_part).map_err(|_| KeyParseError::InvalidHex)?;
            let key = if bytes.len() == 32 {
                let xonly =
                    XOnlyPublicKey::from_slice(&bytes).map_err(KeyParseError::InvalidPoint)?;
                if let (None, Some(nums)) = (&origin, NumsPoint::from_known(&xonly)) {
                    return Ok(DescriptorKey::Nums(nums));
                }
                SinglePubKey::XOnly(xonly)
            } else {
                let inner =
                    secp256k1::PublicKey::from_slice(&bytes).map_err(KeyParseError::InvalidPoint)?;
                SinglePubKey::FullKey(bitcoin::PublicKey { compressed: bytes.len() == 33, inner })
            };
            return Ok(DescriptorKey::Public(SinglePub { origin, key }));
        }

        match PrivateKey::from_wif(key_part) {
            Ok(key) => {
                let public = key.public_key(secp);
                Ok(DescriptorKey::Private(SinglePriv { origin, key, public }))
            }
            Err(_) if is_hex => Err(KeyParseError::InvalidHexLength(key_part.len())),
            Err(_) => Err(KeyParseError::InvalidWif),
        }
    }

    /// The full public key. X-only keys are taken with even y.
    pub fn to_public_key(&self) -> bitcoin::PublicKey {
        match *self {
            DescriptorKey::Public(SinglePub { key: SinglePubKey::FullKey(pk), .. }) => pk,
            DescriptorKey::Public(SinglePub { key: SinglePubKey::XOnly(ref x), .. }) => {
                bitcoin::PublicKey::new(x.public_key(Parity::Even))
            }
            DescriptorKey::Private(ref sk) => sk.public,
            DescriptorKey::Nums(ref nums) => {
                bitcoin::PublicKey::new(nums.to_x_only_pubkey().public_key(Parity::Even))
            }
        }
    }

    /// The x-only public key.
    pub fn to_x_only_pubkey(&self) -> XOnlyPublicKey {
        match *self {
            DescriptorKey::Public(SinglePub { key: SinglePubKey::XOnly(x), .. }) => x,
            DescriptorKey::Nums(ref nums) => nums.to_x_only_pubkey(),
            _ => self.to_public_key().inner.x_only_public_key().0,
        }
    }

    /// Whether this is an x-only key.
    pub fn is_x_only_key(&self) -> bool {
        matches!(
            *self,
            DescriptorKey::Public(SinglePub { key: SinglePubKey::XOnly(..), .. })
                | DescriptorKey::Nums(..)
        )
    }

    /// Whether this is an uncompressed key.
    pub fn is_uncompressed(&self) -> bool {
        match *self {
            DescriptorKey::Public(SinglePub { key: SinglePubKey::FullKey(pk), .. }) => {
                !pk.compressed
            }
            DescriptorKey::Private(ref sk) => !sk.key.compressed,
            _ => false,
        }
    }

    /// Whether this key is a point without a known discrete log.
    pub fn is_nums(&self) -> bool { matches!(*self, DescriptorKey::Nums(..)) }

    /// Replaces a full key whose x coordinate is a well-known NUMS point by
    /// the NUMS variant. Used in Taproot context, where only x matters.
    pub(crate) fn recognise_nums(self) -> Self {
        match self {
            DescriptorKey::Public(SinglePub { origin: None, key: SinglePubKey::FullKey(pk) }) => {
                match NumsPoint::from_known(&pk.inner.x_only_public_key().0) {
                    Some(nums) => DescriptorKey::Nums(nums),
                    None => DescriptorKey::Public(SinglePub {
                        origin: None,
                        key: SinglePubKey::FullKey(pk),
                    }),
                }
            }
            other => other,
        }
    }

    /// The private key, if this key carries one.
    pub fn secret_key(&self) -> Option<&PrivateKey> {
        match *self {
            DescriptorKey::Private(ref sk) => Some(&sk.key),
            _ => None,
        }
    }

    /// This key with any private key replaced by its public key.
    pub fn to_public(&self) -> DescriptorKey {
        match *self {
            DescriptorKey::Private(ref sk) => DescriptorKey::Public(SinglePub {
                origin: sk.origin.clone(),
                key: SinglePubKey::FullKey(sk.public),
            }),
            ref other => other.clone(),
        }
    }

    /// The origin of this key.
    ///
    /// Keys without an explicit origin are their own master: the fingerprint
    /// is the first four bytes of the HASH160 of the key, and the path is
    /// empty. NUMS points have no origin.
    pub fn key_origin(&self) -> Option<KeySource> {
        let explicit = match *self {
            DescriptorKey::Public(ref pk) => pk.origin.clone(),
            DescriptorKey::Private(ref sk) => sk.origin.clone(),
            DescriptorKey::Nums(..) => return None,
        };
        Some(explicit.unwrap_or_else(|| (self.fingerprint(), DerivationPath::master())))
    }

    /// The fingerprint of the key itself.
    pub fn fingerprint(&self) -> Fingerprint {
        let hash = hash160::Hash::hash(&self.to_public_key().to_bytes()).to_byte_array();
        Fingerprint::from([hash[0], hash[1], hash[2], hash[3]])
    }
}

impl FromStr for DescriptorKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secp = Secp256k1::signing_only();
        DescriptorKey::parse(&secp, s)
    }
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DescriptorKey::Public(ref pk) => {
                maybe_fmt_origin(f, &pk.origin)?;
                match pk.key {
                    SinglePubKey::FullKey(ref full_key) => fmt::Display::fmt(full_key, f),
                    SinglePubKey::XOnly(ref x_only_key) => fmt::Display::fmt(x_only_key, f),
                }
            }
            DescriptorKey::Private(ref sk) => {
                maybe_fmt_origin(f, &sk.origin)?;
                f.write_str(&sk.key.to_wif())
            }
            DescriptorKey::Nums(ref nums) => fmt::Display::fmt(nums, f),
        }
    }
}

fn maybe_fmt_origin(f: &mut fmt::Formatter, origin: &Option<KeySource>) -> fmt::Result {
    if let Some((ref fingerprint, ref path)) = *origin {
        write!(f, "[{}", fingerprint)?;
        for child in path {
            write!(f, "/{}", child)?;
        }
        f.write_str("]")?;
    }
    Ok(())
}

/// Splits an optional `[fingerprint/path]` prefix off a key expression.
fn parse_origin(s: &str) -> Result<(Option<KeySource>, &str), KeyParseError> {
    if !s.starts_with('[') {
        return Ok((None, s));
    }
    let close = s.find(']').ok_or(KeyParseError::MalformedOrigin)?;
    let mut parts = s[1..close].split('/');

    let fingerprint = parts.next().unwrap_or("");
    if fingerprint.len() != 8 {
        return Err(KeyParseError::MalformedOrigin);
    }
    let fingerprint =
        <[u8; 4]>::from_hex(fingerprint).map_err(|_| KeyParseError::MalformedOrigin)?;
    let path = parts
        .map(|child| ChildNumber::from_str(child).map_err(KeyParseError::InvalidChildNumber))
        .collect::<Result<Vec<ChildNumber>, _>>()?;

    Ok((Some((Fingerprint::from(fingerprint), DerivationPath::from(path))), &s[close + 1..]))
}

/// An error parsing a key expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyParseError {
    /// No key was given.
    Empty,
    /// Hex data of the right length which could not be decoded.
    InvalidHex,
    /// Hex data which does not have the length of any key encoding.
    InvalidHexLength(usize),
    /// The key is not a point on the curve.
    InvalidPoint(secp256k1::Error),
    /// Neither a hex public key nor a valid WIF private key.
    InvalidWif,
    /// The `[fingerprint/path]` prefix is malformed.
    MalformedOrigin,
    /// A derivation step in the origin is malformed.
    InvalidChildNumber(bip32::Error),
}

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            KeyParseError::Empty => f.write_str("empty key"),
            KeyParseError::InvalidHex => f.write_str("invalid hex"),
            KeyParseError::InvalidHexLength(len) => {
                write!(f, "hex key of length {} (expected 64, 66 or 130 characters)", len)
            }
            KeyParseError::InvalidPoint(ref e) => write!(f, "invalid public key: {}", e),
            KeyParseError::InvalidWif => f.write_str("invalid WIF private key"),
            KeyParseError::MalformedOrigin => f.write_str("malformed key origin"),
            KeyParseError::InvalidChildNumber(ref e) => {
                write!(f, "invalid origin derivation step: {}", e)
            }
        }
    }
}

impl error::Error for KeyParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            KeyParseError::InvalidPoint(ref e) => Some(e),
            KeyParseError::InvalidChildNumber(ref e) => Some(e),
            KeyParseError::Empty
            | KeyParseError::InvalidHex
            | KeyParseError::InvalidHexLength(..)
            | KeyParseError::InvalidWif
            | KeyParseError::MalformedOrigin => None,
        }
    }
}
