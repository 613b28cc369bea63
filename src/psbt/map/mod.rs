// SPDX-License-Identifier: CC0-1.0

//! Typed PSBT maps
//!
//! Conversions between the raw pairs of a map and its typed fields, and the
//! field-by-field merge used when combining PSBTs.

mod global;
mod input;
mod output;

use core::fmt;
use std::collections::BTreeMap;

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource};
use bitcoin::consensus::encode::{self, Decodable};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::XOnlyPublicKey;
use bitcoin::taproot::TapLeafHash;

pub use self::global::Global;
pub use self::input::Input;
pub use self::output::{Output, TapTreeLeaf};
use super::error::{DecodeError, Error, Location};
use super::raw;
use crate::util::push_varint;

/// A map which knows how to turn itself into raw pairs.
pub(crate) trait Map {
    /// The pairs of the map, ordered by key.
    fn get_pairs(&self) -> Vec<raw::Pair>;

    /// Appends the map and its separator.
    fn encode_into(&self, buf: &mut Vec<u8>) {
        for pair in self.get_pairs() {
            pair.encode_into(buf);
        }
        buf.push(0x00);
    }
}

pub(crate) fn invalid_value<E: fmt::Display>(key: &raw::Key, reason: E) -> DecodeError {
    DecodeError::InvalidValue { key: key.clone(), reason: reason.to_string() }
}

/// Decodes a consensus-encoded value, which must use every byte.
pub(crate) fn consensus_value<T: Decodable>(key: &raw::Key, value: &[u8]) -> Result<T, DecodeError> {
    encode::deserialize(value).map_err(|e| invalid_value(key, e))
}

/// Fails unless the key has no key data.
pub(crate) fn expect_empty_key(key: &raw::Key) -> Result<(), DecodeError> {
    if key.key.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::InvalidKey(key.clone()))
    }
}

/// Parses key data as an x-only key.
pub(crate) fn key_xonly(key: &raw::Key) -> Result<XOnlyPublicKey, DecodeError> {
    XOnlyPublicKey::from_slice(&key.key).map_err(|_| DecodeError::InvalidKey(key.clone()))
}

/// Parses key data as a full public key.
pub(crate) fn key_pubkey(key: &raw::Key) -> Result<bitcoin::PublicKey, DecodeError> {
    bitcoin::PublicKey::from_slice(&key.key).map_err(|_| DecodeError::InvalidKey(key.clone()))
}

pub(crate) fn encode_key_source(buf: &mut Vec<u8>, (fingerprint, path): &KeySource) {
    buf.extend_from_slice(fingerprint.as_bytes());
    for child in path {
        buf.extend_from_slice(&u32::from(*child).to_le_bytes());
    }
}

pub(crate) fn decode_key_source(key: &raw::Key, value: &[u8]) -> Result<KeySource, DecodeError> {
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(invalid_value(key, format_args!("key source of {} bytes", value.len())));
    }
    let mut fingerprint = [0; 4];
    fingerprint.copy_from_slice(&value[..4]);
    let path: Vec<ChildNumber> = value[4..]
        .chunks_exact(4)
        .map(|chunk| {
            let mut index = [0; 4];
            index.copy_from_slice(chunk);
            ChildNumber::from(u32::from_le_bytes(index))
        })
        .collect();
    Ok((Fingerprint::from(fingerprint), DerivationPath::from(path)))
}

/// Encodes a `TAP_BIP32_DERIVATION` value.
pub(crate) fn encode_tap_key_origin(leaf_hashes: &[TapLeafHash], origin: &KeySource) -> Vec<u8> {
    let mut buf = vec![];
    push_varint(&mut buf, leaf_hashes.len());
    for hash in leaf_hashes {
        buf.extend_from_slice(hash.as_byte_array());
    }
    encode_key_source(&mut buf, origin);
    buf
}

/// Decodes a `TAP_BIP32_DERIVATION` value.
pub(crate) fn decode_tap_key_origin(
    key: &raw::Key,
    value: &[u8],
) -> Result<(Vec<TapLeafHash>, KeySource), DecodeError> {
    let mut reader = raw::Reader::new(value);
    let count = reader.read_varint().map_err(|e| invalid_value(key, e))?;
    if count > (reader.remaining() / 32) as u64 {
        return Err(invalid_value(key, "leaf hash count exceeds value length"));
    }
    let mut leaf_hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let bytes = reader.read_slice(32).map_err(|e| invalid_value(key, e))?;
        let mut hash = [0; 32];
        hash.copy_from_slice(bytes);
        leaf_hashes.push(TapLeafHash::from_byte_array(hash));
    }
    let rest = reader.read_slice(reader.remaining()).map_err(|e| invalid_value(key, e))?;
    Ok((leaf_hashes, decode_key_source(key, rest)?))
}

/// Takes `theirs` when `ours` is empty. Both being set to different values is a conflict.
pub(crate) fn merge_option<T: PartialEq>(
    location: Location,
    field: &'static str,
    ours: &mut Option<T>,
    theirs: Option<T>,
) -> Result<(), Error> {
    let theirs = match theirs {
        Some(theirs) => theirs,
        None => return Ok(()),
    };
    match *ours {
        None => {
            *ours = Some(theirs);
            Ok(())
        }
        Some(ref existing) if *existing == theirs => Ok(()),
        Some(_) => Err(Error::ConflictingData { location, field }),
    }
}

/// Unions two maps. The same key with different values is a conflict.
pub(crate) fn merge_map<K: Ord, V: PartialEq>(
    location: Location,
    field: &'static str,
    ours: &mut BTreeMap<K, V>,
    theirs: BTreeMap<K, V>,
) -> Result<(), Error> {
    for (key, value) in theirs {
        match ours.get(&key) {
            Some(existing) if *existing != value => {
                return Err(Error::ConflictingData { location, field })
            }
            Some(_) => {}
            None => {
                ours.insert(key, value);
            }
        }
    }
    Ok(())
}

/// Unions two maps, keeping our value when both have a key.
pub(crate) fn keep_existing<K: Ord, V>(ours: &mut BTreeMap<K, V>, theirs: BTreeMap<K, V>) {
    for (key, value) in theirs {
        ours.entry(key).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use super::*;

    #[test]
    fn key_sources() {
        let origin: KeySource = (
            Fingerprint::from([0xd3, 0x4d, 0xb3, 0x3f]),
            DerivationPath::from_str("m/86'/1'/0'/0/5").unwrap(),
        );
        let key = raw::Key::new(0x16);
        let mut buf = vec![];
        encode_key_source(&mut buf, &origin);
        assert_eq!(buf.len(), 4 + 5 * 4);
        assert_eq!(&buf[4..8], &[0x56, 0x00, 0x00, 0x80]);
        assert_eq!(decode_key_source(&key, &buf).unwrap(), origin);
        assert!(decode_key_source(&key, &buf[..6]).is_err());

        let leaf = TapLeafHash::from_byte_array([7; 32]);
        let value = encode_tap_key_origin(&[leaf], &origin);
        assert_eq!(value[0], 1);
        assert_eq!(decode_tap_key_origin(&key, &value).unwrap(), (vec![leaf], origin));
        assert!(decode_tap_key_origin(&key, &[0x05, 0x00]).is_err());
    }

    #[test]
    fn merging() {
        let loc = Location::Input(0);
        let mut ours = Some(1);
        merge_option(loc, "sighash", &mut ours, None).unwrap();
        merge_option(loc, "sighash", &mut ours, Some(1)).unwrap();
        assert_eq!(
            merge_option(loc, "sighash", &mut ours, Some(2)),
            Err(Error::ConflictingData { location: loc, field: "sighash" })
        );
        let mut empty = None;
        merge_option(loc, "sighash", &mut empty, Some(3)).unwrap();
        assert_eq!(empty, Some(3));

        let mut ours: BTreeMap<u8, u8> = vec![(1, 1)].into_iter().collect();
        merge_map(loc, "unknown", &mut ours, vec![(1, 1), (2, 2)].into_iter().collect()).unwrap();
        assert_eq!(ours.len(), 2);
        assert!(merge_map(loc, "unknown", &mut ours, vec![(2, 3)].into_iter().collect()).is_err());

        keep_existing(&mut ours, vec![(2, 9), (4, 4)].into_iter().collect());
        assert_eq!(ours.get(&2), Some(&2));
        assert_eq!(ours.get(&4), Some(&4));
    }
}
