// SPDX-License-Identifier: CC0-1.0

//! Raw PSBT key-value pairs
//!
//! Every map of a PSBT is a list of `<keylen><keytype><keydata><valuelen><value>`
//! records ending with a zero byte. The key type is itself a compact size.

use core::fmt;
use std::collections::BTreeSet;

use bitcoin::consensus::encode::{self, VarInt};
use bitcoin::hex::DisplayHex;

use super::error::DecodeError;
use crate::util::{push_var_slice, push_varint, varint_len};

/// A PSBT key in its raw byte form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    /// The type of this PSBT key.
    pub type_value: u64,
    /// The key data itself in raw byte form.
    pub key: Vec<u8>,
}

impl Key {
    /// A key of type `type_value` without key data.
    pub fn new(type_value: u64) -> Self { Key { type_value, key: vec![] } }

    /// A key of type `type_value` with key data.
    pub fn with_data(type_value: u64, key: Vec<u8>) -> Self { Key { type_value, key } }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        push_varint(buf, varint_len(self.type_value as usize) + self.key.len());
        buf.extend_from_slice(&encode::serialize(&VarInt(self.type_value)));
        buf.extend_from_slice(&self.key);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "type: {:#x}, key: {}", self.type_value, self.key.as_hex())
    }
}

/// A PSBT key-value pair in its raw byte form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair {
    /// The key of this key-value pair.
    pub key: Key,
    /// The value data of this key-value pair in raw byte form.
    pub value: Vec<u8>,
}

impl Pair {
    /// Appends the serialized pair to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.key.encode_into(buf);
        push_var_slice(buf, &self.value);
    }
}

/// A cursor over PSBT bytes.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self { Reader { data, pos: 0 } }

    /// Bytes not consumed yet.
    pub(crate) fn remaining(&self) -> usize { self.data.len() - self.pos }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let ret = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(ret)
    }

    pub(crate) fn read_varint(&mut self) -> Result<u64, DecodeError> {
        if self.remaining() == 0 {
            return Err(DecodeError::UnexpectedEof);
        }
        let (VarInt(n), consumed) = encode::deserialize_partial::<VarInt>(&self.data[self.pos..])
            .map_err(|e| match e {
                encode::Error::Io(..) => DecodeError::UnexpectedEof,
                e => DecodeError::InvalidEncoding(e.to_string()),
            })?;
        self.pos += consumed;
        Ok(n)
    }

    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let n = self.read_varint()?;
        if n > self.remaining() as u64 {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(n as usize)
    }

    /// Reads the next pair of a map, or `None` at the map separator.
    pub(crate) fn read_pair(&mut self) -> Result<Option<Pair>, DecodeError> {
        let key_len = self.read_len()?;
        if key_len == 0 {
            return Ok(None);
        }
        let key_bytes = self.read_slice(key_len)?;
        let (VarInt(type_value), consumed) = encode::deserialize_partial::<VarInt>(key_bytes)
            .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
        let key = Key { type_value, key: key_bytes[consumed..].to_vec() };

        let value_len = self.read_len()?;
        let value = self.read_slice(value_len)?.to_vec();
        Ok(Some(Pair { key, value }))
    }

    /// Reads a whole map up to and including its separator.
    pub(crate) fn read_map(&mut self) -> Result<Vec<Pair>, DecodeError> {
        let mut pairs: Vec<Pair> = vec![];
        let mut seen = BTreeSet::new();
        while let Some(pair) = self.read_pair()? {
            if !seen.insert(pair.key.clone()) {
                return Err(DecodeError::DuplicateKey(pair.key));
            }
            pairs.push(pair);
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_encoding() {
        let pair = Pair { key: Key::with_data(0x06, vec![0xaa, 0xbb]), value: vec![0x01, 0x02, 0x03] };
        let mut buf = vec![];
        pair.encode_into(&mut buf);
        assert_eq!(buf, vec![0x03, 0x06, 0xaa, 0xbb, 0x03, 0x01, 0x02, 0x03]);

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_pair().unwrap(), Some(pair));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn wide_key_types() {
        let pair = Pair { key: Key::new(0xfc_00), value: vec![] };
        let mut buf = vec![];
        pair.encode_into(&mut buf);
        assert_eq!(buf, vec![0x03, 0xfd, 0x00, 0xfc, 0x00]);
        assert_eq!(Reader::new(&buf).read_pair().unwrap(), Some(pair));
    }

    #[test]
    fn map_errors() {
        // Truncated value.
        let mut reader = Reader::new(&[0x01, 0x00, 0x05, 0x01]);
        assert_eq!(reader.read_map(), Err(DecodeError::UnexpectedEof));

        // The same key twice.
        let bytes = [0x01, 0x02, 0x00, 0x01, 0x02, 0x00, 0x00];
        assert_eq!(Reader::new(&bytes).read_map(), Err(DecodeError::DuplicateKey(Key::new(2))));

        // Missing separator.
        assert_eq!(Reader::new(&[0x01, 0x02, 0x00]).read_map(), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn duplicate_among_many_keys() {
        let mut buf = vec![];
        for data in 0..=255u8 {
            Pair { key: Key::with_data(0x06, vec![data]), value: vec![] }.encode_into(&mut buf);
        }
        let mut distinct = buf.clone();
        distinct.push(0x00);
        assert_eq!(Reader::new(&distinct).read_map().unwrap().len(), 256);

        // Same type and data as the first pair, after every other one.
        Pair { key: Key::with_data(0x06, vec![0]), value: vec![0x01] }.encode_into(&mut buf);
        buf.push(0x00);
        assert_eq!(
            Reader::new(&buf).read_map(),
            Err(DecodeError::DuplicateKey(Key::with_data(0x06, vec![0])))
        );
    }
}
