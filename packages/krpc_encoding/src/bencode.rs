//! Bencode codec backed by `serde_bencode`.
//!
//! `Value` stays a dynamic bytes/int/list/dict tree rather than a
//! struct-per-message shape, since BEP44 piles whatever mix of
//! `k`/`v`/`seq`/`sig`/`salt`/`cas` a verb needs onto the same envelope,
//! and `bep44::pack_seq_salt` needs byte-exact control over individual dict
//! fragments that a black-box struct serializer can't give it. `Value`
//! implements `Serialize`/`Deserialize` by hand, as a generic visitor over
//! serde's data model, so `serde_bencode::ser::to_bytes`/`de::from_bytes`
//! do the actual wire-format work; only the dynamic-tree glue is ours.
//! Dict keys are byte-strings; `Value::Dict` is a `BTreeMap<Vec<u8>,
//! Value>` so lexicographic key order (required on encode) is structural
//! rather than a sort pass at encode time.

use crate::errors::{ErrorKind, Result};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_bytes::{ByteBuf, Bytes};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(b.into())
    }

    pub fn dict() -> Value {
        Value::Dict(BTreeMap::new())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up `key` in a dict value, returning `None` for non-dicts too.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: Value) {
        if let Value::Dict(d) = self {
            d.insert(key.as_ref().to_vec(), value);
        }
    }

    pub fn get_bytes(&self, key: &[u8]) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    pub fn get_int(&self, key: &[u8]) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn get_list(&self, key: &[u8]) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_list)
    }

    pub fn get_dict(&self, key: &[u8]) -> Option<&Value> {
        self.get(key).filter(|v| matches!(v, Value::Dict(_)))
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_bencode::ser::to_bytes(self).expect("a Value tree always encodes to bencode")
    }

    pub fn decode(input: &[u8]) -> Result<Value> {
        serde_bencode::de::from_bytes(input)
            .map_err(|cause| ErrorKind::Codec { cause: cause.to_string() }.into())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Value {
        Value::Bytes(b.to_vec())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(map) => {
                let mut ser_map = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    ser_map.serialize_entry(Bytes::new(k), v)?;
                }
                ser_map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a bencode value (byte string, integer, list, or dict)")
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Bytes(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Bytes(v.as_bytes().to_vec()))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Value, E>
    where
        E: de::Error,
    {
        i64::try_from(v).map(Value::Int).map_err(|_| de::Error::custom("bencode integer out of i64 range"))
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut out = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<ByteBuf, Value>()? {
            out.insert(k.into_vec(), v);
        }
        Ok(Value::Dict(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, Value)]) -> Value {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.as_bytes().to_vec(), v.clone());
        }
        Value::Dict(map)
    }

    #[test]
    fn round_trips_integers() {
        for n in [0_i64, 1, -1, 42, i64::MAX, i64::MIN] {
            let v = Value::Int(n);
            assert_eq!(Value::decode(&v.encode()).unwrap(), v);
        }
    }

    #[test]
    fn round_trips_byte_strings() {
        for s in [&b""[..], b"a", b"hello world", &[0u8, 255, 1, 2][..]] {
            let v = Value::Bytes(s.to_vec());
            assert_eq!(Value::decode(&v.encode()).unwrap(), v);
        }
    }

    #[test]
    fn round_trips_lists() {
        let v = Value::List(vec![Value::Int(1), Value::bytes(b"x".to_vec()), Value::List(vec![])]);
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn round_trips_dicts() {
        let v = dict(&[("a", Value::Int(1)), ("b", Value::bytes(b"x".to_vec()))]);
        assert_eq!(Value::decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn encodes_dict_keys_in_lexicographic_order() {
        let v = dict(&[
            ("zeta", Value::Int(1)),
            ("alpha", Value::Int(2)),
            ("mid", Value::Int(3)),
        ]);
        let encoded = v.encode();
        let encoded_str = String::from_utf8_lossy(&encoded);
        assert_eq!(encoded_str, "d5:alphai2e3:midi3e4:zetai1ee");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Value::decode(b"d1:ae").is_err()); // missing value
        assert!(Value::decode(b"i1").is_err()); // unterminated int
        assert!(Value::decode(b"5:ab").is_err()); // short string
    }

    #[test]
    fn known_ping_query_matches_bep5_example() {
        // BEP5's canonical ping query example.
        let v = dict(&[(
            "a",
            dict(&[("id", Value::bytes(&b"abcdefghij0123456789"[..]))]),
        ), ("q", Value::bytes(&b"ping"[..])),
           ("t", Value::bytes(&b"aa"[..])),
           ("y", Value::bytes(&b"q"[..]))]);
        assert_eq!(
            v.encode(),
            b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe".to_vec()
        );
    }
}
