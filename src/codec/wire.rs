//! Directly encodable form of a value and its MessagePack mapping.

use std::fmt;
use std::io::Cursor;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A value restricted to what MessagePack represents natively.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Packed {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// Only produced inside opaque envelopes
    Bin(Vec<u8>),
    Array(Vec<Packed>),
    Map(Vec<(Packed, Packed)>),
}

impl Serialize for Packed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Packed::Nil => serializer.serialize_unit(),
            Packed::Bool(b) => serializer.serialize_bool(*b),
            Packed::Int(i) => serializer.serialize_i64(*i),
            Packed::UInt(u) => serializer.serialize_u64(*u),
            Packed::Float(f) => serializer.serialize_f64(*f),
            Packed::Str(s) => serializer.serialize_str(s),
            Packed::Bin(b) => serializer.serialize_bytes(b),
            Packed::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Packed::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct PackedVisitor;

impl<'de> Visitor<'de> for PackedVisitor {
    type Value = Packed;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a MessagePack value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Packed, E> {
        Ok(Packed::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Packed, E> {
        Ok(Packed::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Packed, D::Error> {
        Packed::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Packed, E> {
        Ok(Packed::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> Result<Packed, E> {
        Ok(Packed::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Packed, E> {
        Ok(match i64::try_from(u) {
            Ok(i) => Packed::Int(i),
            Err(_) => Packed::UInt(u),
        })
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> Result<Packed, E> {
        Ok(Packed::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Packed, E> {
        Ok(Packed::Str(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Packed, E> {
        Ok(Packed::Str(s))
    }

    fn visit_bytes<E: de::Error>(self, b: &[u8]) -> Result<Packed, E> {
        Ok(Packed::Bin(b.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, b: Vec<u8>) -> Result<Packed, E> {
        Ok(Packed::Bin(b))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Packed, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Packed::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Packed, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0).min(4096));
        while let Some(entry) = map.next_entry()? {
            entries.push(entry);
        }
        Ok(Packed::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Packed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Packed, D::Error> {
        deserializer.deserialize_any(PackedVisitor)
    }
}

/// Packs into MessagePack bytes.
pub(crate) fn pack(packed: &Packed) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(packed)
}

/// Unpacks exactly one MessagePack value; trailing bytes are an error.
pub(crate) fn unpack(bytes: &[u8]) -> Result<Packed, rmp_serde::decode::Error> {
    let mut cursor = Cursor::new(bytes);
    let packed = {
        let mut deserializer = rmp_serde::Deserializer::new(&mut cursor);
        Packed::deserialize(&mut deserializer)?
    };

    let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    if consumed < bytes.len() {
        return Err(de::Error::custom(format!(
            "{} trailing bytes after the encoded value",
            bytes.len() - consumed
        )));
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_use_compact_encodings() {
        // positive fixint, nil, true
        assert_eq!(pack(&Packed::Int(5)).unwrap(), vec![0x05]);
        assert_eq!(pack(&Packed::Nil).unwrap(), vec![0xc0]);
        assert_eq!(pack(&Packed::Bool(true)).unwrap(), vec![0xc3]);
        // fixstr
        assert_eq!(pack(&Packed::Str("ab".into())).unwrap(), vec![0xa2, b'a', b'b']);
    }

    #[test]
    fn test_nested_unpack() {
        let packed = Packed::Map(vec![(
            Packed::Str("k".into()),
            Packed::Array(vec![Packed::Float(1.5), Packed::Bin(vec![0, 255]), Packed::Nil]),
        )]);
        let bytes = pack(&packed).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), packed);
    }

    #[test]
    fn test_large_unsigned_survives() {
        let bytes = pack(&Packed::UInt(u64::MAX)).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), Packed::UInt(u64::MAX));
        // Small unsigned values come back signed
        let bytes = pack(&Packed::UInt(9)).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), Packed::Int(9));
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = pack(&Packed::Str("hello world".into())).unwrap();
        assert!(unpack(&bytes[..4]).is_err());
        assert!(unpack(&[]).is_err());
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let mut bytes = pack(&Packed::Int(5)).unwrap();
        bytes.extend_from_slice(&[0xff, 0xde, 0xad]);
        let err = unpack(&bytes).unwrap_err();
        assert!(err.to_string().contains("3 trailing bytes"));
    }
}
