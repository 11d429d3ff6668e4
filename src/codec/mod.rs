//! Codec Module
//!
//! Encodes [`Value`] trees into a compact MessagePack wire format and back.
//!
//! Encoding is two-phase: a value is first rewritten into a directly encodable
//! form (scalars, arrays, maps), with the kinds MessagePack cannot express
//! escaped behind a signature tag, and then packed. Decoding unpacks and
//! walks the result, reviving every tagged node.
//!
//! # Escapes
//! - tuple, set, frozen set: an array whose head element is the signature
//! - bytes, byte buffer: a string of signature + one code point per byte
//! - opaque: a string of signature + one code point per byte of the envelope
//!   `[type_name, state]`
//!
//! Plain strings and lists that would read back as tagged are themselves
//! escaped through the opaque envelope under a reserved type name.

pub mod signature;
mod value;
mod wire;


use std::collections::BTreeMap;

pub use value::{Opaque, OpaqueObject, SerdeObject, Value};

use crate::error::{CacheError, Result};
use signature::{
    has_string_signature, is_container_signature, BYTEARRAY_SIGNATURE, BYTES_SIGNATURE,
    FROZENSET_SIGNATURE, OPAQUE_SIGNATURE, SET_SIGNATURE, TUPLE_SIGNATURE,
};
use wire::{pack, unpack, Packed};

/// Envelope type name of a plain string that carries a string signature.
const ESCAPED_STR_TYPE: &str = "persist_cache::str";

/// Envelope type name of a plain list headed by a container signature.
const ESCAPED_LIST_TYPE: &str = "persist_cache::list";

// == Encode ==
/// Encodes a value into wire bytes.
///
/// Fails with [`CacheError::Encode`] when an opaque object cannot serialize itself.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let packed = to_packed(value)?;
    pack(&packed).map_err(|e| CacheError::Encode(e.to_string()))
}

// == Decode ==
/// Decodes wire bytes back into a value.
///
/// Corrupt, truncated, or foreign bytes fail with [`CacheError::Decode`].
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let packed = unpack(bytes).map_err(|e| CacheError::Decode(e.to_string()))?;
    from_packed(packed)
}

fn to_packed(value: &Value) -> Result<Packed> {
    Ok(match value {
        Value::Null => Packed::Nil,
        Value::Bool(b) => Packed::Bool(*b),
        Value::Int(i) => Packed::Int(*i),
        Value::UInt(u) => match i64::try_from(*u) {
            Ok(i) => Packed::Int(i),
            Err(_) => Packed::UInt(*u),
        },
        Value::Float(f) => Packed::Float(*f),
        Value::String(s) if has_string_signature(s) => {
            envelope(ESCAPED_STR_TYPE, s.as_bytes())?
        }
        Value::String(s) => Packed::Str(s.clone()),
        Value::List(items) => {
            let packed = items.iter().map(to_packed).collect::<Result<Vec<_>>>()?;
            match items.first() {
                Some(Value::String(head)) if is_container_signature(head) => {
                    let state = pack(&Packed::Array(packed))
                        .map_err(|e| CacheError::Encode(e.to_string()))?;
                    envelope(ESCAPED_LIST_TYPE, &state)?
                }
                _ => Packed::Array(packed),
            }
        }
        Value::Map(entries) => Packed::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((to_packed(k)?, to_packed(v)?)))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Tuple(items) => tagged_array(TUPLE_SIGNATURE, items.iter())?,
        Value::Set(items) => tagged_array(SET_SIGNATURE, items.iter())?,
        Value::FrozenSet(items) => tagged_array(FROZENSET_SIGNATURE, items.iter())?,
        Value::Bytes(bytes) => Packed::Str(tagged_latin1(BYTES_SIGNATURE, bytes)),
        Value::ByteArray(bytes) => Packed::Str(tagged_latin1(BYTEARRAY_SIGNATURE, bytes)),
        Value::Opaque(object) if is_reserved_type(object.type_name()) => {
            return Err(CacheError::Encode(format!(
                "opaque type name {} is reserved for escaped plain values",
                object.type_name()
            )))
        }
        Value::Opaque(object) => envelope(object.type_name(), &object.state()?)?,
    })
}

fn is_reserved_type(type_name: &str) -> bool {
    type_name == ESCAPED_STR_TYPE || type_name == ESCAPED_LIST_TYPE
}

fn tagged_array<'a>(signature: &str, items: impl Iterator<Item = &'a Value>) -> Result<Packed> {
    let mut packed = vec![Packed::Str(signature.to_string())];
    for item in items {
        packed.push(to_packed(item)?);
    }
    Ok(Packed::Array(packed))
}

fn envelope(type_name: &str, state: &[u8]) -> Result<Packed> {
    let inner = Packed::Array(vec![
        Packed::Str(type_name.to_string()),
        Packed::Bin(state.to_vec()),
    ]);
    let bytes = pack(&inner).map_err(|e| CacheError::Encode(e.to_string()))?;
    Ok(Packed::Str(tagged_latin1(OPAQUE_SIGNATURE, &bytes)))
}

// Each byte becomes the code point of the same value.
fn tagged_latin1(signature: &str, bytes: &[u8]) -> String {
    let mut out = String::with_capacity(signature.len() + bytes.len() * 2);
    out.push_str(signature);
    out.extend(bytes.iter().map(|&b| char::from(b)));
    out
}

fn latin1_bytes(s: &str) -> Result<Vec<u8>> {
    s.chars()
        .map(|c| {
            u8::try_from(c).map_err(|_| {
                CacheError::Decode(format!(
                    "byte payload holds code point U+{:04X} above U+00FF",
                    u32::from(c)
                ))
            })
        })
        .collect()
}

fn from_packed(packed: Packed) -> Result<Value> {
    Ok(match packed {
        Packed::Nil => Value::Null,
        Packed::Bool(b) => Value::Bool(b),
        Packed::Int(i) => Value::Int(i),
        Packed::UInt(u) => Value::from(u),
        Packed::Float(f) => Value::Float(f),
        Packed::Str(s) => {
            if let Some(rest) = s.strip_prefix(OPAQUE_SIGNATURE) {
                open_envelope(rest)?
            } else if let Some(rest) = s.strip_prefix(BYTES_SIGNATURE) {
                Value::Bytes(latin1_bytes(rest)?)
            } else if let Some(rest) = s.strip_prefix(BYTEARRAY_SIGNATURE) {
                Value::ByteArray(latin1_bytes(rest)?)
            } else {
                Value::String(s)
            }
        }
        Packed::Bin(bytes) => Value::Bytes(bytes),
        Packed::Array(items) => {
            let head = match items.first() {
                Some(Packed::Str(s)) if is_container_signature(s) => Some(s.clone()),
                _ => None,
            };
            match head.as_deref() {
                Some(TUPLE_SIGNATURE) => Value::Tuple(from_packed_all(items, 1)?),
                Some(SET_SIGNATURE) => Value::Set(from_packed_all(items, 1)?.into_iter().collect()),
                Some(FROZENSET_SIGNATURE) => {
                    Value::FrozenSet(from_packed_all(items, 1)?.into_iter().collect())
                }
                _ => Value::List(from_packed_all(items, 0)?),
            }
        }
        Packed::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((from_packed(k)?, from_packed(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        ),
    })
}

fn from_packed_all(items: Vec<Packed>, skip: usize) -> Result<Vec<Value>> {
    items.into_iter().skip(skip).map(from_packed).collect()
}

fn open_envelope(payload: &str) -> Result<Value> {
    let bytes = latin1_bytes(payload)?;
    let inner = unpack(&bytes).map_err(|e| CacheError::Decode(format!("opaque envelope: {e}")))?;
    let (type_name, state) = match inner {
        Packed::Array(mut parts) if parts.len() == 2 => {
            match (parts.remove(0), parts.remove(0)) {
                (Packed::Str(type_name), Packed::Bin(state)) => (type_name, state),
                _ => return Err(malformed_envelope()),
            }
        }
        _ => return Err(malformed_envelope()),
    };

    match type_name.as_str() {
        ESCAPED_STR_TYPE => String::from_utf8(state)
            .map(Value::String)
            .map_err(|e| CacheError::Decode(format!("escaped string: {e}"))),
        ESCAPED_LIST_TYPE => match unpack(&state) {
            // Elements decode individually; the head is never read as a signature
            Ok(Packed::Array(items)) => Ok(Value::List(from_packed_all(items, 0)?)),
            Ok(_) => Err(malformed_envelope()),
            Err(e) => Err(CacheError::Decode(format!("escaped list: {e}"))),
        },
        _ => Ok(Value::Opaque(Opaque::from_state(type_name, state))),
    }
}

fn malformed_envelope() -> CacheError {
    CacheError::Decode("opaque envelope is not a [type_name, state] pair".to_string())
}
