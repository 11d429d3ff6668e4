//! Cache Value Module
//!
//! The tagged value tree accepted as cache arguments and results.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CacheError, Result};

// == Value ==
/// A value that can be cached or used as a call argument.
///
/// Mappings and sets are kept sorted under a total order on `Value`, so two
/// logically equal collections always encode to the same bytes.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer above `i64::MAX`; smaller values normalize to `Int`
    UInt(u64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<Value, Value>),
    Tuple(Vec<Value>),
    Set(BTreeSet<Value>),
    FrozenSet(BTreeSet<Value>),
    /// Immutable byte string
    Bytes(Vec<u8>),
    /// Mutable byte buffer
    ByteArray(Vec<u8>),
    /// Anything else, carried through a pluggable serializer
    Opaque(Opaque),
}

impl Value {
    /// Builds a list from any iterator of values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a tuple from any iterator of values.
    pub fn tuple<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Tuple(items.into_iter().map(Into::into).collect())
    }

    pub fn set<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn frozen_set<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::FrozenSet(items.into_iter().map(Into::into).collect())
    }

    /// Builds a mapping; later duplicates of a key replace earlier ones.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn byte_array(bytes: impl Into<Vec<u8>>) -> Self {
        Value::ByteArray(bytes.into())
    }

    /// Wraps a serde type as an opaque value encoded with MessagePack.
    pub fn object<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Value::Opaque(Opaque::new(SerdeObject::new(value)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the elements of a list or tuple.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) | Value::ByteArray(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the value kind, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Bytes(_) => "bytes",
            Value::ByteArray(_) => "bytearray",
            Value::Opaque(_) => "opaque",
        }
    }

    // Position of each kind in the total order. Both integer variants share a rank.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Bytes(_) => 5,
            Value::ByteArray(_) => 6,
            Value::List(_) => 7,
            Value::Tuple(_) => 8,
            Value::Set(_) => 9,
            Value::FrozenSet(_) => 10,
            Value::Map(_) => 11,
            Value::Opaque(_) => 12,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(i128::from(*i)),
            Value::UInt(u) => Some(i128::from(*u)),
            _ => None,
        }
    }
}

// == Ordering ==
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) | (Value::ByteArray(a), Value::ByteArray(b)) => {
                a.cmp(b)
            }
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) | (Value::FrozenSet(a), Value::FrozenSet(b)) => {
                a.cmp(b)
            }
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.cmp(b),
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.rank().cmp(&other.rank()),
            },
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

// == Conversions ==
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                Value::Int(i64::from(i))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(u: $t) -> Self {
                Value::Int(i64::from(u))
            }
        })*
    };
}

impl_from_unsigned!(u8, u16, u32);

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt(u),
        }
    }
}

impl From<usize> for Value {
    fn from(u: usize) -> Self {
        Value::from(u as u64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::from(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::list(items),
            serde_json::Value::Object(fields) => Value::map(fields),
        }
    }
}

// == Opaque ==
/// A caller-supplied serializer for values outside the native value model.
///
/// `type_name` is stored next to the serialized state so a reader can tell
/// which deserializer to apply.
pub trait OpaqueObject: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    /// Serializes the object's state. An error here is a fatal encode failure.
    fn to_bytes(&self) -> anyhow::Result<Vec<u8>>;
}

/// An opaque value: either a live object or state read back from disk.
///
/// Two opaque values are equal when their type names and serialized states
/// are equal. A live object is serialized at most once; live objects that
/// fail to serialize are only equal to themselves.
#[derive(Clone)]
pub struct Opaque(OpaqueRepr);

#[derive(Clone)]
enum OpaqueRepr {
    Live(Arc<LiveObject>),
    Stored { type_name: String, state: Vec<u8> },
}

struct LiveObject {
    object: Box<dyn OpaqueObject>,
    state: OnceLock<std::result::Result<Vec<u8>, String>>,
}

impl LiveObject {
    fn state(&self) -> &std::result::Result<Vec<u8>, String> {
        self.state
            .get_or_init(|| self.object.to_bytes().map_err(|e| format!("{e:#}")))
    }
}

impl Opaque {
    pub fn new(object: impl OpaqueObject + 'static) -> Self {
        Opaque(OpaqueRepr::Live(Arc::new(LiveObject {
            object: Box::new(object),
            state: OnceLock::new(),
        })))
    }

    /// Rebuilds an opaque value from its stored parts.
    pub fn from_state(type_name: impl Into<String>, state: Vec<u8>) -> Self {
        Opaque(OpaqueRepr::Stored {
            type_name: type_name.into(),
            state,
        })
    }

    pub fn type_name(&self) -> &str {
        match &self.0 {
            OpaqueRepr::Live(live) => live.object.type_name(),
            OpaqueRepr::Stored { type_name, .. } => type_name,
        }
    }

    /// Returns the serialized state, running the serializer of a live
    /// object on first use.
    pub fn state(&self) -> Result<Cow<'_, [u8]>> {
        match &self.0 {
            OpaqueRepr::Live(live) => match live.state() {
                Ok(state) => Ok(Cow::Borrowed(state.as_slice())),
                Err(e) => Err(CacheError::Encode(format!(
                    "opaque object of type {} is not serializable: {e}",
                    live.object.type_name()
                ))),
            },
            OpaqueRepr::Stored { state, .. } => Ok(Cow::Borrowed(state)),
        }
    }

    // Address of a live object; stored state always serializes, so it never
    // needs one.
    fn identity(&self) -> usize {
        match &self.0 {
            OpaqueRepr::Live(live) => Arc::as_ptr(live) as usize,
            OpaqueRepr::Stored { .. } => 0,
        }
    }

    /// Restores a value that was stored through [`SerdeObject`].
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let state = self.state()?;
        rmp_serde::from_slice(&state).map_err(|e| {
            CacheError::Decode(format!(
                "opaque state of type {} does not deserialize: {e}",
                self.type_name()
            ))
        })
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            OpaqueRepr::Live(live) => f.debug_tuple("Opaque").field(&live.object).finish(),
            OpaqueRepr::Stored { type_name, state } => f
                .debug_struct("Opaque")
                .field("type_name", type_name)
                .field("state_len", &state.len())
                .finish(),
        }
    }
}

impl Ord for Opaque {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name()
            .cmp(other.type_name())
            .then_with(|| match (self.state().ok(), other.state().ok()) {
                (Some(a), Some(b)) => a.cmp(&b),
                (None, None) => self.identity().cmp(&other.identity()),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
    }
}

impl PartialOrd for Opaque {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Opaque {}

// == Serde Object ==
/// Stock [`OpaqueObject`] for serde types, serialized with MessagePack.
#[derive(Debug, Clone)]
pub struct SerdeObject<T> {
    inner: T,
}

impl<T> SerdeObject<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> OpaqueObject for SerdeObject<T>
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn type_name(&self) -> &str {
        std::any::type_name::<T>()
    }

    fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(&self.inner)?)
    }
}
