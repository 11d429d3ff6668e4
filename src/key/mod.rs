//! Key Deriver Module
//!
//! Canonicalizes bound arguments into a calling-convention independent map
//! and hashes its encoding into a [`CacheKey`].

mod arguments;
mod descriptor;

use std::collections::BTreeMap;
use std::fmt;

use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

pub use arguments::Arguments;
pub use descriptor::{CallableDescriptor, InvocationShape, Parameter, ParameterKind};

use crate::codec::{encode, Value};
use crate::error::{CacheError, Result};

// == Canonical Arguments ==
/// Name-keyed view of bound arguments.
///
/// Sorted by name, so keyword order never affects the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalArguments(BTreeMap<String, Value>);

impl CanonicalArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The mapping as a value, ready for encoding.
    pub fn to_value(&self) -> Value {
        Value::map(self.0.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }
}

// == Cache Key ==
/// Hex digest of an encoded value followed by the encoding's byte length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes any value with the 128-bit digest.
    pub fn of(value: &Value) -> Result<Self> {
        let bytes = encode(value)?;
        Ok(CacheKey(format!("{:032x}{}", xxh3_128(&bytes), bytes.len())))
    }

    /// Rebuilds a key from an entry file stem.
    pub(crate) fn from_stem(stem: &str) -> Self {
        CacheKey(stem.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Canonicalize ==
/// Binds `args` against `descriptor`, producing one mapping per logical call.
///
/// Defaults fill first, positional arguments are zipped against the
/// positional parameters up to the variadic tail, the remainder becomes the
/// tail as a tuple, and keyword arguments overwrite by name. For methods the
/// receiver (first positional argument) is dropped before binding.
///
/// # Errors
/// [`CacheError::InvalidArguments`] when the descriptor cannot accept the call:
/// surplus positionals without a variadic tail, an unknown keyword without a
/// keyword sink, a keyword naming the variadic tail, or a method call without
/// a receiver.
pub fn canonicalize(descriptor: &CallableDescriptor, args: &Arguments) -> Result<CanonicalArguments> {
    let positional = if descriptor.is_method() {
        match args.positional().split_first() {
            Some((_receiver, rest)) => rest,
            None => {
                return Err(CacheError::InvalidArguments(format!(
                    "method {} called without a receiver",
                    descriptor.qualified_name()
                )))
            }
        }
    } else {
        args.positional()
    };

    let mut bound: BTreeMap<String, Value> = descriptor
        .parameters()
        .iter()
        .map(|p| (p.name.clone(), p.initial_value()))
        .collect();

    let slots: Vec<&Parameter> = descriptor
        .parameters()
        .iter()
        .take_while(|p| p.kind != ParameterKind::Variadic)
        .filter(|p| p.kind == ParameterKind::Positional)
        .collect();

    let variadic = descriptor.variadic();
    if variadic.is_none() && positional.len() > slots.len() {
        return Err(CacheError::InvalidArguments(format!(
            "{} takes {} positional arguments but {} were given",
            descriptor.qualified_name(),
            slots.len(),
            positional.len()
        )));
    }

    for (slot, value) in slots.iter().zip(positional) {
        bound.insert(slot.name.clone(), value.clone());
    }

    if let Some((_, name)) = variadic {
        let tail = positional.get(slots.len()..).unwrap_or_default();
        bound.insert(name.to_string(), Value::Tuple(tail.to_vec()));
    }

    for (name, value) in args.keyword() {
        match descriptor.parameter(name) {
            Some(p) if p.kind == ParameterKind::Variadic => {
                return Err(CacheError::InvalidArguments(format!(
                    "variadic parameter {name} of {} cannot be passed by keyword",
                    descriptor.qualified_name()
                )));
            }
            Some(_) => {}
            None if descriptor.accepts_var_keyword() => {}
            None => {
                return Err(CacheError::InvalidArguments(format!(
                    "{} got an unexpected keyword argument {name}",
                    descriptor.qualified_name()
                )));
            }
        }
        bound.insert(name.clone(), value.clone());
    }

    Ok(CanonicalArguments(bound))
}

// == Derive Key ==
/// Derives the cache key of canonical arguments.
pub fn derive_key(arguments: &CanonicalArguments) -> Result<CacheKey> {
    CacheKey::of(&arguments.to_value())
}

// == Short Hash ==
/// 64-bit digest with the same length suffix, for namespace directory names.
pub fn short_hash(input: &str) -> Result<String> {
    let bytes = encode(&Value::from(input))?;
    Ok(format!("{:016x}{}", xxh3_64(&bytes), bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn f_a_b() -> CallableDescriptor {
        CallableDescriptor::new("tests::f")
            .param(Parameter::required("a"))
            .param(Parameter::with_default("b", 2))
    }

    fn key(descriptor: &CallableDescriptor, args: Arguments) -> CacheKey {
        derive_key(&canonicalize(descriptor, &args).unwrap()).unwrap()
    }

    #[test]
    fn test_calling_conventions_share_one_key() {
        let f = f_a_b();
        let expected = key(&f, Arguments::new().arg(1));
        assert_eq!(key(&f, Arguments::new().arg(1).arg(2)), expected);
        assert_eq!(key(&f, Arguments::new().kwarg("a", 1).kwarg("b", 2)), expected);
        assert_eq!(key(&f, Arguments::new().kwarg("b", 2).kwarg("a", 1)), expected);
        assert_eq!(key(&f, Arguments::new().arg(1).kwarg("b", 2)), expected);
    }

    #[test]
    fn test_distinct_arguments_get_distinct_keys() {
        let f = f_a_b();
        assert_ne!(key(&f, Arguments::new().arg(1)), key(&f, Arguments::new().arg(2)));
        assert_ne!(key(&f, Arguments::new().arg(1)), key(&f, Arguments::new().arg(1).arg(3)));
    }

    #[test]
    fn test_keyword_wins_over_positional() {
        let canonical = canonicalize(&f_a_b(), &Arguments::new().arg(1).arg(5).kwarg("b", 9)).unwrap();
        assert_eq!(canonical.get("b"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_variadic_tail_collects_remainder() {
        let f = CallableDescriptor::new("tests::g")
            .param(Parameter::required("a"))
            .param(Parameter::variadic("args"))
            .param(Parameter::keyword_only("flag", Some(Value::Bool(true))));

        let canonical = canonicalize(&f, &Arguments::new().arg(1).arg(2).arg(3)).unwrap();
        assert_eq!(canonical.get("a"), Some(&Value::Int(1)));
        assert_eq!(canonical.get("args"), Some(&Value::tuple([2, 3])));
        assert_eq!(canonical.get("flag"), Some(&Value::Bool(true)));

        let canonical = canonicalize(&f, &Arguments::new().arg(1)).unwrap();
        assert_eq!(canonical.get("args"), Some(&Value::Tuple(vec![])));
    }

    #[test]
    fn test_method_receiver_is_ignored() {
        let m = f_a_b().method();
        let first = key(&m, Arguments::new().arg("receiver-1").arg(1));
        let second = key(&m, Arguments::new().arg("receiver-2").kwarg("a", 1));
        assert_eq!(first, second);

        let err = canonicalize(&m, &Arguments::new()).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArguments(_)));
    }

    #[test]
    fn test_unknown_keyword_requires_sink() {
        let err = canonicalize(&f_a_b(), &Arguments::new().kwarg("c", 1)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArguments(_)));

        let sink = f_a_b().var_keyword();
        let canonical = canonicalize(&sink, &Arguments::new().arg(1).kwarg("c", 3)).unwrap();
        assert_eq!(canonical.get("c"), Some(&Value::Int(3)));
        assert_eq!(canonical.len(), 3);
    }

    #[test]
    fn test_surplus_positionals_rejected_without_variadic() {
        let err = canonicalize(&f_a_b(), &Arguments::new().arg(1).arg(2).arg(3)).unwrap_err();
        assert!(err.to_string().contains("2 positional arguments but 3"));
    }

    #[test]
    fn test_key_format() {
        let k = key(&f_a_b(), Arguments::new().arg(1));
        let (digest, length) = k.as_str().split_at(32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        let encoded = encode(&canonicalize(&f_a_b(), &Arguments::new().arg(1)).unwrap().to_value()).unwrap();
        assert_eq!(length, encoded.len().to_string());
    }

    #[test]
    fn test_short_hash_is_stable() {
        let first = short_hash("reports::render").unwrap();
        assert_eq!(first, short_hash("reports::render").unwrap());
        assert_ne!(first, short_hash("reports::render_all").unwrap());
        assert!(first[..16].chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        // *For any* argument values and any split point, binding the first
        // `split` parameters by position and the rest by keyword SHALL yield
        // the key of the all-positional call.
        #[test]
        fn prop_split_invariance(
            values in prop::collection::vec(any::<i64>(), 4),
            split in 0usize..=4,
            reversed in any::<bool>(),
        ) {
            let names = ["w", "x", "y", "z"];
            let descriptor = names
                .iter()
                .fold(CallableDescriptor::new("tests::h"), |d, n| d.param(Parameter::required(*n)));

            let all_positional: Arguments = values.iter().copied().collect();
            let mut mixed = values[..split].iter().copied().collect::<Arguments>();
            let mut keywords: Vec<_> = names[split..].iter().zip(&values[split..]).collect();
            if reversed {
                keywords.reverse();
            }
            for (name, value) in keywords {
                mixed = mixed.kwarg(*name, *value);
            }

            prop_assert_eq!(key(&descriptor, all_positional), key(&descriptor, mixed));
        }
    }
}
