//! Signature tags for escaped value kinds.
//!
//! Every signature is a marker drawn from an alphabet unlikely to open real
//! text, followed by a private separator. Matching is always against the full
//! signature, never a first-byte heuristic.

/// Separates a signature marker from the payload it tags.
pub const SIGNATURE_SEPARATOR: &str = "\u{1c}\u{1e}";

/// Tuple container (head element of an array).
pub const TUPLE_SIGNATURE: &str = "🌷\u{1c}\u{1e}";

/// Set container (head element of an array).
pub const SET_SIGNATURE: &str = "🧺\u{1c}\u{1e}";

/// Frozen set container (head element of an array).
pub const FROZENSET_SIGNATURE: &str = "🧊🧺\u{1c}\u{1e}";

/// Opaque object (string prefix).
pub const OPAQUE_SIGNATURE: &str = "🥒\u{1c}\u{1e}";

/// Raw byte string (string prefix).
pub const BYTES_SIGNATURE: &str = "🔟\u{1c}\u{1e}";

/// Mutable byte buffer (string prefix).
pub const BYTEARRAY_SIGNATURE: &str = "🔢\u{1c}\u{1e}";

/// Signatures of kinds encoded as arrays.
pub const CONTAINER_SIGNATURES: [&str; 3] = [TUPLE_SIGNATURE, SET_SIGNATURE, FROZENSET_SIGNATURE];

/// Signatures of kinds encoded as strings.
pub const STRING_SIGNATURES: [&str; 3] = [OPAQUE_SIGNATURE, BYTES_SIGNATURE, BYTEARRAY_SIGNATURE];

/// Returns true if `s` is exactly a container signature.
pub fn is_container_signature(s: &str) -> bool {
    CONTAINER_SIGNATURES.contains(&s)
}

/// Returns true if `s` begins with a complete string-kind signature.
pub fn has_string_signature(s: &str) -> bool {
    STRING_SIGNATURES.iter().any(|sig| s.starts_with(sig))
}
