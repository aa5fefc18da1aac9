//! Fast, non-cryptographic hashing.
//!
//! FxHash is optimized for the small integer and string keys a graph
//! database throws around all day. Use these aliases instead of the std
//! defaults so the whole codebase hashes consistently.

pub use rustc_hash::FxHasher;

/// HashMap with FxHash.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// HashSet with FxHash.
pub type FxHashSet<T> = rustc_hash::FxHashSet<T>;
