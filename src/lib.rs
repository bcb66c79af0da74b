// corekit — slab-allocated containers, binary-safe strings, soft dynamic
// types and a streaming JSON parser.

pub mod collections;
pub mod hash;
pub mod json;
pub mod list;
pub mod mem;
pub mod num;
pub mod refwrap;
pub mod soft;
pub mod string;
pub mod sync;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports for the most common API entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// Two-ended dynamic array over slab memory.
pub use collections::array::Array;
/// Element hooks (copy / destroy / compare / invalid sentinel) shared by
/// every container in this crate.
pub use collections::Element;
/// Compact hash map: separate data vector + probe table, lazy compaction.
pub use collections::altmap::CompactMap;
/// Insertion-ordered open-addressed hash map.
pub use collections::map::OrderedMap;
/// Insertion-ordered open-addressed hash set.
pub use collections::map::OrderedSet;

/// Binary-safe string with small-string optimization and a frozen mode.
pub use string::BString;
/// `(len, capacity)` snapshot returned by every string mutator.
pub use string::StrInfo;

/// Streaming JSON recognizer driving [`JsonHandler`] callbacks.
pub use json::JsonParser;
/// Callback surface of the streaming JSON parser.
pub use json::JsonHandler;

/// Tagged-word dynamic value (null / bool / int / float / string / array /
/// hash / extension).
pub use soft::Soft;
/// Class tag of a [`Soft`] value.
pub use soft::SoftType;
/// Virtual table for user-extended soft classes.
pub use soft::SoftVtable;

/// Atomic reference-count wrapper used by the soft heap classes.
pub use refwrap::RefWrap;

/// Serializes a soft value as JSON into a [`BString`].
pub use soft::json::to_json;
/// Builds a soft value from JSON bytes.
pub use soft::json::json_parse;
/// Merges a JSON object into an existing soft hash.
pub use soft::json::hash_update_json;

// ─────────────────────────────────────────────────────────────────────────────
// Version API
// ─────────────────────────────────────────────────────────────────────────────

pub const COREKIT_VERSION_MAJOR: i32 = 0;
pub const COREKIT_VERSION_MINOR: i32 = 7;
pub const COREKIT_VERSION_RELEASE: i32 = 0;
pub const COREKIT_VERSION_STRING: &str = "0.7.0";

/// Returns the library version string (e.g. `"0.7.0"`).
pub fn version_string() -> &'static str {
    COREKIT_VERSION_STRING
}
