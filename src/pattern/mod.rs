//! # Pattern Module
//!
//! Matchers over stored rule records.
//!
//! Two engines consume these patterns and they disagree on which characters
//! are special, so each has its own escaper:
//! - [`select`]: regular expressions evaluated client-side during filtered loads
//! - [`lua`]: Lua patterns evaluated by server-side scripts (`string.find`)
//!
//! Both operate on the canonical record bytes, so filter values are first
//! rendered in their JSON-escaped form before engine escaping.

pub mod lua;
pub mod select;

pub use lua::{escape_lua_pattern, field_range_pattern};
pub use select::{select_filter_pattern, SelectMatcher};

/// Record keys in stored order.
pub const RECORD_KEYS: [&str; 7] = ["pType", "V0", "V1", "V2", "V3", "V4", "V5"];

/// Wildcard term, valid in both engines.
pub const WILDCARD: &str = ".*";

/// A value as it appears between the quotes of a stored record.
pub fn json_fragment(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Render the anchored record shape around already-escaped terms.
///
/// `open` and `close` are the engine's spelling of the literal braces.
fn record_pattern(terms: &[String], open: &str, close: &str) -> String {
    let mut pattern = format!("^{}", open);
    for (i, (key, term)) in RECORD_KEYS.iter().zip(terms).enumerate() {
        if i > 0 {
            pattern.push(',');
        }
        pattern.push('"');
        pattern.push_str(key);
        pattern.push_str("\":\"");
        pattern.push_str(term);
        pattern.push('"');
    }
    pattern.push_str(close);
    pattern.push('$');
    pattern
}
