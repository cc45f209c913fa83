//! Lua patterns for server-side scripted mutations.
//!
//! Scripts select list entries with `string.find(entry, pattern)`. Lua
//! patterns have no alternation, so a field-range filter is a single literal
//! per slot with `.*` everywhere else.

use super::{json_fragment, record_pattern, WILDCARD};
use crate::types::MAX_FIELDS;

/// Characters with special meaning in Lua patterns.
const LUA_MAGIC: &[char] = &['^', '$', '(', ')', '%', '.', '[', ']', '*', '+', '-', '?'];

/// Escape Lua pattern magic characters with `%`. Nothing else is touched.
pub fn escape_lua_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if LUA_MAGIC.contains(&c) {
            out.push('%');
        }
        out.push(c);
    }
    out
}

/// Build the Lua pattern for a ptype plus values over consecutive slots.
///
/// `values[i]` constrains slot `field_index + i`. Slots outside that range,
/// and slots whose value is empty, accept anything. Values running past the
/// last slot are ignored.
///
/// Example for ptype `p`, index 0, values `["data2_admin"]`:
///
/// ```text
/// ^{"pType":"p","V0":"data2_admin","V1":".*","V2":".*","V3":".*","V4":".*","V5":".*"}$
/// ```
pub fn field_range_pattern<S: AsRef<str>>(ptype: &str, field_index: usize, values: &[S]) -> String {
    let end = field_index.saturating_add(values.len());

    let mut terms = Vec::with_capacity(MAX_FIELDS + 1);
    terms.push(escape_lua_pattern(&json_fragment(ptype)));
    for slot in 0..MAX_FIELDS {
        let value = if slot >= field_index && slot < end {
            values[slot - field_index].as_ref()
        } else {
            ""
        };
        if value.is_empty() {
            terms.push(WILDCARD.to_string());
        } else {
            terms.push(escape_lua_pattern(&json_fragment(value)));
        }
    }

    record_pattern(&terms, "{", "}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_converter::encode_rule;
    use mlua::{Function, Lua, Table, Value};
    use proptest::prelude::*;

    /// `string.find(subject, pattern) ~= nil`, evaluated by Lua 5.1.
    fn lua_find(subject: &[u8], pattern: &[u8]) -> bool {
        let lua = Lua::new();
        let string: Table = lua.globals().get("string").unwrap();
        let find: Function = string.get("find").unwrap();
        let start: Value = find
            .call((
                lua.create_string(subject).unwrap(),
                lua.create_string(pattern).unwrap(),
            ))
            .unwrap();
        !matches!(start, Value::Nil)
    }

    fn selects(pattern: &str, ptype: &str, fields: &[&str]) -> bool {
        lua_find(&encode_rule(ptype, fields).unwrap(), pattern.as_bytes())
    }

    #[test]
    fn test_escape_only_lua_magic() {
        assert_eq!(escape_lua_pattern("a.b-c"), "a%.b%-c");
        assert_eq!(escape_lua_pattern("50%"), "50%%");
        assert_eq!(escape_lua_pattern("(x)[y]^$*+?"), "%(x%)%[y%]%^%$%*%+%?");
        // Regex-only metacharacters are plain in Lua.
        assert_eq!(escape_lua_pattern("a|b{1}\\"), "a|b{1}\\");
    }

    #[test]
    fn test_pattern_shape() {
        assert_eq!(
            field_range_pattern("p", 0, &["data2_admin"]),
            r#"^{"pType":"p","V0":"data2_admin","V1":".*","V2":".*","V3":".*","V4":".*","V5":".*"}$"#
        );
    }

    #[test]
    fn test_offset_and_empty_values_wildcard() {
        let pattern = field_range_pattern("p", 1, &["data1", "", "allow"]);
        assert_eq!(
            pattern,
            r#"^{"pType":"p","V0":".*","V1":"data1","V2":".*","V3":"allow","V4":".*","V5":".*"}$"#
        );
    }

    #[test]
    fn test_values_past_last_slot_are_ignored() {
        let pattern = field_range_pattern("p", 5, &["x", "y", "z"]);
        assert!(pattern.ends_with(r#""V5":"x"}$"#));
        let beyond = field_range_pattern("p", 9, &["x"]);
        assert!(selects(&beyond, "p", &["anything"]));
    }

    #[test]
    fn test_ptype_is_literal() {
        let pattern = field_range_pattern::<&str>("p", 0, &[]);
        assert!(selects(&pattern, "p", &["alice", "data1", "read"]));
        assert!(!selects(&pattern, "g", &["alice", "admin"]));
        assert!(!selects(&pattern, "p2", &["alice", "data1", "read"]));

        let dotted = field_range_pattern::<&str>("p.", 0, &[]);
        assert!(selects(&dotted, "p.", &["alice"]));
        assert!(!selects(&dotted, "px", &["alice"]));
    }

    #[test]
    fn test_selects_by_first_field() {
        let pattern = field_range_pattern("p", 0, &["alice"]);
        assert!(selects(&pattern, "p", &["alice", "data1", "read"]));
        assert!(!selects(&pattern, "p", &["bob", "data2", "write"]));
        assert!(!selects(&pattern, "p", &["alice2", "data1", "read"]));
    }

    #[test]
    fn test_lua_magic_values_match_literally() {
        let pattern = field_range_pattern("p", 0, &["50%-off.*"]);
        assert!(selects(&pattern, "p", &["50%-off.*"]));
        assert!(!selects(&pattern, "p", &["50%-offXY"]));
        assert!(!selects(&pattern, "p", &["5"]));
    }

    proptest! {
        #[test]
        fn escaped_value_matches_only_itself(
            value in r"[a-z.*+?()|\[\]{}^$\\%-]{1,8}",
            other in r"[a-z.*+?()|\[\]{}^$\\%-]{1,8}"
        ) {
            let pattern = field_range_pattern("p", 0, &[value.as_str()]);
            prop_assert!(selects(&pattern, "p", &[value.as_str(), "obj"]));
            if other != value {
                prop_assert!(!selects(&pattern, "p", &[other.as_str(), "obj"]));
            }
        }

        #[test]
        fn escaped_text_finds_itself(text in "[^\\x00]{0,12}") {
            let pattern = format!("^{}$", escape_lua_pattern(&text));
            prop_assert!(lua_find(text.as_bytes(), pattern.as_bytes()));
        }
    }
}
