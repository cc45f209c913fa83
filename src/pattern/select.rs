//! Client-side record selection with regular expressions.

use regex::bytes::{Regex, RegexBuilder};

use super::{json_fragment, record_pattern, WILDCARD};
use crate::error::{AdapterError, AdapterResult};
use crate::types::PolicyFilter;

/// Build the anchored regex selecting records accepted by `filter`.
///
/// Example for `V0 ∈ {data2_admin, data1_admin}`:
///
/// ```text
/// ^\{"pType":".*","V0":"(?:data2_admin|data1_admin)","V1":".*",...,"V5":".*"\}$
/// ```
pub fn select_filter_pattern(filter: &PolicyFilter) -> String {
    let terms: Vec<String> = filter
        .positions()
        .iter()
        .map(|values| {
            if values.is_empty() {
                return WILDCARD.to_string();
            }
            let alternatives: Vec<String> = values
                .iter()
                .map(|value| regex::escape(&json_fragment(value)))
                .collect();
            format!("(?:{})", alternatives.join("|"))
        })
        .collect();

    record_pattern(&terms, r"\{", r"\}")
}

/// Compiled form of [`select_filter_pattern`].
#[derive(Debug, Clone)]
pub struct SelectMatcher {
    regex: Regex,
}

impl SelectMatcher {
    /// Compiles over raw bytes: `.` matches any byte, so a wildcard slot
    /// never hides an entry the decoder would reject.
    pub fn new(filter: &PolicyFilter) -> AdapterResult<Self> {
        let pattern = select_filter_pattern(filter);
        let regex = RegexBuilder::new(&pattern)
            .unicode(false)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| AdapterError::FilterType(e.to_string()))?;
        Ok(Self { regex })
    }

    /// Whether a stored record is selected.
    pub fn matches(&self, record: &[u8]) -> bool {
        self.regex.is_match(record)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_converter::encode_rule;
    use proptest::prelude::*;

    fn matches(filter: &PolicyFilter, ptype: &str, fields: &[&str]) -> bool {
        let matcher = SelectMatcher::new(filter).unwrap();
        matcher.matches(&encode_rule(ptype, fields).unwrap())
    }

    #[test]
    fn test_pattern_shape() {
        let filter = PolicyFilter::new().with_field(0, &["data2_admin", "data1_admin"]);
        assert_eq!(
            select_filter_pattern(&filter),
            r#"^\{"pType":".*","V0":"(?:data2_admin|data1_admin)","V1":".*","V2":".*","V3":".*","V4":".*","V5":".*"\}$"#
        );
    }

    #[test]
    fn test_alternation_selects_each_value() {
        let filter = PolicyFilter::new().with_field(0, &["alice", "bob"]);
        assert!(matches(&filter, "p", &["alice", "data1", "read"]));
        assert!(matches(&filter, "p", &["bob", "data2", "write"]));
        assert!(!matches(&filter, "p", &["data2_admin", "data2", "read"]));
    }

    #[test]
    fn test_no_substring_matches() {
        let filter = PolicyFilter::new().with_field(0, &["alice"]);
        assert!(!matches(&filter, "p", &["alice2", "data1", "read"]));
        assert!(!matches(&filter, "p", &["malice", "data1", "read"]));
    }

    #[test]
    fn test_value_in_other_position_is_not_selected() {
        let filter = PolicyFilter::new().with_field(1, &["data1"]);
        assert!(matches(&filter, "p", &["alice", "data1", "read"]));
        assert!(!matches(&filter, "p", &["data1", "data2", "read"]));
    }

    #[test]
    fn test_ptype_position() {
        let filter = PolicyFilter::new().with_ptype(&["g"]);
        assert!(matches(&filter, "g", &["alice", "data2_admin"]));
        assert!(!matches(&filter, "p", &["alice", "data1", "read"]));
        assert!(!matches(&filter, "g2", &["alice", "domain"]));
    }

    #[test]
    fn test_regex_metacharacters_match_literally() {
        let filter = PolicyFilter::new().with_field(0, &["a.b|c*"]);
        assert!(matches(&filter, "p", &["a.b|c*"]));
        assert!(!matches(&filter, "p", &["axb|c*"]));
        assert!(!matches(&filter, "p", &["a.b"]));
        assert!(!matches(&filter, "p", &["c"]));
    }

    #[test]
    fn test_quotes_and_backslashes_match_stored_form() {
        let filter = PolicyFilter::new().with_field(0, &["say \"hi\"", "c:\\path"]);
        assert!(matches(&filter, "p", &["say \"hi\""]));
        assert!(matches(&filter, "p", &["c:\\path"]));
        assert!(!matches(&filter, "p", &["say hi"]));
    }

    #[test]
    fn test_empty_accepted_value_matches_empty_field() {
        let filter = PolicyFilter::new().with_field(3, &[""]);
        assert!(matches(&filter, "p", &["alice", "data1", "read"]));
        assert!(!matches(&filter, "p", &["alice", "data1", "read", "allow"]));
    }

    #[test]
    fn test_rejects_non_record_entries() {
        let matcher = SelectMatcher::new(&PolicyFilter::new()).unwrap();
        assert!(!matcher.matches(b"__CASBIN_DELETED__"));
        assert!(!matcher.matches(&[0xff, 0xfe]));
    }

    #[test]
    fn test_wildcard_spans_invalid_utf8() {
        let mut record = br#"{"pType":"p","V0":""#.to_vec();
        record.push(0xff);
        record.extend_from_slice(br#"","V1":"","V2":"","V3":"","V4":"","V5":""}"#);

        let matcher = SelectMatcher::new(&PolicyFilter::new().with_ptype(&["p"])).unwrap();
        assert!(matcher.matches(&record));

        let matcher = SelectMatcher::new(&PolicyFilter::new().with_field(0, &["alice"])).unwrap();
        assert!(!matcher.matches(&record));
    }

    #[test]
    fn test_non_ascii_values_match() {
        let filter = PolicyFilter::new().with_field(0, &["zoë"]);
        assert!(matches(&filter, "p", &["zoë", "data1"]));
        assert!(!matches(&filter, "p", &["zoe", "data1"]));
    }

    proptest! {
        #[test]
        fn wildcard_filter_matches_every_record(
            ptype in "[pg][0-9]?",
            fields in proptest::collection::vec(".{0,10}", 0..=6)
        ) {
            let matcher = SelectMatcher::new(&PolicyFilter::new()).unwrap();
            prop_assert!(matcher.matches(&encode_rule(&ptype, &fields).unwrap()));
        }

        #[test]
        fn escaped_value_matches_only_itself(
            value in r"[a-z.*+?()|\[\]{}^$\\%-]{1,8}",
            other in r"[a-z.*+?()|\[\]{}^$\\%-]{1,8}"
        ) {
            let filter = PolicyFilter::new().with_field(0, &[value.as_str()]);
            let matcher = SelectMatcher::new(&filter).unwrap();
            prop_assert!(matcher.matches(&encode_rule("p", &[value.as_str(), "obj"]).unwrap()));
            if other != value {
                prop_assert!(!matcher.matches(&encode_rule("p", &[other.as_str(), "obj"]).unwrap()));
            }
        }
    }
}
