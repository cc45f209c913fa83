//! Conversion between structured rules and their stored list entries.
//!
//! Every rule is stored as a flat JSON object with seven keys in a fixed
//! order:
//!
//! ```text
//! {"pType":"p","V0":"alice","V1":"data1","V2":"read","V3":"","V4":"","V5":""}
//! ```
//!
//! Pattern matching and exact-match removal both operate on these bytes, so
//! the encoding must stay byte-stable for a given rule.

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};
use crate::types::{PolicyRule, MAX_FIELDS};

/// Canonical stored form of a rule.
///
/// Absent fields are stored as empty strings, so a trailing empty field and
/// a missing one cannot be told apart once stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(rename = "pType")]
    pub ptype: String,
    #[serde(rename = "V0")]
    pub v0: String,
    #[serde(rename = "V1")]
    pub v1: String,
    #[serde(rename = "V2")]
    pub v2: String,
    #[serde(rename = "V3")]
    pub v3: String,
    #[serde(rename = "V4")]
    pub v4: String,
    #[serde(rename = "V5")]
    pub v5: String,
}

impl RuleRecord {
    /// Build a record from a ptype and up to six positional fields.
    pub fn from_rule<S: AsRef<str>>(ptype: &str, fields: &[S]) -> AdapterResult<Self> {
        if fields.len() > MAX_FIELDS {
            return Err(AdapterError::Encode(format!(
                "rule has {} fields, at most {} are stored",
                fields.len(),
                MAX_FIELDS
            )));
        }

        let field = |i: usize| {
            fields
                .get(i)
                .map(|f| f.as_ref().to_string())
                .unwrap_or_default()
        };

        Ok(Self {
            ptype: ptype.to_string(),
            v0: field(0),
            v1: field(1),
            v2: field(2),
            v3: field(3),
            v4: field(4),
            v5: field(5),
        })
    }

    /// Serialize to the canonical byte form.
    pub fn encode(&self) -> AdapterResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AdapterError::Encode(e.to_string()))
    }

    /// Parse a stored entry. All seven keys must be present.
    pub fn decode(bytes: &[u8]) -> AdapterResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| AdapterError::decode(bytes, e.to_string()))
    }

    pub fn fields(&self) -> [&str; MAX_FIELDS] {
        [
            self.v0.as_str(),
            self.v1.as_str(),
            self.v2.as_str(),
            self.v3.as_str(),
            self.v4.as_str(),
            self.v5.as_str(),
        ]
    }

    /// Positional fields without the ptype, with trailing empty fields trimmed.
    ///
    /// Interior empty fields are kept: `["", "data1"]` stays two fields long.
    pub fn to_positional(&self) -> Vec<String> {
        let fields = self.fields();
        let len = fields
            .iter()
            .rposition(|f| !f.is_empty())
            .map_or(0, |last| last + 1);
        fields[..len].iter().map(|f| f.to_string()).collect()
    }

    pub fn into_rule(self) -> PolicyRule {
        let fields = self.to_positional();
        PolicyRule {
            ptype: self.ptype,
            fields,
        }
    }
}

/// Encode a ptype and fields straight to stored bytes.
pub fn encode_rule<S: AsRef<str>>(ptype: &str, fields: &[S]) -> AdapterResult<Vec<u8>> {
    RuleRecord::from_rule(ptype, fields)?.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_canonical_shape() {
        let bytes = encode_rule("p", &["alice", "data1", "read"]).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"pType":"p","V0":"alice","V1":"data1","V2":"read","V3":"","V4":"","V5":""}"#
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = encode_rule("g", &["alice", "admin"]).unwrap();
        let b = encode_rule("g", &["alice".to_string(), "admin".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_rejects_seven_fields() {
        let err = encode_rule("p", &["1", "2", "3", "4", "5", "6", "7"]).unwrap_err();
        assert!(matches!(err, AdapterError::Encode(_)));
    }

    #[test]
    fn test_trailing_trim_keeps_interior_empties() {
        let record = RuleRecord::from_rule("p", &["", "data1", "", "", ""]).unwrap();
        assert_eq!(record.to_positional(), vec!["", "data1"]);
    }

    #[test]
    fn test_ptype_only_yields_no_fields() {
        let record = RuleRecord::from_rule::<&str>("p", &[]).unwrap();
        assert!(record.to_positional().is_empty());

        // An explicit empty first field is indistinguishable once stored.
        let empty = RuleRecord::from_rule("p", &[""]).unwrap();
        assert_eq!(record.encode().unwrap(), empty.encode().unwrap());
    }

    #[test]
    fn test_decode_rejects_other_ptype_spelling() {
        let err = RuleRecord::decode(
            br#"{"PType":"p","V0":"bob","V1":"data2","V2":"write","V3":"","V4":"","V5":""}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_key() {
        let err = RuleRecord::decode(br#"{"pType":"p","V0":"bob"}"#).unwrap_err();
        assert!(matches!(err, AdapterError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = RuleRecord::decode(b"__CASBIN_DELETED__").unwrap_err();
        assert!(matches!(err, AdapterError::Decode { .. }));
    }

    #[test]
    fn test_special_characters_survive() {
        let fields = ["a\"b", "c\\d", "line\nbreak", "ünï"];
        let bytes = encode_rule("p", &fields).unwrap();
        let rule = RuleRecord::decode(&bytes).unwrap().into_rule();
        assert_eq!(rule.fields, fields);
    }

    fn trim_trailing(fields: &[String]) -> Vec<String> {
        let len = fields
            .iter()
            .rposition(|f| !f.is_empty())
            .map_or(0, |last| last + 1);
        fields[..len].to_vec()
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            ptype in "[pg][0-9]?",
            fields in proptest::collection::vec(".{0,8}", 0..=6)
        ) {
            let bytes = encode_rule(&ptype, &fields).unwrap();
            let rule = RuleRecord::decode(&bytes).unwrap().into_rule();
            prop_assert_eq!(rule.ptype, ptype);
            prop_assert_eq!(rule.fields, trim_trailing(&fields));
        }

        #[test]
        fn distinct_tuples_encode_distinctly(
            a in proptest::collection::vec(".{0,4}", 6),
            b in proptest::collection::vec(".{0,4}", 6)
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(encode_rule("p", &a).unwrap(), encode_rule("p", &b).unwrap());
        }
    }
}
