//! # Adapter Types Module
//!
//! Core type definitions shared by the codec, pattern builder and adapter.
//!
//! This module provides:
//! - The structured rule type
//! - Rule sections (policy vs grouping)
//! - The load filter

use std::fmt;

use serde::Deserialize;

/// Number of positional field slots in a stored rule.
pub const MAX_FIELDS: usize = 6;

// ================================================================================================
// RULE
// ================================================================================================

/// A structured access-control rule: a policy type plus up to six fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyRule {
    /// Rule kind, e.g. `p` for permissions or `g` for role inheritance
    pub ptype: String,
    /// Positional fields in order
    pub fields: Vec<String>,
}

impl PolicyRule {
    pub fn new<S: AsRef<str>>(ptype: impl Into<String>, fields: &[S]) -> Self {
        Self {
            ptype: ptype.into(),
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }

    /// Section this rule belongs to, derived from its ptype.
    pub fn section(&self) -> Option<Section> {
        Section::from_ptype(&self.ptype)
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ptype)?;
        for field in &self.fields {
            write!(f, ", {}", field)?;
        }
        Ok(())
    }
}

// ================================================================================================
// SECTION
// ================================================================================================

/// Rule-kind group. Saved in this order: all policies, then all groupings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    /// Permission rules (`p`, `p2`, ...)
    Policy,
    /// Role-inheritance rules (`g`, `g2`, ...)
    Grouping,
}

impl Section {
    pub const ALL: [Section; 2] = [Section::Policy, Section::Grouping];

    /// Maps a ptype to its section by its first character.
    pub fn from_ptype(ptype: &str) -> Option<Self> {
        match ptype.as_bytes().first() {
            Some(b'p') => Some(Section::Policy),
            Some(b'g') => Some(Section::Grouping),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Policy => "p",
            Section::Grouping => "g",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ================================================================================================
// FILTER
// ================================================================================================

/// Accepted values per record position. An empty list accepts anything.
///
/// Deserializes from the same key spelling as the stored record, so an
/// untyped caller can pass `{"V0": ["alice", "bob"]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyFilter {
    #[serde(rename = "pType", alias = "PType")]
    pub ptype: Vec<String>,
    #[serde(rename = "V0")]
    pub v0: Vec<String>,
    #[serde(rename = "V1")]
    pub v1: Vec<String>,
    #[serde(rename = "V2")]
    pub v2: Vec<String>,
    #[serde(rename = "V3")]
    pub v3: Vec<String>,
    #[serde(rename = "V4")]
    pub v4: Vec<String>,
    #[serde(rename = "V5")]
    pub v5: Vec<String>,
}

impl PolicyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the ptype position.
    pub fn with_ptype<S: AsRef<str>>(mut self, values: &[S]) -> Self {
        self.ptype = to_owned_list(values);
        self
    }

    /// Restrict field slot `index` (0-based). Indexes past the last slot are ignored.
    pub fn with_field<S: AsRef<str>>(mut self, index: usize, values: &[S]) -> Self {
        let values = to_owned_list(values);
        match index {
            0 => self.v0 = values,
            1 => self.v1 = values,
            2 => self.v2 = values,
            3 => self.v3 = values,
            4 => self.v4 = values,
            5 => self.v5 = values,
            _ => {}
        }
        self
    }

    /// The seven positions in record order: ptype, then V0..V5.
    pub fn positions(&self) -> [&[String]; MAX_FIELDS + 1] {
        [
            &self.ptype,
            &self.v0,
            &self.v1,
            &self.v2,
            &self.v3,
            &self.v4,
            &self.v5,
        ]
    }

    /// True when every position is a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.positions().iter().all(|values| values.is_empty())
    }
}

fn to_owned_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_string()).collect()
}
