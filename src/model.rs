//! # Policy Model Module
//!
//! The in-memory side of the adapter: loads write into a [`PolicySink`] and
//! bulk saves read from a [`PolicyModel`].

use std::collections::BTreeMap;

use crate::types::{PolicyRule, Section};

/// Receiver for rules read back from storage.
pub trait PolicySink {
    /// Drop every rule currently held.
    fn clear_policy(&mut self);

    /// Add one loaded rule.
    fn load_policy_line(&mut self, rule: PolicyRule);
}

/// Rules grouped by section, then by ptype.
///
/// Ptypes iterate in sorted order, and rules keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyModel {
    sections: BTreeMap<Section, BTreeMap<String, Vec<Vec<String>>>>,
}

impl PolicyModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Returns false when the ptype maps to no section.
    pub fn add_policy<S: AsRef<str>>(&mut self, ptype: &str, rule: &[S]) -> bool {
        let Some(section) = Section::from_ptype(ptype) else {
            return false;
        };
        self.sections
            .entry(section)
            .or_default()
            .entry(ptype.to_string())
            .or_default()
            .push(rule.iter().map(|f| f.as_ref().to_string()).collect());
        true
    }

    /// Rules stored under `ptype`, in insertion order.
    pub fn get_policy(&self, ptype: &str) -> &[Vec<String>] {
        Section::from_ptype(ptype)
            .and_then(|section| self.sections.get(&section))
            .and_then(|ptypes| ptypes.get(ptype))
            .map(|rules| rules.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_policy<S: AsRef<str>>(&self, ptype: &str, rule: &[S]) -> bool {
        self.get_policy(ptype).iter().any(|stored| {
            stored.len() == rule.len() && stored.iter().zip(rule).all(|(a, b)| a == b.as_ref())
        })
    }

    /// Every rule of `section` as `(ptype, fields)`, ptypes in sorted order.
    pub fn section_rules(
        &self,
        section: Section,
    ) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.sections
            .get(&section)
            .into_iter()
            .flat_map(|ptypes| ptypes.iter())
            .flat_map(|(ptype, rules)| {
                rules
                    .iter()
                    .map(move |rule| (ptype.as_str(), rule.as_slice()))
            })
    }

    /// Total number of rules across sections.
    pub fn len(&self) -> usize {
        self.sections
            .values()
            .flat_map(|ptypes| ptypes.values())
            .map(|rules| rules.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }
}

impl PolicySink for PolicyModel {
    fn clear_policy(&mut self) {
        self.clear();
    }

    fn load_policy_line(&mut self, rule: PolicyRule) {
        if !self.add_policy(&rule.ptype, &rule.fields) {
            tracing::warn!(ptype = %rule.ptype, "skipping loaded rule with unknown section");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_policy() {
        let mut model = PolicyModel::new();
        assert!(model.add_policy("p", &["alice", "data1", "read"]));
        assert!(model.add_policy("p", &["bob", "data2", "write"]));
        assert!(model.add_policy("g", &["alice", "data2_admin"]));

        assert_eq!(model.get_policy("p").len(), 2);
        assert_eq!(model.get_policy("g").len(), 1);
        assert!(model.get_policy("p2").is_empty());
        assert!(model.has_policy("p", &["bob", "data2", "write"]));
        assert!(!model.has_policy("p", &["bob", "data2"]));
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        let mut model = PolicyModel::new();
        assert!(!model.add_policy("e", &["x"]));
        assert!(model.is_empty());
    }

    #[test]
    fn test_section_rules_order() {
        let mut model = PolicyModel::new();
        model.add_policy("p2", &["z"]);
        model.add_policy("p", &["b"]);
        model.add_policy("p", &["a"]);
        model.add_policy("g", &["g1"]);

        let policies: Vec<(&str, Vec<String>)> = model
            .section_rules(Section::Policy)
            .map(|(ptype, rule)| (ptype, rule.to_vec()))
            .collect();
        assert_eq!(
            policies,
            vec![
                ("p", vec!["b".to_string()]),
                ("p", vec!["a".to_string()]),
                ("p2", vec!["z".to_string()]),
            ]
        );
        assert_eq!(model.section_rules(Section::Grouping).count(), 1);
    }

    #[test]
    fn test_sink_clear_and_load() {
        let mut model = PolicyModel::new();
        model.add_policy("p", &["stale"]);

        model.clear_policy();
        model.load_policy_line(PolicyRule::new("g", &["alice", "admin"]));
        model.load_policy_line(PolicyRule::new("x", &["ignored"]));

        assert_eq!(model.len(), 1);
        assert!(model.has_policy("g", &["alice", "admin"]));
    }
}
