//! Concept taxonomy
//!
//! The taxonomy is a read-only subsumption hierarchy over parameter concepts.
//! Grouping, diff merging and Generic searches all consult it through the
//! [`Taxonomy`] trait; [`BasicTaxonomy`] is the tree implementation used by
//! nodes and tests.

use crate::parameter::Parameter;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("Unknown parent concept: {0}")]
    UnknownParent(String),
    #[error("Concept already present: {0}")]
    DuplicateConcept(String),
    #[error("Taxonomy has no root")]
    MissingRoot,
}

/// Subsumption queries over concept identifiers. Implementations must be pure.
pub trait Taxonomy: Send + Sync {
    /// `a` is an ancestor of `b`, or equal to it
    fn subsumes(&self, a: &str, b: &str) -> bool;

    fn are_related(&self, a: &str, b: &str) -> bool {
        self.subsumes(a, b) || self.subsumes(b, a)
    }

    /// Parameter-level subsumption: polarity must match
    fn subsumes_parameter(&self, a: &Parameter, b: &Parameter) -> bool {
        a.same_polarity(b) && self.subsumes(a.concept(), b.concept())
    }

    /// Parameter-level relation: polarity must match
    fn related_parameters(&self, a: &Parameter, b: &Parameter) -> bool {
        a.same_polarity(b) && self.are_related(a.concept(), b.concept())
    }
}

/// Tree taxonomy with a single root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicTaxonomy {
    root: Option<String>,
    /// Child concept → parent concept
    parents: HashMap<String, String>,
    /// Parent concept → children, in insertion order
    children: HashMap<String, Vec<String>>,
}

impl BasicTaxonomy {
    /// Empty taxonomy: only identical concepts subsume each other
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn set_root(&mut self, root: impl Into<String>) {
        self.root = Some(root.into());
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn add_child(
        &mut self,
        parent: impl Into<String>,
        child: impl Into<String>,
    ) -> Result<(), TaxonomyError> {
        let parent = parent.into();
        let child = child.into();

        if self.root.is_none() {
            return Err(TaxonomyError::MissingRoot);
        }
        if !self.contains(&parent) {
            return Err(TaxonomyError::UnknownParent(parent));
        }
        if self.contains(&child) {
            return Err(TaxonomyError::DuplicateConcept(child));
        }

        self.children
            .entry(parent.clone())
            .or_default()
            .push(child.clone());
        self.parents.insert(child, parent);
        Ok(())
    }

    pub fn contains(&self, concept: &str) -> bool {
        self.root.as_deref() == Some(concept) || self.parents.contains_key(concept)
    }

    pub fn parent(&self, concept: &str) -> Option<&str> {
        self.parents.get(concept).map(String::as_str)
    }

    pub fn children(&self, concept: &str) -> &[String] {
        self.children
            .get(concept)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of known concepts, root included
    pub fn len(&self) -> usize {
        self.parents.len() + usize::from(self.root.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Taxonomy for BasicTaxonomy {
    fn subsumes(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }

        let mut current = b;
        while let Some(parent) = self.parent(current) {
            if parent == a {
                return true;
            }
            current = parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Z → {A, C, D}, A → B, B → E
    fn sample() -> BasicTaxonomy {
        let mut t = BasicTaxonomy::with_root("Z");
        t.add_child("Z", "A").unwrap();
        t.add_child("A", "B").unwrap();
        t.add_child("B", "E").unwrap();
        t.add_child("Z", "C").unwrap();
        t.add_child("Z", "D").unwrap();
        t
    }

    #[test]
    fn test_subsumes_walks_ancestors() {
        let t = sample();
        assert!(t.subsumes("Z", "E"));
        assert!(t.subsumes("A", "B"));
        assert!(t.subsumes("B", "B"));
        assert!(!t.subsumes("B", "A"));
        assert!(!t.subsumes("C", "B"));
    }

    #[test]
    fn test_are_related_is_symmetric() {
        let t = sample();
        assert!(t.are_related("A", "E"));
        assert!(t.are_related("E", "A"));
        assert!(!t.are_related("C", "A"));
    }

    #[test]
    fn test_unknown_concepts_only_subsume_themselves() {
        let t = BasicTaxonomy::new();
        assert!(t.subsumes("X", "X"));
        assert!(!t.are_related("X", "Y"));
    }

    #[test]
    fn test_add_child_errors() {
        let mut t = sample();
        assert_eq!(
            t.add_child("Q", "R"),
            Err(TaxonomyError::UnknownParent("Q".into()))
        );
        assert_eq!(
            t.add_child("Z", "A"),
            Err(TaxonomyError::DuplicateConcept("A".into()))
        );

        let mut rootless = BasicTaxonomy::new();
        assert_eq!(rootless.add_child("Z", "A"), Err(TaxonomyError::MissingRoot));
    }

    #[test]
    fn test_parameter_relations_respect_polarity() {
        let t = sample();
        let a_in = Parameter::input("A");
        let b_in = Parameter::input("B");
        let b_out = Parameter::output("B");
        assert!(t.subsumes_parameter(&a_in, &b_in));
        assert!(!t.subsumes_parameter(&a_in, &b_out));
        assert!(t.related_parameters(&b_in, &a_in));
        assert!(!t.related_parameters(&b_out, &a_in));
    }

    #[test]
    fn test_structure_accessors() {
        let t = sample();
        assert_eq!(t.root(), Some("Z"));
        assert_eq!(t.len(), 6);
        assert_eq!(t.children("Z"), &["A".to_string(), "C".into(), "D".into()]);
        assert_eq!(t.parent("E"), Some("B"));
        assert!(t.children("E").is_empty());
    }
}
