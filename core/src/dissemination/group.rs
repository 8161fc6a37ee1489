//! Taxonomy grouping of parameters
//!
//! Related parameters of the same polarity share a single distance list. The
//! group is named after its most general member inserted so far.

use crate::parameter::Parameter;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityGroup {
    representative: Parameter,
}

impl CapabilityGroup {
    pub fn new(representative: Parameter) -> Self {
        Self { representative }
    }

    pub fn representative(&self) -> &Parameter {
        &self.representative
    }

    /// Same polarity as the representative and related to it
    pub fn belongs(&self, p: &Parameter, taxonomy: &dyn Taxonomy) -> bool {
        taxonomy.related_parameters(&self.representative, p)
    }

    /// Add `p` to the group. Returns false (and leaves the group alone) if it
    /// does not belong. A more general `p` becomes the representative.
    pub fn add(&mut self, p: &Parameter, taxonomy: &dyn Taxonomy) -> bool {
        if !self.belongs(p, taxonomy) {
            return false;
        }

        if taxonomy.subsumes(p.concept(), self.representative.concept()) {
            self.representative = p.clone();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::BasicTaxonomy;

    fn taxonomy() -> BasicTaxonomy {
        let mut t = BasicTaxonomy::with_root("Z");
        t.add_child("Z", "A").unwrap();
        t.add_child("A", "B").unwrap();
        t.add_child("Z", "C").unwrap();
        t
    }

    #[test]
    fn test_belongs_requires_relation_and_polarity() {
        let t = taxonomy();
        let group = CapabilityGroup::new(Parameter::input("A"));

        assert!(group.belongs(&Parameter::input("B"), &t));
        assert!(group.belongs(&Parameter::input("Z"), &t));
        assert!(!group.belongs(&Parameter::input("C"), &t));
        assert!(!group.belongs(&Parameter::output("B"), &t));
    }

    #[test]
    fn test_more_general_member_becomes_representative() {
        let t = taxonomy();
        let mut group = CapabilityGroup::new(Parameter::input("B"));

        assert!(group.add(&Parameter::input("A"), &t));
        assert_eq!(group.representative(), &Parameter::input("A"));

        // more specific members keep the current representative
        assert!(group.add(&Parameter::input("B"), &t));
        assert_eq!(group.representative(), &Parameter::input("A"));
    }

    #[test]
    fn test_add_rejects_unrelated() {
        let t = taxonomy();
        let mut group = CapabilityGroup::new(Parameter::input("A"));
        assert!(!group.add(&Parameter::input("C"), &t));
        assert_eq!(group.representative(), &Parameter::input("A"));
    }
}
