//! Taxonomy documents
//!
//! ```xml
//! <taxonomy root="Z">
//!   <element id="Z"><child id="A"/><child id="C"/></element>
//!   <element id="A"><child id="B"/></element>
//! </taxonomy>
//! ```
//!
//! Elements may appear in any order; every concept must hang off the root.

use super::{read_file, write_file, PersistError};
use crate::taxonomy::{BasicTaxonomy, TaxonomyError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;

const ROOT: &str = "taxonomy";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaxonomyDoc {
    #[serde(rename = "@root", default, skip_serializing_if = "Option::is_none")]
    root: Option<String>,
    #[serde(rename = "element", default)]
    elements: Vec<ConceptElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConceptElement {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "child", default)]
    children: Vec<ChildElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChildElement {
    #[serde(rename = "@id")]
    id: String,
}

pub fn taxonomy_to_xml(taxonomy: &BasicTaxonomy) -> Result<String, PersistError> {
    let mut doc = TaxonomyDoc {
        root: taxonomy.root().map(str::to_string),
        elements: Vec::new(),
    };

    let mut queue: VecDeque<String> = taxonomy.root().map(str::to_string).into_iter().collect();
    while let Some(concept) = queue.pop_front() {
        let children = taxonomy.children(&concept);
        if children.is_empty() {
            continue;
        }
        doc.elements.push(ConceptElement {
            id: concept.clone(),
            children: children
                .iter()
                .map(|c| ChildElement { id: c.clone() })
                .collect(),
        });
        queue.extend(children.iter().cloned());
    }

    Ok(quick_xml::se::to_string_with_root(ROOT, &doc)?)
}

pub fn taxonomy_from_xml(xml: &str) -> Result<BasicTaxonomy, PersistError> {
    let doc: TaxonomyDoc = quick_xml::de::from_str(xml)?;

    let root = match doc.root.as_deref().map(str::trim) {
        None | Some("") => {
            if doc.elements.is_empty() {
                return Ok(BasicTaxonomy::new());
            }
            return Err(TaxonomyError::MissingRoot.into());
        }
        Some(root) => root.to_string(),
    };

    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for element in doc.elements {
        children
            .entry(element.id)
            .or_default()
            .extend(element.children.into_iter().map(|c| c.id));
    }

    let mut taxonomy = BasicTaxonomy::with_root(root.clone());
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        if let Some(kids) = children.remove(&parent) {
            for child in kids {
                taxonomy.add_child(parent.clone(), child.clone())?;
                queue.push_back(child);
            }
        }
    }

    // anything left was never reached from the root
    if let Some(orphan) = children.into_keys().next() {
        return Err(TaxonomyError::UnknownParent(orphan).into());
    }
    Ok(taxonomy)
}

pub fn save_taxonomy(taxonomy: &BasicTaxonomy, path: &Path) -> Result<(), PersistError> {
    write_file(path, &taxonomy_to_xml(taxonomy)?)
}

pub fn load_taxonomy(path: &Path) -> Result<BasicTaxonomy, PersistError> {
    taxonomy_from_xml(&read_file(path)?)
}
