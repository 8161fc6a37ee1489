// Store module — XML snapshots of tables and taxonomies
//
// Documents are plain serde structs rendered by quick-xml. Attribute values
// are read as strings and parsed here so a malformed value names the
// attribute that carried it.

pub mod capability;
pub mod routes;
pub mod taxonomy;

pub use capability::{
    capability_table_from_xml, capability_table_to_xml, load_capability_table,
    save_capability_table,
};
pub use routes::{load_route_table, route_table_from_xml, route_table_to_xml, save_route_table};
pub use taxonomy::{load_taxonomy, save_taxonomy, taxonomy_from_xml, taxonomy_to_xml};

use crate::parameter::ParameterError;
use crate::taxonomy::TaxonomyError;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(String),
    #[error("Invalid value {value:?} for attribute {attribute}")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
    #[error(transparent)]
    InvalidParameter(#[from] ParameterError),
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
}

impl From<quick_xml::de::DeError> for PersistError {
    fn from(err: quick_xml::de::DeError) -> Self {
        PersistError::Xml(err.to_string())
    }
}

/// Parse an attribute value, naming the attribute on failure
pub(crate) fn parse_attr<T: FromStr>(attribute: &'static str, value: &str) -> Result<T, PersistError> {
    value
        .trim()
        .parse()
        .map_err(|_| PersistError::InvalidAttribute {
            attribute,
            value: value.to_string(),
        })
}

pub(crate) fn write_file(path: &Path, xml: &str) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, xml)?;
    Ok(())
}

pub(crate) fn read_file(path: &Path) -> Result<String, PersistError> {
    Ok(fs::read_to_string(path)?)
}
